//! Seeded generator for the lines the authority reveals after each move.

use crate::grid::Segment;

/// Widest block a generated line may contain.
pub const MAX_BLOCK_WIDTH: usize = 4;

/// Produces partially filled rows: at least one block, never a complete row.
#[derive(Debug, Clone)]
pub struct LineGen {
    rng: u32,
}

impl LineGen {
    pub fn new(seed: u32) -> Self {
        Self {
            rng: seed ^ 0x1234_5678,
        }
    }

    fn next_rand(&mut self) -> u32 {
        self.rng = self.rng.wrapping_mul(1_103_515_245).wrapping_add(12345);
        self.rng >> 16
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next_rand() as usize) % n.max(1)
    }

    /// Next line for a grid `width` columns wide.
    pub fn next_line(&mut self, width: usize) -> Vec<Segment> {
        if width < 2 {
            return Vec::new();
        }
        // One column stays open so the line can never be complete on arrival.
        let hole = self.below(width);
        let mut segments = Vec::new();
        let mut x = 0;
        while x < width {
            if x == hole || self.below(3) == 0 {
                x += 1;
                continue;
            }
            let room = if x < hole { hole - x } else { width - x };
            let w = 1 + self.below(room.min(MAX_BLOCK_WIDTH));
            segments.push(Segment { x, width: w });
            x += w;
        }
        if segments.is_empty() {
            let x = if hole == 0 { 1 } else { 0 };
            segments.push(Segment { x, width: 1 });
        }
        segments
    }
}

impl Default for LineGen {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(width: usize, segments: &[Segment]) {
        assert!(!segments.is_empty());
        let mut end = 0;
        for s in segments {
            assert!(s.width >= 1 && s.width <= MAX_BLOCK_WIDTH);
            assert!(s.x >= end, "segments overlap: {segments:?}");
            end = s.x + s.width;
        }
        assert!(end <= width);
        let covered: usize = segments.iter().map(|s| s.width).sum();
        assert!(covered < width);
    }

    #[test]
    fn test_lines_are_never_full() {
        let mut g = LineGen::new(42);
        for width in [2, 4, 8, 10] {
            for _ in 0..500 {
                check(width, &g.next_line(width));
            }
        }
    }

    #[test]
    fn test_same_seed_same_lines() {
        let mut a = LineGen::new(7);
        let mut b = LineGen::new(7);
        for _ in 0..20 {
            assert_eq!(a.next_line(8), b.next_line(8));
        }
    }

    #[test]
    fn test_degenerate_width() {
        assert!(LineGen::default().next_line(1).is_empty());
    }
}
