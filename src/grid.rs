//! Grid model: blocks, collision, gravity, line clear, next-line injection.

use std::collections::BTreeSet;
use std::ops::Range;
use thiserror::Error;

/// Rows at the top of the grid that put the player "in danger" when occupied.
pub const DANGER_ROWS: usize = 2;

/// Stable block identifier. Survives simulation steps; reassigned on authoritative reload.
pub type BlockId = u32;

/// A horizontal block: occupies columns `[x, x + width)` on row `y` (y = 0 is the top row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    pub id: BlockId,
    pub x: usize,
    pub y: usize,
    pub width: usize,
}

impl Block {
    #[inline]
    pub fn columns(&self) -> Range<usize> {
        self.x..self.x + self.width
    }

    #[inline]
    pub fn overlaps(&self, row: usize, cols: &Range<usize>) -> bool {
        self.y == row && self.x < cols.end && cols.start < self.x + self.width
    }

    /// Row index counted from the floor, the convention the backend speaks.
    #[inline]
    pub fn row_from_bottom(&self, height: usize) -> usize {
        height - 1 - self.y
    }
}

/// One segment of a pending line: a block-to-be without identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub x: usize,
    pub width: usize,
}

/// Next Line Buffer: the row revealed after a successful move.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NextLine {
    pub segments: Vec<Segment>,
    pub consumed: bool,
}

impl NextLine {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            consumed: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("block at ({x}, {y}) with width {width} leaves the {grid_width}x{grid_height} grid")]
    OutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        grid_width: usize,
        grid_height: usize,
    },
    #[error("block at ({x}, {y}) overlaps block {other}")]
    Overlap { x: usize, y: usize, other: BlockId },
    #[error("block width must be at least 1")]
    ZeroWidth,
}

/// Injecting the next line would push a block past the top row.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("grid is full")]
pub struct GridFull;

/// Result of one line-clear pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clearance {
    /// Complete rows, top to bottom.
    pub rows: Vec<usize>,
    /// Blocks deleted from those rows.
    pub removed: Vec<Block>,
}

impl Clearance {
    #[inline]
    pub fn count(&self) -> usize {
        self.rows.len()
    }
}

/// Grid Snapshot: dimensions and the set of blocks. No two blocks overlap.
#[derive(Debug, Clone)]
pub struct GridSnapshot {
    pub width: usize,
    pub height: usize,
    blocks: Vec<Block>,
    next_id: BlockId,
}

impl GridSnapshot {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            blocks: Vec::new(),
            next_id: 1,
        }
    }

    /// Build from `(x, y, width)` triples, assigning ids in order. Rejects overlap and out-of-bounds.
    pub fn from_blocks<I>(width: usize, height: usize, cells: I) -> Result<Self, GridError>
    where
        I: IntoIterator<Item = (usize, usize, usize)>,
    {
        let mut grid = Self::new(width, height);
        for (x, y, w) in cells {
            grid.insert(x, y, w)?;
        }
        Ok(grid)
    }

    /// Place a new block. Returns its id.
    pub fn insert(&mut self, x: usize, y: usize, width: usize) -> Result<BlockId, GridError> {
        if width == 0 {
            return Err(GridError::ZeroWidth);
        }
        if x + width > self.width || y >= self.height {
            return Err(GridError::OutOfBounds {
                x,
                y,
                width,
                grid_width: self.width,
                grid_height: self.height,
            });
        }
        let cols = x..x + width;
        if let Some(other) = self.blocks.iter().find(|b| b.overlaps(y, &cols)) {
            return Err(GridError::Overlap { x, y, other: other.id });
        }
        let id = self.alloc_id();
        self.blocks.push(Block { id, x, y, width });
        Ok(id)
    }

    fn alloc_id(&mut self) -> BlockId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    #[inline]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Block covering cell `(x, y)`, if any.
    pub fn block_at(&self, x: usize, y: usize) -> Option<&Block> {
        self.blocks.iter().find(|b| b.overlaps(y, &(x..x + 1)))
    }

    /// True iff `cols` on `row` is inside the grid and free of every block other than `id`.
    pub fn can_occupy(&self, id: BlockId, row: usize, cols: Range<usize>) -> bool {
        if row >= self.height || cols.end > self.width || cols.start >= cols.end {
            return false;
        }
        !self
            .blocks
            .iter()
            .any(|b| b.id != id && b.overlaps(row, &cols))
    }

    /// Rows the block can descend before hitting another block or the floor.
    pub fn fall_distance(&self, block: &Block) -> usize {
        let mut dist = 0;
        while self.can_occupy(block.id, block.y + dist + 1, block.columns()) {
            dist += 1;
        }
        dist
    }

    /// True if sliding `id` horizontally to `to_x` sweeps only free cells on its row.
    pub fn slide_path_clear(&self, id: BlockId, to_x: usize) -> bool {
        let Some(block) = self.block(id) else {
            return false;
        };
        let start = block.x.min(to_x);
        let end = block.x.max(to_x) + block.width;
        self.can_occupy(id, block.y, start..end)
    }

    /// Furthest column toward `to_x` the block can slide to without crossing another block.
    pub fn slide_limit(&self, id: BlockId, to_x: usize) -> Option<usize> {
        let block = self.block(id)?;
        let mut x = block.x;
        while x != to_x {
            let next = if to_x > x { x + 1 } else { x - 1 };
            if !self.can_occupy(id, block.y, next..next + block.width) {
                break;
            }
            x = next;
        }
        Some(x)
    }

    /// Set a block's column. Caller checks the path first.
    pub fn move_block(&mut self, id: BlockId, x: usize) -> bool {
        match self.blocks.iter_mut().find(|b| b.id == id) {
            Some(b) => {
                b.x = x;
                true
            }
            None => false,
        }
    }

    /// One gravity tick: every block that can fall moves down one row, all at once.
    /// Returns the ids that moved (empty once settled).
    pub fn apply_gravity(&mut self) -> Vec<BlockId> {
        let falling: Vec<usize> = (0..self.blocks.len())
            .filter(|&i| self.fall_distance(&self.blocks[i]) > 0)
            .collect();
        let mut moved = Vec::with_capacity(falling.len());
        for i in falling {
            self.blocks[i].y += 1;
            moved.push(self.blocks[i].id);
        }
        moved
    }

    /// Run gravity to a fixed point. Returns the number of ticks it took.
    pub fn settle(&mut self) -> usize {
        let mut ticks = 0;
        while !self.apply_gravity().is_empty() {
            ticks += 1;
        }
        ticks
    }

    /// Remove every row whose blocks exactly cover `[0, width)`. Survivors are not shifted.
    pub fn clear_complete_rows(&mut self) -> Clearance {
        let mut filled = vec![0usize; self.height];
        for b in &self.blocks {
            filled[b.y] += b.width;
        }
        let rows: Vec<usize> = (0..self.height)
            .filter(|&y| filled[y] == self.width)
            .collect();
        if rows.is_empty() {
            return Clearance::default();
        }
        let full: BTreeSet<usize> = rows.iter().copied().collect();
        let (removed, kept): (Vec<Block>, Vec<Block>) = std::mem::take(&mut self.blocks)
            .into_iter()
            .partition(|b| full.contains(&b.y));
        self.blocks = kept;
        Clearance { rows, removed }
    }

    /// Shift every block one row away from the floor and lay `line` on the floor row.
    /// Leaves the grid untouched and returns `GridFull` if a block already sits on the top row.
    /// The line is marked consumed either way.
    pub fn inject(&mut self, line: &mut NextLine) -> Result<(), GridFull> {
        line.consumed = true;
        if self.blocks.iter().any(|b| b.y == 0) {
            return Err(GridFull);
        }
        for b in &mut self.blocks {
            b.y -= 1;
        }
        let floor = self.height - 1;
        for seg in &line.segments {
            if seg.width == 0 || seg.x + seg.width > self.width {
                continue;
            }
            let id = self.alloc_id();
            self.blocks.push(Block {
                id,
                x: seg.x,
                y: floor,
                width: seg.width,
            });
        }
        Ok(())
    }

    /// Remove every block matching `pred`; returns the removed blocks.
    pub fn remove_where<F>(&mut self, pred: F) -> Vec<Block>
    where
        F: Fn(&Block) -> bool,
    {
        let (removed, kept): (Vec<Block>, Vec<Block>) =
            std::mem::take(&mut self.blocks).into_iter().partition(|b| pred(b));
        self.blocks = kept;
        removed
    }

    /// Any block within the top `DANGER_ROWS` rows.
    pub fn in_danger(&self) -> bool {
        self.blocks.iter().any(|b| b.y < DANGER_ROWS)
    }

    /// Layout without identity: sorted `(y, x, width)` triples.
    pub fn layout(&self) -> Vec<(usize, usize, usize)> {
        let mut v: Vec<_> = self.blocks.iter().map(|b| (b.y, b.x, b.width)).collect();
        v.sort_unstable();
        v
    }

    /// Structural equality ignoring block ids.
    pub fn same_layout(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.layout() == other.layout()
    }

    /// Check bounds and no-overlap for every block.
    pub fn validate(&self) -> Result<(), GridError> {
        for (i, b) in self.blocks.iter().enumerate() {
            if b.width == 0 {
                return Err(GridError::ZeroWidth);
            }
            if b.x + b.width > self.width || b.y >= self.height {
                return Err(GridError::OutOfBounds {
                    x: b.x,
                    y: b.y,
                    width: b.width,
                    grid_width: self.width,
                    grid_height: self.height,
                });
            }
            let cols = b.columns();
            if let Some(other) = self.blocks[i + 1..].iter().find(|o| o.overlaps(b.y, &cols)) {
                return Err(GridError::Overlap {
                    x: b.x,
                    y: b.y,
                    other: other.id,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(w: usize, h: usize, cells: &[(usize, usize, usize)]) -> GridSnapshot {
        GridSnapshot::from_blocks(w, h, cells.iter().copied()).unwrap()
    }

    #[test]
    fn test_insert_rejects_overlap_and_bounds() {
        let mut g = grid(8, 10, &[(0, 9, 3)]);
        assert!(matches!(g.insert(2, 9, 2), Err(GridError::Overlap { .. })));
        assert!(matches!(g.insert(6, 9, 3), Err(GridError::OutOfBounds { .. })));
        assert_eq!(g.insert(3, 9, 2), Ok(2));
        assert_eq!(g.insert(0, 0, 0), Err(GridError::ZeroWidth));
    }

    #[test]
    fn test_can_occupy_ignores_self() {
        let g = grid(8, 10, &[(2, 5, 2), (5, 5, 1)]);
        assert!(g.can_occupy(1, 5, 2..4));
        assert!(g.can_occupy(1, 5, 3..5));
        assert!(!g.can_occupy(1, 5, 4..6));
        assert!(!g.can_occupy(1, 5, 7..9));
        assert!(!g.can_occupy(1, 10, 0..1));
    }

    #[test]
    fn test_fall_distance_floor_and_blocker() {
        let g = grid(8, 10, &[(0, 2, 2), (1, 6, 3), (5, 0, 1)]);
        let blocks = g.blocks();
        assert_eq!(g.fall_distance(&blocks[0]), 3);
        assert_eq!(g.fall_distance(&blocks[1]), 3);
        assert_eq!(g.fall_distance(&blocks[2]), 9);
    }

    #[test]
    fn test_gravity_moves_all_eligible_blocks_together() {
        let mut g = grid(8, 4, &[(0, 0, 2), (0, 2, 2), (4, 0, 1)]);
        let moved = g.apply_gravity();
        assert_eq!(moved, vec![1, 2, 3]);
        assert_eq!(g.layout(), vec![(1, 0, 2), (1, 4, 1), (3, 0, 2)]);
        g.validate().unwrap();

        // Block 1 only now has room to keep going.
        let moved = g.apply_gravity();
        assert_eq!(moved, vec![1, 3]);
    }

    #[test]
    fn test_gravity_idempotent_once_settled() {
        let mut g = grid(8, 6, &[(0, 0, 3), (2, 2, 4), (6, 1, 2)]);
        g.settle();
        let before = g.layout();
        assert!(g.blocks().iter().all(|b| g.fall_distance(b) == 0));
        assert!(g.apply_gravity().is_empty());
        assert_eq!(g.layout(), before);
    }

    #[test]
    fn test_settle_keeps_invariant_each_tick() {
        let mut g = grid(6, 8, &[(0, 0, 2), (1, 1, 3), (4, 0, 2), (3, 3, 1), (0, 7, 1)]);
        loop {
            g.validate().unwrap();
            if g.apply_gravity().is_empty() {
                break;
            }
        }
    }

    #[test]
    fn test_clear_single_full_row() {
        let mut g = grid(8, 1, &[(0, 0, 8)]);
        let c = g.clear_complete_rows();
        assert_eq!(c.count(), 1);
        assert!(g.is_empty());
    }

    #[test]
    fn test_clear_requires_exact_cover() {
        let mut g = grid(8, 3, &[(0, 2, 4), (5, 2, 3)]);
        assert_eq!(g.clear_complete_rows().count(), 0);
        assert_eq!(g.blocks().len(), 2);
    }

    #[test]
    fn test_clear_multiple_rows_in_one_pass_without_shift() {
        let mut g = grid(
            4,
            4,
            &[(0, 1, 1), (0, 2, 2), (2, 2, 2), (0, 3, 4)],
        );
        let c = g.clear_complete_rows();
        assert_eq!(c.rows, vec![2, 3]);
        assert_eq!(c.removed.len(), 3);
        assert_eq!(g.layout(), vec![(1, 0, 1)]);
    }

    #[test]
    fn test_inject_shifts_up_and_lays_floor_row() {
        let mut g = grid(8, 4, &[(0, 3, 2), (3, 2, 1)]);
        let mut line = NextLine::new(vec![Segment { x: 1, width: 3 }, Segment { x: 6, width: 2 }]);
        g.inject(&mut line).unwrap();
        assert!(line.consumed);
        assert_eq!(
            g.layout(),
            vec![(1, 3, 1), (2, 0, 2), (3, 1, 3), (3, 6, 2)]
        );
        g.validate().unwrap();
    }

    #[test]
    fn test_inject_into_full_grid_does_not_mutate() {
        let mut g = grid(8, 4, &[(0, 0, 2), (0, 3, 8)]);
        let before = g.layout();
        let mut line = NextLine::new(vec![Segment { x: 0, width: 1 }]);
        assert_eq!(g.inject(&mut line), Err(GridFull));
        assert!(line.consumed);
        assert_eq!(g.layout(), before);
    }

    #[test]
    fn test_injected_blocks_get_fresh_ids() {
        let mut g = grid(8, 4, &[(0, 3, 2)]);
        let mut line = NextLine::new(vec![Segment { x: 0, width: 2 }]);
        g.inject(&mut line).unwrap();
        let ids: BTreeSet<BlockId> = g.blocks().iter().map(|b| b.id).collect();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_slide_path_cannot_jump_blocks() {
        let g = grid(8, 10, &[(0, 5, 2), (3, 5, 1)]);
        assert!(g.slide_path_clear(1, 1));
        assert!(!g.slide_path_clear(1, 5));
        assert!(g.slide_path_clear(2, 7));
    }

    #[test]
    fn test_slide_limit_stops_at_neighbour() {
        let g = grid(8, 10, &[(0, 5, 2), (5, 5, 1)]);
        assert_eq!(g.slide_limit(1, 7), Some(3));
        assert_eq!(g.slide_limit(2, 0), Some(2));
        assert_eq!(g.slide_limit(2, 7), Some(7));
        assert_eq!(g.slide_limit(9, 1), None);
    }

    #[test]
    fn test_same_layout_ignores_ids() {
        let a = grid(8, 4, &[(0, 3, 2), (4, 3, 1)]);
        let b = grid(8, 4, &[(4, 3, 1), (0, 3, 2)]);
        assert!(a.same_layout(&b));
        let c = grid(8, 4, &[(4, 3, 1), (0, 2, 2)]);
        assert!(!a.same_layout(&c));
    }

    #[test]
    fn test_danger_top_two_rows() {
        assert!(grid(8, 10, &[(0, 1, 1)]).in_danger());
        assert!(!grid(8, 10, &[(0, 2, 1)]).in_danger());
    }
}
