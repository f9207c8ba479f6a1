//! Optimistic score / combo accounting for one cascade.

/// Score, combo counter and best combo. Client-predicted until the backend confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub score: u32,
    pub combo: u32,
    pub max_combo: u32,
}

/// What one move or bonus cascade earned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cascade {
    pub lines: u32,
    pub points: u32,
    pub combo: u32,
}

impl Cascade {
    /// `lines` cleared in one cascade: `n(n+1)/2` points, combo `n` only when `n > 1`.
    pub fn from_lines(lines: u32) -> Self {
        Self {
            lines,
            points: lines * (lines + 1) / 2,
            combo: if lines > 1 { lines } else { 0 },
        }
    }
}

impl Counters {
    /// Fold a finished cascade into the running totals.
    pub fn apply(&mut self, cascade: Cascade) {
        self.score = self.score.saturating_add(cascade.points);
        self.combo = self.combo.saturating_add(cascade.combo);
        self.max_combo = self.max_combo.max(cascade.combo);
    }
}

/// Label shown for a multi-line cascade.
pub fn combo_message(lines: u32) -> Option<&'static str> {
    match lines {
        0 | 1 => None,
        2 => Some("Good!"),
        3 => Some("Great!"),
        4 => Some("Super!"),
        5 => Some("Awesome!"),
        6 => Some("Fantastic!"),
        7 => Some("Amazing!"),
        8 => Some("Incredible!"),
        _ => Some("Legendary!"),
    }
}
