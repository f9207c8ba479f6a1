//! Reconciliation: replace the optimistic view with the authoritative one, wholesale.

use crate::bonus::BonusUses;
use crate::counters::Counters;
use crate::grid::{GridSnapshot, NextLine};

/// Everything the backend is authoritative for. The session keeps its optimistic copy in the same shape.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub grid: GridSnapshot,
    pub next_line: NextLine,
    pub counters: Counters,
    pub over: bool,
    pub bonuses_used: BonusUses,
}

impl Snapshot {
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            grid: GridSnapshot::new(width, height),
            next_line: NextLine::default(),
            counters: Counters::default(),
            over: false,
            bonuses_used: BonusUses::default(),
        }
    }

    /// Deep equality that ignores block identity.
    pub fn same_as(&self, other: &Self) -> bool {
        self.grid.same_layout(&other.grid)
            && self.next_line == other.next_line
            && self.counters == other.counters
            && self.over == other.over
            && self.bonuses_used == other.bonuses_used
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Authoritative state matched; nothing was touched.
    Unchanged,
    /// Local view was replaced.
    Replaced,
}

/// Replace `local` with `authoritative` unless the two are structurally identical.
pub fn reconcile(local: &mut Snapshot, authoritative: Snapshot) -> Reconciliation {
    if local.same_as(&authoritative) {
        return Reconciliation::Unchanged;
    }
    *local = authoritative;
    Reconciliation::Replaced
}
