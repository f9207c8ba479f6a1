//! Bonuses: Hammer, Wave, Totem. Unlock tiers and grid effects.

use crate::grid::{Block, GridSnapshot};
use thiserror::Error;

/// Special limited-use grid action. `None` means no bonus is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Bonus {
    #[default]
    None,
    Hammer,
    Wave,
    Totem,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BonusError {
    #[error("no bonus selected")]
    NotSelected,
    #[error("{0:?} has no uses left")]
    Exhausted(Bonus),
}

/// One unlock tier: reached once the score or the combo counter meets its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub score: u32,
    pub combo: u32,
}

const HAMMER_TIERS: [Tier; 3] = [
    Tier { score: 40, combo: 2 },
    Tier { score: 80, combo: 4 },
    Tier { score: 120, combo: 6 },
];
const WAVE_TIERS: [Tier; 3] = [
    Tier { score: 60, combo: 3 },
    Tier { score: 120, combo: 5 },
    Tier { score: 180, combo: 7 },
];
const TOTEM_TIERS: [Tier; 3] = [
    Tier { score: 80, combo: 4 },
    Tier { score: 160, combo: 6 },
    Tier { score: 240, combo: 8 },
];

impl Bonus {
    pub const ALL: [Self; 3] = [Self::Hammer, Self::Wave, Self::Totem];

    /// Numeric kind sent to the backend (None = 0).
    pub fn index(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Hammer => 1,
            Self::Totem => 2,
            Self::Wave => 3,
        }
    }

    pub fn from_index(index: u8) -> Self {
        match index {
            1 => Self::Hammer,
            2 => Self::Totem,
            3 => Self::Wave,
            _ => Self::None,
        }
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::None
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Hammer => "Hammer",
            Self::Wave => "Wave",
            Self::Totem => "Totem",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Hammer => "Smash a single block",
            Self::Wave => "Wash away a whole row",
            Self::Totem => "Remove every block of the same size",
        }
    }

    pub fn tiers(self) -> &'static [Tier] {
        match self {
            Self::None => &[],
            Self::Hammer => &HAMMER_TIERS,
            Self::Wave => &WAVE_TIERS,
            Self::Totem => &TOTEM_TIERS,
        }
    }

    /// Uses unlocked so far: how many tiers the score or combo has reached.
    pub fn unlocked(self, score: u32, combo: u32) -> u32 {
        self.tiers()
            .iter()
            .filter(|t| score >= t.score || combo >= t.combo)
            .count() as u32
    }

    /// Unlocked uses minus the ones already spent.
    pub fn remaining(self, score: u32, combo: u32, used: u32) -> u32 {
        self.unlocked(score, combo).saturating_sub(used)
    }

    /// Blocks this bonus would remove when aimed at `target`.
    pub fn affects(self, target: &Block, block: &Block) -> bool {
        match self {
            Self::None => false,
            Self::Hammer => block.id == target.id,
            Self::Wave => block.y == target.y,
            Self::Totem => block.width == target.width,
        }
    }

    /// Apply the bonus to `grid`, aimed at `target`. Returns the removed blocks.
    pub fn apply(self, target: &Block, grid: &mut GridSnapshot) -> Result<Vec<Block>, BonusError> {
        if self.is_none() {
            return Err(BonusError::NotSelected);
        }
        let target = *target;
        Ok(grid.remove_where(|b| self.affects(&target, b)))
    }
}

/// Spent uses per bonus, as tracked by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BonusUses {
    pub hammer: u32,
    pub wave: u32,
    pub totem: u32,
}

impl BonusUses {
    pub fn get(&self, bonus: Bonus) -> u32 {
        match bonus {
            Bonus::None => 0,
            Bonus::Hammer => self.hammer,
            Bonus::Wave => self.wave,
            Bonus::Totem => self.totem,
        }
    }

    pub fn spend(&mut self, bonus: Bonus) {
        match bonus {
            Bonus::None => {}
            Bonus::Hammer => self.hammer += 1,
            Bonus::Wave => self.wave += 1,
            Bonus::Totem => self.totem += 1,
        }
    }
}
