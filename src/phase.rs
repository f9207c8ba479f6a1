//! Turn phases.

/// One state of the turn machine. Exactly one is active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Phase {
    #[default]
    Waiting,
    Dragging,
    Gravity,
    LineClear,
    AddLine,
    Gravity2,
    LineClear2,
    MoveTx,
    GravityBonus,
    LineClearBonus,
    BonusTx,
}

impl Phase {
    /// Phases in which the gravity ticker advances blocks.
    pub fn is_gravity(self) -> bool {
        matches!(self, Self::Gravity | Self::Gravity2 | Self::GravityBonus)
    }

    pub fn is_line_clear(self) -> bool {
        matches!(self, Self::LineClear | Self::LineClear2 | Self::LineClearBonus)
    }

    /// Any phase that runs on the ticker rather than on player input.
    pub fn is_busy(self) -> bool {
        !matches!(self, Self::Waiting | Self::Dragging)
    }

    /// Gravity phase to return to after a clear in this cascade.
    pub fn gravity_of(self) -> Self {
        match self {
            Self::LineClear | Self::Gravity | Self::AddLine => Self::Gravity,
            Self::LineClear2 | Self::Gravity2 | Self::MoveTx => Self::Gravity2,
            Self::LineClearBonus | Self::GravityBonus | Self::BonusTx => Self::GravityBonus,
            Self::Waiting | Self::Dragging => self,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Dragging => "dragging",
            Self::Gravity => "gravity",
            Self::LineClear => "line clear",
            Self::AddLine => "add line",
            Self::Gravity2 => "gravity 2",
            Self::LineClear2 => "line clear 2",
            Self::MoveTx => "move tx",
            Self::GravityBonus => "bonus gravity",
            Self::LineClearBonus => "bonus clear",
            Self::BonusTx => "bonus tx",
        }
    }
}
