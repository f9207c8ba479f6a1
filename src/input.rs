//! Key bindings: arrows and vim-style movement.

use crate::bonus::Bonus;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Action from a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Left,
    Right,
    Up,
    Down,
    /// Grab or release the block under the cursor, or fire the armed bonus at it.
    Grab,
    ArmBonus(Bonus),
    /// Release the grabbed block or disarm the bonus.
    Cancel,
    Restart,
    Quit,
    None,
}

/// Map key event to action. Arrows and hjkl both move.
pub fn key_to_action(key: KeyEvent) -> Action {
    let KeyEvent { code, modifiers, .. } = key;
    if modifiers == KeyModifiers::CONTROL && code == KeyCode::Char('c') {
        return Action::Quit;
    }
    if !(modifiers.is_empty() || modifiers == KeyModifiers::SHIFT) {
        return Action::None;
    }
    match code {
        KeyCode::Char('q' | 'Q') => Action::Quit,
        KeyCode::Esc => Action::Cancel,
        KeyCode::Left | KeyCode::Char('h') => Action::Left,
        KeyCode::Right | KeyCode::Char('l') => Action::Right,
        KeyCode::Up | KeyCode::Char('k') => Action::Up,
        KeyCode::Down | KeyCode::Char('j') => Action::Down,
        KeyCode::Enter | KeyCode::Char(' ') => Action::Grab,
        KeyCode::Char('1') => Action::ArmBonus(Bonus::Hammer),
        KeyCode::Char('2') => Action::ArmBonus(Bonus::Wave),
        KeyCode::Char('3') => Action::ArmBonus(Bonus::Totem),
        KeyCode::Char('r' | 'R') => Action::Restart,
        _ => Action::None,
    }
}
