//! Key bindings.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Lines moved by one PageUp/PageDown.
pub const PAGE: u16 = 10;

/// What a key press asks the app to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Submit,
    Stop,
    NewSession,
    Back,
    Forward,
    Insert(char),
    Backspace,
    ScrollUp(u16),
    ScrollDown(u16),
}

/// Map a crossterm key event to an action.
#[must_use]
pub fn key_to_action(key: &KeyEvent) -> Option<Action> {
    let action = match (key.code, key.modifiers) {
        (KeyCode::Char('c'), KeyModifiers::CONTROL) => Action::Quit,
        (KeyCode::Char('n'), KeyModifiers::CONTROL) => Action::NewSession,
        (KeyCode::Left, KeyModifiers::ALT) => Action::Back,
        (KeyCode::Right, KeyModifiers::ALT) => Action::Forward,
        (KeyCode::Char(c), KeyModifiers::NONE | KeyModifiers::SHIFT) => Action::Insert(c),
        (KeyCode::Enter, _) => Action::Submit,
        (KeyCode::Esc, _) => Action::Stop,
        (KeyCode::Backspace, _) => Action::Backspace,
        (KeyCode::Up, KeyModifiers::NONE) => Action::ScrollUp(1),
        (KeyCode::Down, KeyModifiers::NONE) => Action::ScrollDown(1),
        (KeyCode::PageUp, _) => Action::ScrollUp(PAGE),
        (KeyCode::PageDown, _) => Action::ScrollDown(PAGE),
        _ => return None,
    };
    Some(action)
}
