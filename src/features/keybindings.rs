//! Customizable keyboard shortcuts
//!
//! Every key the player reacts to goes through [`KeyBindings::find_action`],
//! which turns a terminal key event into one of the closed set of
//! [`Action`]s.

use std::collections::HashMap;

use crossterm::event::{KeyCode as TermKey, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};

/// All bindable actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Quit,
    TogglePause,
    SeekBackward,
    SeekForward,
    VolumeDown,
    VolumeUp,
    SpeedDown,
    SpeedUp,
}

impl Action {
    /// Get all available actions
    pub fn all() -> &'static [Action] {
        &[
            Action::Quit,
            Action::TogglePause,
            Action::SeekBackward,
            Action::SeekForward,
            Action::VolumeDown,
            Action::VolumeUp,
            Action::SpeedDown,
            Action::SpeedUp,
        ]
    }

    /// Get human-readable name for the action
    pub fn display_name(&self) -> &'static str {
        match self {
            Action::Quit => "Quit",
            Action::TogglePause => "Pause/resume",
            Action::SeekBackward => "Seek backward",
            Action::SeekForward => "Seek forward",
            Action::VolumeDown => "Volume down",
            Action::VolumeUp => "Volume up",
            Action::SpeedDown => "Slow down",
            Action::SpeedUp => "Speed up",
        }
    }
}

/// A keyboard shortcut consisting of modifiers and a key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyBinding {
    #[serde(default)]
    pub modifiers: ModifierSet,
    pub key: KeyCode,
}

impl KeyBinding {
    pub fn new(key: KeyCode) -> Self {
        Self {
            modifiers: ModifierSet::default(),
            key,
        }
    }

    /// Add Ctrl modifier
    pub fn ctrl(mut self) -> Self {
        self.modifiers.ctrl = true;
        self
    }

    /// Add Alt modifier
    #[cfg(test)]
    pub fn alt(mut self) -> Self {
        self.modifiers.alt = true;
        self
    }

    /// Check if this keybinding matches the given key event
    ///
    /// Shift is ignored so letters match in either case.
    pub fn matches(&self, event: &KeyEvent) -> bool {
        self.key.matches(&event.code) && self.modifiers.matches(event.modifiers)
    }

    /// Format as human-readable string
    pub fn display(&self) -> String {
        let mut parts = Vec::new();

        if self.modifiers.ctrl {
            parts.push("Ctrl");
        }
        if self.modifiers.alt {
            parts.push("Alt");
        }

        parts.push(self.key.display());
        parts.join("+")
    }
}

/// Set of modifier keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ModifierSet {
    pub ctrl: bool,
    pub alt: bool,
}

impl ModifierSet {
    pub fn matches(&self, modifiers: KeyModifiers) -> bool {
        self.ctrl == modifiers.contains(KeyModifiers::CONTROL)
            && self.alt == modifiers.contains(KeyModifiers::ALT)
    }
}

/// Supported key codes for binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyCode {
    // Letters
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,

    // Numbers
    Key0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,

    // Symbols
    Minus,
    Plus,
    Comma,
    Period,

    // Navigation
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,

    // Special
    Space,
    Enter,
    Escape,
    Tab,
    Backspace,
    Delete,
}

impl KeyCode {
    /// Character produced by this key, if it is a printable key
    fn as_char(&self) -> Option<char> {
        let c = match self {
            KeyCode::A => 'a',
            KeyCode::B => 'b',
            KeyCode::C => 'c',
            KeyCode::D => 'd',
            KeyCode::E => 'e',
            KeyCode::F => 'f',
            KeyCode::G => 'g',
            KeyCode::H => 'h',
            KeyCode::I => 'i',
            KeyCode::J => 'j',
            KeyCode::K => 'k',
            KeyCode::L => 'l',
            KeyCode::M => 'm',
            KeyCode::N => 'n',
            KeyCode::O => 'o',
            KeyCode::P => 'p',
            KeyCode::Q => 'q',
            KeyCode::R => 'r',
            KeyCode::S => 's',
            KeyCode::T => 't',
            KeyCode::U => 'u',
            KeyCode::V => 'v',
            KeyCode::W => 'w',
            KeyCode::X => 'x',
            KeyCode::Y => 'y',
            KeyCode::Z => 'z',
            KeyCode::Key0 => '0',
            KeyCode::Key1 => '1',
            KeyCode::Key2 => '2',
            KeyCode::Key3 => '3',
            KeyCode::Key4 => '4',
            KeyCode::Key5 => '5',
            KeyCode::Key6 => '6',
            KeyCode::Key7 => '7',
            KeyCode::Key8 => '8',
            KeyCode::Key9 => '9',
            KeyCode::Minus => '-',
            KeyCode::Plus => '+',
            KeyCode::Comma => ',',
            KeyCode::Period => '.',
            KeyCode::Space => ' ',
            _ => return None,
        };
        Some(c)
    }

    /// Check if this key code matches a terminal key
    pub fn matches(&self, key: &TermKey) -> bool {
        match key {
            TermKey::Char(c) => self
                .as_char()
                .is_some_and(|own| c.to_lowercase().eq(std::iter::once(own))),
            other => matches!(
                (self, other),
                (KeyCode::Enter, TermKey::Enter)
                    | (KeyCode::Escape, TermKey::Esc)
                    | (KeyCode::Tab, TermKey::Tab)
                    | (KeyCode::Backspace, TermKey::Backspace)
                    | (KeyCode::Delete, TermKey::Delete)
                    | (KeyCode::Up, TermKey::Up)
                    | (KeyCode::Down, TermKey::Down)
                    | (KeyCode::Left, TermKey::Left)
                    | (KeyCode::Right, TermKey::Right)
                    | (KeyCode::Home, TermKey::Home)
                    | (KeyCode::End, TermKey::End)
                    | (KeyCode::PageUp, TermKey::PageUp)
                    | (KeyCode::PageDown, TermKey::PageDown)
            ),
        }
    }

    /// Get display name for the key
    pub fn display(&self) -> &'static str {
        match self {
            KeyCode::A => "A",
            KeyCode::B => "B",
            KeyCode::C => "C",
            KeyCode::D => "D",
            KeyCode::E => "E",
            KeyCode::F => "F",
            KeyCode::G => "G",
            KeyCode::H => "H",
            KeyCode::I => "I",
            KeyCode::J => "J",
            KeyCode::K => "K",
            KeyCode::L => "L",
            KeyCode::M => "M",
            KeyCode::N => "N",
            KeyCode::O => "O",
            KeyCode::P => "P",
            KeyCode::Q => "Q",
            KeyCode::R => "R",
            KeyCode::S => "S",
            KeyCode::T => "T",
            KeyCode::U => "U",
            KeyCode::V => "V",
            KeyCode::W => "W",
            KeyCode::X => "X",
            KeyCode::Y => "Y",
            KeyCode::Z => "Z",
            KeyCode::Key0 => "0",
            KeyCode::Key1 => "1",
            KeyCode::Key2 => "2",
            KeyCode::Key3 => "3",
            KeyCode::Key4 => "4",
            KeyCode::Key5 => "5",
            KeyCode::Key6 => "6",
            KeyCode::Key7 => "7",
            KeyCode::Key8 => "8",
            KeyCode::Key9 => "9",
            KeyCode::Minus => "-",
            KeyCode::Plus => "+",
            KeyCode::Comma => ",",
            KeyCode::Period => ".",
            KeyCode::Up => "↑",
            KeyCode::Down => "↓",
            KeyCode::Left => "←",
            KeyCode::Right => "→",
            KeyCode::Home => "Home",
            KeyCode::End => "End",
            KeyCode::PageUp => "PageUp",
            KeyCode::PageDown => "PageDown",
            KeyCode::Space => "SPACE",
            KeyCode::Enter => "Enter",
            KeyCode::Escape => "ESC",
            KeyCode::Tab => "Tab",
            KeyCode::Backspace => "Backspace",
            KeyCode::Delete => "Delete",
        }
    }
}

/// The keybindings configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBindings {
    /// Map from action to keybinding
    bindings: HashMap<Action, Vec<KeyBinding>>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let mut bindings = HashMap::new();

        bindings.insert(
            Action::Quit,
            vec![
                KeyBinding::new(KeyCode::Escape),
                KeyBinding::new(KeyCode::C).ctrl(),
            ],
        );
        bindings.insert(Action::TogglePause, vec![KeyBinding::new(KeyCode::Space)]);

        bindings.insert(Action::SeekBackward, vec![KeyBinding::new(KeyCode::Q)]);
        bindings.insert(Action::SeekForward, vec![KeyBinding::new(KeyCode::W)]);
        bindings.insert(Action::VolumeDown, vec![KeyBinding::new(KeyCode::A)]);
        bindings.insert(Action::VolumeUp, vec![KeyBinding::new(KeyCode::S)]);
        bindings.insert(Action::SpeedDown, vec![KeyBinding::new(KeyCode::Z)]);
        bindings.insert(Action::SpeedUp, vec![KeyBinding::new(KeyCode::X)]);

        Self { bindings }
    }
}

impl KeyBindings {
    /// Get the keybindings for an action
    #[cfg(test)]
    pub fn get(&self, action: &Action) -> Option<&Vec<KeyBinding>> {
        self.bindings.get(action)
    }

    /// Set keybindings for an action
    #[cfg(test)]
    pub fn set(&mut self, action: Action, bindings: Vec<KeyBinding>) {
        self.bindings.insert(action, bindings);
    }

    /// Find the action that matches the given key event
    ///
    /// Actions are tried in [`Action::all`] order, so overlapping bindings
    /// resolve the same way every time.
    pub fn find_action(&self, event: &KeyEvent) -> Option<Action> {
        Action::all().iter().copied().find(|action| {
            self.bindings
                .get(action)
                .is_some_and(|bindings| bindings.iter().any(|b| b.matches(event)))
        })
    }

    /// Get display string for an action's keybinding
    pub fn display_for_action(&self, action: &Action) -> String {
        self.bindings
            .get(action)
            .and_then(|b| b.first())
            .map(|b| b.display())
            .unwrap_or_else(|| "None".to_string())
    }

    /// Actions without any binding
    pub fn unbound(&self) -> Vec<Action> {
        Action::all()
            .iter()
            .copied()
            .filter(|action| self.bindings.get(action).is_none_or(|b| b.is_empty()))
            .collect()
    }
}
