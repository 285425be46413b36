//! Keyboard shortcut matching and the action panel dispatch table.

use std::{collections::BTreeSet, fmt};

use keycode::{Chord, Key, Modifier, Scancode, modifiers_from_flags};
use serde::{Deserialize, Serialize};

/// A key press as reported by the launcher's view layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Character or key name produced under the active layout.
    pub key: String,
    /// Physical key code, when the event source reports one.
    #[serde(default)]
    pub code: Option<Scancode>,
    /// Command held.
    #[serde(default)]
    pub meta: bool,
    /// Option held.
    #[serde(default)]
    pub alt: bool,
    /// Control held.
    #[serde(default)]
    pub ctrl: bool,
    /// Shift held.
    #[serde(default)]
    pub shift: bool,
    /// Auto-repeat of a held key.
    #[serde(default)]
    pub repeat: bool,
}

impl KeyEvent {
    /// A press of `key` with no modifiers.
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Build the event a chord would produce on a US layout.
    pub fn from_chord(chord: &Chord) -> Self {
        Self {
            key: chord.key.to_spec(),
            code: Some(chord.key.scancode()),
            meta: chord.modifiers.contains(&Modifier::Cmd),
            alt: chord.modifiers.contains(&Modifier::Opt),
            ctrl: chord.modifiers.contains(&Modifier::Ctrl),
            shift: chord.modifiers.contains(&Modifier::Shift),
            repeat: false,
        }
    }

    /// Modifiers held during the event.
    pub fn modifiers(&self) -> BTreeSet<Modifier> {
        modifiers_from_flags(self.meta, self.alt, self.ctrl, self.shift)
    }
}

/// A declared shortcut: exact modifier set plus a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shortcut {
    /// Key name, compared case-insensitively.
    pub key: String,
    /// Modifiers that must be held, and no others.
    pub modifiers: BTreeSet<Modifier>,
}

impl Shortcut {
    /// Build a shortcut from parts.
    pub fn new(key: impl Into<String>, modifiers: impl IntoIterator<Item = Modifier>) -> Self {
        Self {
            key: key.into(),
            modifiers: modifiers.into_iter().collect(),
        }
    }

    /// Parse a chord string such as `"cmd+shift+k"`.
    pub fn parse(spec: &str) -> Option<Self> {
        Chord::parse(spec).map(|c| Self::from(&c))
    }

    /// Canonical chord form, e.g. `cmd+shift+k`.
    pub fn canonical(&self) -> String {
        let mut parts: Vec<String> = self
            .modifiers
            .iter()
            .map(|m| m.to_spec().to_string())
            .collect();
        parts.push(self.key.to_ascii_lowercase());
        parts.join("+")
    }

    /// Physical key for single-letter shortcuts.
    fn letter_key(&self) -> Option<Key> {
        let mut chars = self.key.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Key::from_letter(c),
            _ => None,
        }
    }
}

impl From<&Chord> for Shortcut {
    fn from(chord: &Chord) -> Self {
        Self {
            key: chord.key.to_spec(),
            modifiers: chord.modifiers.clone(),
        }
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// True when `event` triggers `shortcut`.
///
/// Modifier sets must be equal. Keys compare case-insensitively; a
/// single-letter shortcut also matches on the physical key code so it keeps
/// working under non-Latin layouts.
pub fn matches(event: &KeyEvent, shortcut: &Shortcut) -> bool {
    if event.modifiers() != shortcut.modifiers {
        return false;
    }
    if event.key.eq_ignore_ascii_case(&shortcut.key) {
        return true;
    }
    match (shortcut.letter_key(), event.code) {
        (Some(key), Some(code)) => key.scancode() == code,
        _ => false,
    }
}

/// True when `event` opens the actions menu (`cmd+k`), ignoring auto-repeat.
pub fn is_action_panel_toggle(event: &KeyEvent) -> bool {
    !event.repeat && matches(event, &action_panel_shortcut())
}

/// `cmd+k`.
fn action_panel_shortcut() -> Shortcut {
    Shortcut::new("k", [Modifier::Cmd])
}

/// Result of routing a key event through an [`ActionPanel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelOutcome<T> {
    /// The actions menu should open or close.
    ToggleMenu,
    /// A declared action matched.
    Run(T),
    /// Nothing matched.
    Unhandled,
}

/// Ordered actions with optional shortcuts.
#[derive(Debug, Clone)]
pub struct ActionPanel<T> {
    /// Actions in declaration order.
    entries: Vec<(Option<Shortcut>, T)>,
}

impl<T> Default for ActionPanel<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Clone> ActionPanel<T> {
    /// Create an empty panel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action.
    pub fn push(&mut self, shortcut: Option<Shortcut>, action: T) {
        self.entries.push((shortcut, action));
    }

    /// Number of declared actions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no actions are declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The first declared action, triggered by Enter.
    pub fn primary(&self) -> Option<&T> {
        self.entries.first().map(|(_, a)| a)
    }

    /// Route `event`: the actions-menu chord wins, then the first matching shortcut.
    pub fn dispatch(&self, event: &KeyEvent) -> PanelOutcome<T> {
        if matches(event, &action_panel_shortcut()) {
            return if event.repeat {
                PanelOutcome::Unhandled
            } else {
                PanelOutcome::ToggleMenu
            };
        }
        self.entries
            .iter()
            .find(|(sc, _)| sc.as_ref().is_some_and(|sc| matches(event, sc)))
            .map_or(PanelOutcome::Unhandled, |(_, a)| PanelOutcome::Run(a.clone()))
    }
}
