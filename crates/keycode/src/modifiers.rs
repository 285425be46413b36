//! Shortcut modifiers and their native flag bits.

use std::{collections::BTreeSet, convert::TryFrom};

use serde::{Deserialize, Serialize};

use crate::Key;

/// Modifier keys a shortcut may require.
///
/// Left and right variants of a physical modifier are not distinguished:
/// a shortcut asks for "cmd", not for a specific command key.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    /// Command (⌘).
    #[serde(alias = "command")]
    Cmd,
    /// Option / Alt (⌥).
    #[serde(alias = "option", alias = "alt")]
    Opt,
    /// Control (⌃).
    #[serde(alias = "control")]
    Ctrl,
    /// Shift (⇧).
    Shift,
}

impl From<Modifier> for Key {
    fn from(m: Modifier) -> Self {
        match m {
            Modifier::Cmd => Self::Command,
            Modifier::Opt => Self::Option,
            Modifier::Ctrl => Self::Control,
            Modifier::Shift => Self::Shift,
        }
    }
}

impl TryFrom<Key> for Modifier {
    type Error = ();
    fn try_from(k: Key) -> Result<Self, Self::Error> {
        match k {
            Key::Command | Key::RightCommand => Ok(Self::Cmd),
            Key::Option | Key::RightOption => Ok(Self::Opt),
            Key::Control | Key::RightControl => Ok(Self::Ctrl),
            Key::Shift | Key::RightShift => Ok(Self::Shift),
            _ => Err(()),
        }
    }
}

impl Modifier {
    /// Read a modifier word by way of the key table.
    ///
    /// Accepts the same words as `Key::from_spec` (cmd, command, ctrl, opt,
    /// alt, shift, ...). Non-modifier keys fail.
    pub fn from_spec(s: &str) -> Option<Self> {
        Key::from_spec(s).and_then(|k| Self::try_from(k).ok())
    }

    /// Canonical lowercase spec: `cmd`, `opt`, `ctrl` or `shift`.
    pub fn to_spec(self) -> &'static str {
        match self {
            Self::Cmd => "cmd",
            Self::Opt => "opt",
            Self::Ctrl => "ctrl",
            Self::Shift => "shift",
        }
    }
}

/// Construct a modifier set from the boolean flags carried by a key event.
pub fn modifiers_from_flags(meta: bool, alt: bool, ctrl: bool, shift: bool) -> BTreeSet<Modifier> {
    let mut set = BTreeSet::new();
    if meta {
        set.insert(Modifier::Cmd);
    }
    if alt {
        set.insert(Modifier::Opt);
    }
    if ctrl {
        set.insert(Modifier::Ctrl);
    }
    if shift {
        set.insert(Modifier::Shift);
    }
    set
}
