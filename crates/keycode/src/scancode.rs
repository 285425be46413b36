//! Scancodes: physical, layout-independent key codes.
//!
//! A scancode identifies a key position, not a character. Under a Cyrillic
//! layout the key labelled "K" on a US keyboard still reports `Key::K`'s code
//! while producing "л" as its character, which is what lets letter shortcuts
//! keep working on non-Latin layouts.

use crate::Key;

/// Hardware virtual keycode as reported by the native event source.
pub type Scancode = u16;

impl TryFrom<Scancode> for Key {
    type Error = ();
    fn try_from(value: Scancode) -> Result<Self, Self::Error> {
        Self::from_keycode(value).ok_or(())
    }
}

impl From<Key> for Scancode {
    fn from(k: Key) -> Self {
        k as u16
    }
}

impl Key {
    /// Returns the scancode for this key.
    pub const fn scancode(self) -> Scancode {
        self as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_samples() {
        for k in [Key::A, Key::K, Key::Digit1, Key::Space, Key::Return, Key::F1] {
            let sc = k.scancode();
            assert_eq!(Key::try_from(sc).ok(), Some(k));
            assert_eq!(Scancode::from(k), sc);
        }
        assert!(Key::try_from(0xFFFF).is_err());
    }
}
