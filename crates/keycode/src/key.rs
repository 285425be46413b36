//! The `Key` table and name lookups.

use serde::{Deserialize, Serialize};

/// Declares the `Key` enum together with its name and hardware code lookups.
macro_rules! keys {
    ( $( $variant:ident = $code:literal, )* ) => {
        /// A bindable key, with its hardware virtual keycode as discriminant.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[repr(u16)]
        #[allow(missing_docs)]
        pub enum Key {
            $( $variant = $code, )*
        }

        impl Key {
            /// Variant name, e.g. `"LeftArrow"`.
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => stringify!($variant), )*
                }
            }

            /// Look up a key by hardware code.
            pub fn from_keycode(code: u16) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )*
                    _ => None,
                }
            }

            /// Look up a key by variant name, case-insensitively.
            pub fn from_name(name: &str) -> Option<Self> {
                $(
                    if name.eq_ignore_ascii_case(stringify!($variant)) {
                        return Some(Self::$variant);
                    }
                )*
                None
            }
        }
    };
}

keys! {
    A = 0x00,
    S = 0x01,
    D = 0x02,
    F = 0x03,
    H = 0x04,
    G = 0x05,
    Z = 0x06,
    X = 0x07,
    C = 0x08,
    V = 0x09,
    B = 0x0B,
    Q = 0x0C,
    W = 0x0D,
    E = 0x0E,
    R = 0x0F,
    Y = 0x10,
    T = 0x11,
    Digit1 = 0x12,
    Digit2 = 0x13,
    Digit3 = 0x14,
    Digit4 = 0x15,
    Digit6 = 0x16,
    Digit5 = 0x17,
    Equal = 0x18,
    Digit9 = 0x19,
    Digit7 = 0x1A,
    Minus = 0x1B,
    Digit8 = 0x1C,
    Digit0 = 0x1D,
    RightBracket = 0x1E,
    O = 0x1F,
    U = 0x20,
    LeftBracket = 0x21,
    I = 0x22,
    P = 0x23,
    Return = 0x24,
    L = 0x25,
    J = 0x26,
    Quote = 0x27,
    K = 0x28,
    Semicolon = 0x29,
    Backslash = 0x2A,
    Comma = 0x2B,
    Slash = 0x2C,
    N = 0x2D,
    M = 0x2E,
    Period = 0x2F,
    Tab = 0x30,
    Space = 0x31,
    Grave = 0x32,
    Delete = 0x33,
    Escape = 0x35,
    RightCommand = 0x36,
    Command = 0x37,
    Shift = 0x38,
    CapsLock = 0x39,
    Option = 0x3A,
    Control = 0x3B,
    RightShift = 0x3C,
    RightOption = 0x3D,
    RightControl = 0x3E,
    Function = 0x3F,
    KeypadEnter = 0x4C,
    F5 = 0x60,
    F6 = 0x61,
    F7 = 0x62,
    F3 = 0x63,
    F8 = 0x64,
    F9 = 0x65,
    F11 = 0x67,
    F10 = 0x6D,
    ContextualMenu = 0x6E,
    F12 = 0x6F,
    Home = 0x73,
    PageUp = 0x74,
    ForwardDelete = 0x75,
    F4 = 0x76,
    End = 0x77,
    F2 = 0x78,
    PageDown = 0x79,
    F1 = 0x7A,
    LeftArrow = 0x7B,
    RightArrow = 0x7C,
    DownArrow = 0x7D,
    UpArrow = 0x7E,
}

impl Key {
    /// Returns the key for a single ASCII letter, case-insensitively.
    pub fn from_letter(c: char) -> Option<Self> {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let mut buf = [0u8; 4];
        Self::from_name(c.encode_utf8(&mut buf))
    }

    /// True for the 26 letter keys.
    pub fn is_letter(self) -> bool {
        let name = self.name();
        name.len() == 1 && name.as_bytes()[0].is_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_resolve_by_char() {
        assert_eq!(Key::from_letter('k'), Some(Key::K));
        assert_eq!(Key::from_letter('K'), Some(Key::K));
        assert_eq!(Key::from_letter('1'), None);
        assert_eq!(Key::from_letter('л'), None);
        assert!(Key::K.is_letter());
        assert!(!Key::Tab.is_letter());
        assert!(!Key::F1.is_letter());
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(Key::from_name("leftarrow"), Some(Key::LeftArrow));
        assert_eq!(Key::from_name("TAB"), Some(Key::Tab));
        assert_eq!(Key::from_name("nope"), None);
    }
}
