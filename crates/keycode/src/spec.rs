//! Key words as they appear in shortcut strings.

use crate::Key;

/// Keys whose shortcut word is the character they type.
const SYMBOLS: &[(Key, &str)] = &[
    (Key::Digit0, "0"),
    (Key::Digit1, "1"),
    (Key::Digit2, "2"),
    (Key::Digit3, "3"),
    (Key::Digit4, "4"),
    (Key::Digit5, "5"),
    (Key::Digit6, "6"),
    (Key::Digit7, "7"),
    (Key::Digit8, "8"),
    (Key::Digit9, "9"),
    (Key::Space, " "),
    (Key::Minus, "-"),
    (Key::Equal, "="),
    (Key::LeftBracket, "["),
    (Key::RightBracket, "]"),
    (Key::Backslash, "\\"),
    (Key::Semicolon, ";"),
    (Key::Quote, "'"),
    (Key::Comma, ","),
    (Key::Period, "."),
    (Key::Slash, "/"),
    (Key::Grave, "`"),
];

/// Extra lowercase words read as keys. Never produced when rendering.
const ALIASES: &[(Key, &str)] = &[
    (Key::Command, "cmd"),
    (Key::Command, "meta"),
    (Key::Control, "ctrl"),
    (Key::Option, "opt"),
    (Key::Option, "alt"),
    (Key::CapsLock, "caps"),
    (Key::Function, "fn"),
    (Key::Return, "enter"),
    (Key::Return, "ret"),
    (Key::ForwardDelete, "del"),
    (Key::Delete, "backspace"),
    (Key::Escape, "esc"),
    (Key::Space, "space"),
    (Key::LeftArrow, "left"),
    (Key::RightArrow, "right"),
    (Key::UpArrow, "up"),
    (Key::DownArrow, "down"),
    (Key::PageUp, "pgup"),
    (Key::PageDown, "pgdn"),
    (Key::ContextualMenu, "menu"),
    (Key::KeypadEnter, "kpenter"),
];

/// Key for `word` in a word table.
fn lookup(table: &[(Key, &str)], word: &str) -> Option<Key> {
    table.iter().find(|(_, w)| *w == word).map(|(k, _)| *k)
}

/// Variant name, then symbol, then alias.
fn parse(word: &str) -> Option<Key> {
    Key::from_name(word)
        .or_else(|| lookup(SYMBOLS, word))
        .or_else(|| lookup(ALIASES, &word.to_ascii_lowercase()))
}

/// Symbol if the key has one, else its lowercased name.
fn render(key: Key) -> String {
    match SYMBOLS.iter().find(|(k, _)| *k == key) {
        Some((_, sym)) => (*sym).to_string(),
        None => key.name().to_ascii_lowercase(),
    }
}

impl Key {
    /// Read a key word from a shortcut string.
    ///
    /// Variant names match in any case (`PageDown`, `digit1`). Digits, space
    /// and punctuation may be written as the character itself. Short forms
    /// like `esc`, `enter`, `cmd` or `pgdn` are accepted too.
    pub fn from_spec(s: &str) -> Option<Self> {
        parse(s)
    }

    /// The word [`from_spec`](Self::from_spec) reads back: the symbol for
    /// digits and punctuation, else the lowercased variant name.
    pub fn to_spec(self) -> String {
        render(self)
    }
}
