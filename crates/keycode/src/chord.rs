//! Shortcut chords: parsing and display of `mod+mod+key` strings.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Key, Modifier};

/// A shortcut as written by an extension: zero or more modifiers and one key.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Chord {
    /// Held modifiers. Ordered, so equal chords compare equal.
    pub modifiers: BTreeSet<Modifier>,
    /// The key that triggers the shortcut. Never a modifier.
    pub key: Key,
}

impl Chord {
    /// Build a chord from parts.
    pub fn new(key: Key, modifiers: impl IntoIterator<Item = Modifier>) -> Self {
        Self {
            modifiers: modifiers.into_iter().collect(),
            key,
        }
    }

    /// Parse `"cmd+shift+k"` style text.
    ///
    /// Words are case-insensitive and joined by `+`. The final word names the
    /// key and may be a bare symbol such as `,` or `1`; a lone space also
    /// counts as the space key. Empty words, unknown words and a modifier in
    /// key position all fail.
    pub fn parse(s: &str) -> Option<Self> {
        let (mods, key_word) = match s.rsplit_once('+') {
            Some((mods, key)) => (Some(mods), key),
            None => (None, s),
        };
        let key = match key_word {
            " " => Key::Space,
            word => Key::from_spec(word.trim())?,
        };
        if Modifier::try_from(key).is_ok() {
            return None;
        }
        let modifiers = mods
            .into_iter()
            .flat_map(|m| m.split('+'))
            .map(|word| match word.trim() {
                "" => None,
                word => Modifier::from_spec(word),
            })
            .collect::<Option<BTreeSet<_>>>()?;
        Some(Self { modifiers, key })
    }

    /// Canonical text: modifiers as cmd, opt, ctrl, shift, then the key.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.modifiers {
            write!(f, "{}+", m.to_spec())?;
        }
        f.write_str(&self.key.to_spec())
    }
}

impl FromStr for Chord {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid chord string: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifiers_render_in_fixed_order() {
        let chord = Chord::parse("Shift+CMD+k").unwrap();
        assert_eq!(chord.key, Key::K);
        assert_eq!(
            chord.modifiers,
            BTreeSet::from([Modifier::Cmd, Modifier::Shift])
        );
        assert_eq!(chord.canonical(), "cmd+shift+k");
    }

    #[test]
    fn symbols_in_key_position() {
        assert_eq!(Chord::parse("cmd+1").unwrap().key, Key::Digit1);
        let comma = Chord::parse("ctrl+, ").unwrap();
        assert_eq!(comma.key, Key::Comma);
        assert_eq!(comma.to_string(), "ctrl+,");
        assert_eq!(Chord::parse("return").unwrap().modifiers.len(), 0);
    }

    #[test]
    fn malformed_specs_fail() {
        for bad in ["", "cmd++k", "+k", "cmd+shift", "hyper+k", "cmd+"] {
            assert!(Chord::parse(bad).is_none(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn canonical_text_reparses_to_the_same_chord() {
        for s in ["opt+shift+k", "CTRL+ALT+Space", "Command+Digit1", "cmd+pgdn"] {
            let chord = Chord::parse(s).unwrap();
            assert_eq!(Chord::parse(&chord.canonical()), Some(chord), "{s}");
        }
    }
}
