//! keycode: Key identifiers, modifiers and chords for extension shortcuts.
//!
//! - `Key`: Enum of the keys an extension can bind, carrying the physical
//!   (layout-independent) hardware code as its discriminant.
//! - `Modifier`: The four shortcut modifiers (cmd, opt, ctrl, shift).
//! - `Chord`: A modifier set plus a key, parsed from specs like `"cmd+shift+k"`.
//!
//! Hardware codes follow the macOS virtual keycode table (`kVK_*`), which is
//! what the launcher's native event source reports alongside the produced
//! character.

mod key;
pub use key::Key;

mod spec;

mod modifiers;
pub use modifiers::{Modifier, modifiers_from_flags};

mod chord;
pub use chord::Chord;

mod scancode;
pub use scancode::Scancode;
