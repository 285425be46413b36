//! Extension identities: who an instance is and what it is configured with.

use std::{path::PathBuf, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IdentityError;

/// Preference values keyed by preference name.
pub type Preferences = Map<String, Value>;

/// Lowercase names: letters, digits, `.`, `_` and `-`, not starting with punctuation.
static NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").ok());

/// How a command presents itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CommandMode {
    /// Foreground command with its own view.
    #[default]
    View,
    /// Runs once without UI.
    NoView,
    /// Projects its state into a native status menu.
    MenuBar,
}

/// The configuration an extension instance runs under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionIdentity {
    /// Package name of the extension.
    pub extension_name: String,
    /// Human-readable title.
    pub display_name: String,
    /// Command within the extension.
    pub command_name: String,
    /// Directory holding the extension's bundled assets.
    pub assets_path: PathBuf,
    /// Writable per-extension support directory.
    pub support_path: PathBuf,
    /// Publisher of the extension.
    pub owner: String,
    /// Resolved preference values.
    #[serde(default)]
    pub preferences: Preferences,
    /// Presentation mode of the command.
    #[serde(default)]
    pub command_mode: CommandMode,
}

impl ExtensionIdentity {
    /// Build an identity with validated names and empty everything else.
    pub fn new(extension_name: &str, command_name: &str) -> Result<Self, IdentityError> {
        validate_name("extension_name", extension_name)?;
        validate_name("command_name", command_name)?;
        Ok(Self {
            extension_name: extension_name.to_string(),
            display_name: extension_name.to_string(),
            command_name: command_name.to_string(),
            assets_path: PathBuf::new(),
            support_path: PathBuf::new(),
            owner: String::new(),
            preferences: Preferences::new(),
            command_mode: CommandMode::default(),
        })
    }

    /// Identity reported when nothing has been activated.
    pub fn host_default() -> Self {
        Self {
            extension_name: "host".to_string(),
            display_name: "Host".to_string(),
            command_name: "default".to_string(),
            assets_path: PathBuf::new(),
            support_path: PathBuf::new(),
            owner: String::new(),
            preferences: Preferences::new(),
            command_mode: CommandMode::NoView,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Set the presentation mode.
    pub fn with_mode(mut self, mode: CommandMode) -> Self {
        self.command_mode = mode;
        self
    }

    /// Set the assets and support directories.
    pub fn with_paths(mut self, assets: impl Into<PathBuf>, support: impl Into<PathBuf>) -> Self {
        self.assets_path = assets.into();
        self.support_path = support.into();
        self
    }

    /// Set the owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Replace preferences.
    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Stable instance id: `extension.command`.
    pub fn instance_id(&self) -> String {
        format!("{}.{}", self.extension_name, self.command_name)
    }

    /// Check names after deserialization.
    pub fn validate(&self) -> Result<(), IdentityError> {
        validate_name("extension_name", &self.extension_name)?;
        validate_name("command_name", &self.command_name)
    }
}

/// Reject names `NAME_RE` does not match.
fn validate_name(field: &'static str, value: &str) -> Result<(), IdentityError> {
    if NAME_RE.as_ref().is_some_and(|re| re.is_match(value)) {
        Ok(())
    } else {
        Err(IdentityError {
            field,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn names_are_validated() {
        assert!(ExtensionIdentity::new("github", "notifications").is_ok());
        assert!(ExtensionIdentity::new("my-ext.v2", "run_now").is_ok());

        let err = ExtensionIdentity::new("GitHub", "x").unwrap_err();
        assert_eq!(err.field, "extension_name");
        let err = ExtensionIdentity::new("ok", "-leading").unwrap_err();
        assert_eq!(err.field, "command_name");
        assert!(ExtensionIdentity::new("", "x").is_err());
    }

    #[test]
    fn mode_uses_kebab_case() {
        let v = serde_json::to_value(CommandMode::MenuBar).unwrap();
        assert_eq!(v, json!("menu-bar"));
        let m: CommandMode = serde_json::from_value(json!("no-view")).unwrap();
        assert_eq!(m, CommandMode::NoView);
    }

    #[test]
    fn instance_id_joins_names() {
        let id = ExtensionIdentity::new("github", "unread").unwrap();
        assert_eq!(id.instance_id(), "github.unread");
    }
}
