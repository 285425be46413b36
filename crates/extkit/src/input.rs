//! Line commands read from stdin while a bundle is mounted.
//!
//! Each line stands in for something the native host would send:
//!
//! ```text
//! click item:open            pick an entry of the mounted instance
//! click other.cmd item:open  pick an entry of a named instance
//! key cmd+shift+c            press a chord in a view command
//! enter                      run a view's primary action
//! link extkit://oauth?...    deliver a deep link
//! pref team=core             update a preference (JSON value or bare string)
//! quit
//! ```

use extkit_protocol::MsgFromHost;
use extkit_runtime::KeyEvent;
use keycode::Chord;
use serde_json::Value;
use thiserror::Error;

/// A parsed stdin line.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    /// Menu pick.
    Click {
        /// Target instance; the mounted one when absent.
        ext_id: Option<String>,
        /// Published dispatch id.
        item_id: String,
    },
    /// Key press routed through a view's action panel.
    Key(KeyEvent),
    /// Enter in a view.
    Enter,
    /// Deep link.
    Link(String),
    /// Preference update.
    Pref {
        /// Preference name.
        key: String,
        /// New value.
        value: Value,
    },
    /// Stop the host.
    Quit,
}

/// A stdin line that could not be understood.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    /// First word is not a command.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    /// A command is missing its argument.
    #[error("{0} needs an argument")]
    MissingArgument(&'static str),
    /// The chord after `key` does not parse.
    #[error("invalid chord {0:?}")]
    InvalidChord(String),
    /// `pref` without `=`.
    #[error("expected key=value, got {0:?}")]
    InvalidPref(String),
}

/// Parse one line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<HostCommand>, InputError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(w, r)| (w, r.trim()));

    let cmd = match word {
        "click" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(item), None) => HostCommand::Click {
                    ext_id: None,
                    item_id: item.to_string(),
                },
                (Some(ext), Some(item)) => HostCommand::Click {
                    ext_id: Some(ext.to_string()),
                    item_id: item.to_string(),
                },
                _ => return Err(InputError::MissingArgument("click")),
            }
        }
        "key" => {
            if rest.is_empty() {
                return Err(InputError::MissingArgument("key"));
            }
            let chord =
                Chord::parse(rest).ok_or_else(|| InputError::InvalidChord(rest.to_string()))?;
            HostCommand::Key(KeyEvent::from_chord(&chord))
        }
        "enter" => HostCommand::Enter,
        "link" => {
            if rest.is_empty() {
                return Err(InputError::MissingArgument("link"));
            }
            HostCommand::Link(rest.to_string())
        }
        "pref" => {
            let (key, value) = parse_pref(rest)?;
            HostCommand::Pref { key, value }
        }
        "quit" | "exit" => HostCommand::Quit,
        other => return Err(InputError::UnknownCommand(other.to_string())),
    };
    Ok(Some(cmd))
}

/// Parse `key=value`. The value is read as JSON, falling back to a bare string.
pub fn parse_pref(spec: &str) -> Result<(String, Value), InputError> {
    let (key, raw) = spec
        .split_once('=')
        .ok_or_else(|| InputError::InvalidPref(spec.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(InputError::InvalidPref(spec.to_string()));
    }
    let raw = raw.trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

impl HostCommand {
    /// The wire message the native host would have sent, if this command has one.
    pub fn to_host_msg(&self, default_ext: &str) -> Option<MsgFromHost> {
        match self {
            Self::Click { ext_id, item_id } => Some(MsgFromHost::MenuAction {
                ext_id: ext_id.clone().unwrap_or_else(|| default_ext.to_string()),
                item_id: item_id.clone(),
            }),
            Self::Link(url) => Some(MsgFromHost::DeepLink { url: url.clone() }),
            Self::Key(_) | Self::Enter | Self::Pref { .. } | Self::Quit => None,
        }
    }
}
