//! The session's single active access token.

use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Obtained through a sign-in flow.
    OAuth,
    /// Supplied directly by the user.
    Personal,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OAuth => "oauth",
            Self::Personal => "personal",
        })
    }
}

/// The token extension code sees through `get_access_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    /// Bearer token value.
    pub token: String,
    /// Origin of the token.
    pub kind: TokenKind,
}

/// Returned when no authorization has completed in this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("not authenticated: no access token is available")]
pub struct NotAuthenticated;

/// Shared holder for the session's access token.
///
/// Clones share the same slot. The slot is filled only after a successful
/// authorization and emptied on sign-out.
#[derive(Clone, Default)]
pub struct TokenSlot {
    /// Empty until authorized.
    inner: Arc<RwLock<Option<AccessTokenRecord>>>,
}

impl fmt::Debug for TokenSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSlot")
            .field("set", &self.inner.read().is_some())
            .finish()
    }
}

impl TokenSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `token` as the active record.
    pub fn set(&self, token: impl Into<String>, kind: TokenKind) {
        *self.inner.write() = Some(AccessTokenRecord {
            token: token.into(),
            kind,
        });
    }

    /// Read the active record.
    pub fn get(&self) -> Result<AccessTokenRecord, NotAuthenticated> {
        self.inner.read().clone().ok_or(NotAuthenticated)
    }

    /// True when a record is present.
    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Drop the active record.
    pub fn reset(&self) {
        *self.inner.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slot_is_not_authenticated() {
        let slot = TokenSlot::new();
        assert_eq!(slot.get(), Err(NotAuthenticated));
        assert!(!slot.is_set());
    }

    #[test]
    fn clones_share_state() {
        let slot = TokenSlot::new();
        let other = slot.clone();
        slot.set("t1", TokenKind::OAuth);
        assert_eq!(
            other.get(),
            Ok(AccessTokenRecord {
                token: "t1".into(),
                kind: TokenKind::OAuth
            })
        );
        other.reset();
        assert!(!slot.is_set());
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(TokenKind::OAuth.to_string(), "oauth");
        assert_eq!(
            serde_json::to_string(&TokenKind::Personal).unwrap(),
            "\"personal\""
        );
    }
}
