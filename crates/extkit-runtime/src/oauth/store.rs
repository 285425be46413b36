//! Persisted tokens and the stores that keep them.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::host::TokenStore;

/// A token as written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    /// Bearer value.
    pub access_token: String,
    /// Token type reported by the provider, usually `Bearer`.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    /// Refresh token, if issued.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds from `obtained_at`.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Unix timestamp (seconds) when the token was received.
    pub obtained_at: u64,
}

/// Token type when the provider omits one.
fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

impl StoredToken {
    /// A bearer token obtained now with no expiry.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            scope: None,
            refresh_token: None,
            expires_in: None,
            obtained_at: unix_now(),
        }
    }

    /// True once `now` is at or past the expiry instant.
    pub fn is_expired_at(&self, now: u64) -> bool {
        match self.expires_in {
            Some(secs) => self.obtained_at.saturating_add(secs) <= now,
            None => false,
        }
    }

    /// [`is_expired_at`](Self::is_expired_at) against the wall clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }
}

/// Token store held in memory.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    /// Tokens by provider key.
    tokens: Mutex<HashMap<String, StoredToken>>,
    /// `get_token` calls so far.
    reads: AtomicUsize,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert directly, bypassing the async interface.
    pub fn insert(&self, provider: &str, token: StoredToken) {
        self.tokens.lock().insert(provider.to_string(), token);
    }

    /// Number of `get_token` calls served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get_token(&self, provider: &str) -> Option<StoredToken> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().get(provider).cloned()
    }

    async fn set_token(&self, provider: &str, token: &StoredToken) {
        self.insert(provider, token.clone());
    }

    async fn remove_token(&self, provider: &str) {
        self.tokens.lock().remove(provider);
    }
}

/// Token store backed by a JSON file mapping provider keys to tokens.
#[derive(Debug)]
pub struct FileTokenStore {
    /// JSON file, replaced whole on each write.
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: AsyncMutex<()>,
}

impl FileTokenStore {
    /// Store tokens in `path`; the file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: AsyncMutex::new(()),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored token; a missing file is empty.
    async fn read_all(&self) -> io::Result<BTreeMap<String, StoredToken>> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(io::Error::other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e),
        }
    }

    /// Write through a temporary file and rename over the old one.
    async fn write_all(&self, tokens: &BTreeMap<String, StoredToken>) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec_pretty(tokens).map_err(io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &self.path).await
    }

    /// Set or, with `None`, remove one provider's token.
    async fn update(&self, provider: &str, token: Option<&StoredToken>) -> io::Result<()> {
        let _lock = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        match token {
            Some(t) => {
                all.insert(provider.to_string(), t.clone());
            }
            None => {
                all.remove(provider);
            }
        }
        self.write_all(&all).await
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get_token(&self, provider: &str) -> Option<StoredToken> {
        match self.read_all().await {
            Ok(mut all) => all.remove(provider),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token_store_read_failed");
                None
            }
        }
    }

    async fn set_token(&self, provider: &str, token: &StoredToken) {
        match self.update(provider, Some(token)).await {
            Ok(()) => debug!(provider, "token_stored"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "token_store_write_failed"),
        }
    }

    async fn remove_token(&self, provider: &str) {
        if let Err(e) = self.update(provider, None).await {
            warn!(path = %self.path.display(), error = %e, "token_store_remove_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_relative_to_obtained_at() {
        let mut t = StoredToken::new("abc");
        t.obtained_at = 1_000;
        assert!(!t.is_expired_at(5_000));
        t.expires_in = Some(3_600);
        assert!(!t.is_expired_at(4_599));
        assert!(t.is_expired_at(4_600));
    }

    #[test]
    fn token_type_defaults_to_bearer() {
        let t: StoredToken =
            serde_json::from_str(r#"{"access_token":"x","obtained_at":1}"#).unwrap();
        assert_eq!(t.token_type, "Bearer");
        assert_eq!(t.scope, None);
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.get_token("github").await, None);
        store.set_token("github", &StoredToken::new("t1")).await;
        assert_eq!(
            store.get_token("github").await.map(|t| t.access_token),
            Some("t1".to_string())
        );
        store.remove_token("github").await;
        assert_eq!(store.get_token("github").await, None);
        assert_eq!(store.reads(), 3);
    }

    #[tokio::test]
    async fn file_store_persists_per_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.json");
        let store = FileTokenStore::new(&path);

        store.set_token("github", &StoredToken::new("gh")).await;
        store.set_token("linear", &StoredToken::new("ln")).await;

        let reopened = FileTokenStore::new(&path);
        assert_eq!(
            reopened.get_token("github").await.map(|t| t.access_token),
            Some("gh".to_string())
        );
        reopened.remove_token("github").await;
        assert_eq!(store.get_token("github").await, None);
        assert!(store.get_token("linear").await.is_some());
    }

    #[tokio::test]
    async fn unreadable_file_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileTokenStore::new(&path);
        assert_eq!(store.get_token("github").await, None);
        // Writes fail too because the existing file cannot be parsed.
        store.set_token("github", &StoredToken::new("x")).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
    }
}
