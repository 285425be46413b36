//! Seams to the native host and in-memory stand-ins for each of them.
//!
//! The runtime never talks to the operating system directly. Menus go out
//! through a [`MenuHost`], file icons come from an [`IconExtractor`], tokens
//! live in a [`TokenStore`], browsers open through a [`UrlOpener`] and deep
//! links arrive on [`DeepLinks`].

use std::{
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use extkit_protocol::{MenuPublish, MsgToHost, ipc::HostTx};
use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, watch},
    time::timeout,
};
use tracing::debug;

use crate::{
    error::{PublishError, SerializationError},
    oauth::StoredToken,
};

/// Produces icons for files that are not directly loadable images.
#[async_trait]
pub trait IconExtractor: Send + Sync {
    /// Return a `data:` URL for the file's icon at `size` pixels, or `None` if it has none.
    async fn resolve_file_icon(
        &self,
        path: &Path,
        size: u32,
    ) -> Result<Option<String>, SerializationError>;
}

/// The native status-menu host.
#[async_trait]
pub trait MenuHost: Send + Sync {
    /// Replace the menu shown for `ext_id`.
    async fn publish(&self, ext_id: &str, menu: MenuPublish) -> Result<(), PublishError>;

    /// Remove the status item for `ext_id`.
    async fn dispose(&self, ext_id: &str) -> Result<(), PublishError>;
}

/// Best-effort persistent token storage keyed by provider.
///
/// Implementations swallow and log their own failures.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read the stored token for `provider`.
    async fn get_token(&self, provider: &str) -> Option<StoredToken>;

    /// Persist `token` for `provider`.
    async fn set_token(&self, provider: &str, token: &StoredToken);

    /// Forget the token for `provider`.
    async fn remove_token(&self, provider: &str);
}

/// Opens URLs in the user's browser.
pub trait UrlOpener: Send + Sync {
    /// Returns false when the URL could not be handed off.
    fn open(&self, url: &str) -> bool;
}

/// Source of deep links addressed to the launcher.
pub trait DeepLinks: Send + Sync {
    /// Start receiving raw callback URLs. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// Icon extractor that knows no icons.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIconExtractor;

#[async_trait]
impl IconExtractor for NullIconExtractor {
    async fn resolve_file_icon(
        &self,
        _path: &Path,
        _size: u32,
    ) -> Result<Option<String>, SerializationError> {
        Ok(None)
    }
}

/// One call received by a [`RecordingMenuHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    /// A menu replacement.
    Publish {
        /// Target instance.
        ext_id: String,
        /// Menu contents.
        menu: MenuPublish,
    },
    /// A status item removal.
    Dispose {
        /// Target instance.
        ext_id: String,
    },
}

/// Menu host that records every call.
#[derive(Debug)]
pub struct RecordingMenuHost {
    /// Every call, oldest first.
    calls: Mutex<Vec<HostCall>>,
    /// Call count, for waiters.
    count: watch::Sender<usize>,
    /// Publishes still to reject.
    failures: AtomicUsize,
}

impl Default for RecordingMenuHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingMenuHost {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            count: watch::channel(0).0,
            failures: AtomicUsize::new(0),
        }
    }

    /// Reject the next `n` publish calls.
    pub fn fail_next_publishes(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// All recorded calls, oldest first. Rejected publishes are not recorded.
    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    /// Menus published for `ext_id`, oldest first.
    pub fn publishes_for(&self, ext_id: &str) -> Vec<MenuPublish> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HostCall::Publish { ext_id: id, menu } if id == ext_id => Some(menu.clone()),
                _ => None,
            })
            .collect()
    }

    /// The most recent menu published for `ext_id`.
    pub fn last_publish(&self, ext_id: &str) -> Option<MenuPublish> {
        self.publishes_for(ext_id).pop()
    }

    /// Wait until at least `n` calls have been recorded.
    pub async fn wait_for_calls(&self, n: usize, within: Duration) -> bool {
        let mut rx = self.count.subscribe();
        timeout(within, rx.wait_for(|c| *c >= n)).await.is_ok()
    }

    /// Append a call and wake waiters.
    fn record(&self, call: HostCall) {
        let len = {
            let mut calls = self.calls.lock();
            calls.push(call);
            calls.len()
        };
        self.count.send_replace(len);
    }
}

#[async_trait]
impl MenuHost for RecordingMenuHost {
    async fn publish(&self, ext_id: &str, menu: MenuPublish) -> Result<(), PublishError> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PublishError::Rejected("host busy".to_string()));
        }
        self.record(HostCall::Publish {
            ext_id: ext_id.to_string(),
            menu,
        });
        Ok(())
    }

    async fn dispose(&self, ext_id: &str) -> Result<(), PublishError> {
        self.record(HostCall::Dispose {
            ext_id: ext_id.to_string(),
        });
        Ok(())
    }
}

/// Menu host that forwards calls over the host message channel.
#[derive(Debug, Clone)]
pub struct ChannelMenuHost {
    /// Connection to the native host.
    tx: HostTx,
}

impl ChannelMenuHost {
    /// Wrap a host channel sender.
    pub fn new(tx: HostTx) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MenuHost for ChannelMenuHost {
    async fn publish(&self, ext_id: &str, menu: MenuPublish) -> Result<(), PublishError> {
        self.tx
            .send(MsgToHost::Publish {
                ext_id: ext_id.to_string(),
                menu,
            })
            .map_err(|_| PublishError::Disconnected)
    }

    async fn dispose(&self, ext_id: &str) -> Result<(), PublishError> {
        self.tx
            .send(MsgToHost::Dispose {
                ext_id: ext_id.to_string(),
            })
            .map_err(|_| PublishError::Disconnected)
    }
}

/// URL opener that records URLs instead of launching a browser.
#[derive(Debug)]
pub struct RecordingUrlOpener {
    /// URLs in the order they were opened.
    opened: Mutex<Vec<String>>,
    /// What `open` reports.
    accept: bool,
}

impl Default for RecordingUrlOpener {
    fn default() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            accept: true,
        }
    }
}

impl RecordingUrlOpener {
    /// An opener whose every attempt fails.
    pub fn refusing() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            accept: false,
        }
    }

    /// URLs handed to the opener so far.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

impl UrlOpener for RecordingUrlOpener {
    fn open(&self, url: &str) -> bool {
        self.opened.lock().push(url.to_string());
        self.accept
    }
}

/// In-process deep-link fan-out.
#[derive(Debug, Clone)]
pub struct DeepLinkBus {
    /// Fan-out; each subscriber gets every link.
    tx: broadcast::Sender<String>,
}

impl Default for DeepLinkBus {
    fn default() -> Self {
        Self::new()
    }
}

impl DeepLinkBus {
    /// Create a bus with room for a small backlog per subscriber.
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(32).0,
        }
    }

    /// Deliver `url` to every subscriber; returns how many received it.
    pub fn deliver(&self, url: &str) -> usize {
        let n = self.tx.send(url.to_string()).unwrap_or(0);
        debug!(subscribers = n, "deep_link_delivered");
        n
    }
}

impl DeepLinks for DeepLinkBus {
    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}
