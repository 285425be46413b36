//! Context scope stack: which extension identity is active right now.
//!
//! Synchronous code pushes an identity with [`ScopeStack::push`] and gets a
//! [`ScopeGuard`] that removes exactly that entry when dropped. Asynchronous
//! work is wrapped with [`ScopeStack::with_identity`], which returns a
//! [`Scoped`] future that enters its identity on every poll and leaves it
//! before returning, so interleaved tasks never observe each other's scope.
//!
//! Frames are kept per OS thread. A guard is tied to the thread that created
//! it and is not `Send`.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    thread::{self, ThreadId},
};

use parking_lot::{Mutex, RwLock};

use crate::{
    identity::ExtensionIdentity,
    token::{AccessTokenRecord, NotAuthenticated, TokenSlot},
};

/// One entered identity.
struct Frame {
    /// Matches the guard that removes this frame.
    id: u64,
    /// Identity active while the frame is on top.
    identity: Arc<ExtensionIdentity>,
}

/// State shared by every clone of a stack.
struct StackInner {
    /// Reported when no frame is active on the calling thread.
    default: RwLock<Arc<ExtensionIdentity>>,
    /// Per-thread frames, innermost last.
    frames: Mutex<HashMap<ThreadId, Vec<Frame>>>,
    /// Next frame id.
    next_id: AtomicU64,
    /// The session's token holder.
    tokens: TokenSlot,
}

/// Tracks the active extension identity and the session's token holder.
///
/// Clones share state.
#[derive(Clone)]
pub struct ScopeStack {
    /// Shared by clones.
    inner: Arc<StackInner>,
}

impl fmt::Debug for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeStack")
            .field("current", &self.current().instance_id())
            .field("depth", &self.depth())
            .finish()
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new(ExtensionIdentity::host_default())
    }
}

impl ScopeStack {
    /// Create a stack that reports `default` when nothing is pushed.
    pub fn new(default: ExtensionIdentity) -> Self {
        Self::with_tokens(default, TokenSlot::new())
    }

    /// Create a stack around an existing token holder.
    pub fn with_tokens(default: ExtensionIdentity, tokens: TokenSlot) -> Self {
        Self {
            inner: Arc::new(StackInner {
                default: RwLock::new(Arc::new(default)),
                frames: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                tokens,
            }),
        }
    }

    /// Replace the host default identity.
    pub fn set_default(&self, identity: ExtensionIdentity) {
        *self.inner.default.write() = Arc::new(identity);
    }

    /// Activate a private copy of `identity` on this thread.
    pub fn push(&self, identity: &ExtensionIdentity) -> ScopeGuard {
        self.enter(Arc::new(identity.clone()))
    }

    /// Activate an already-copied identity on this thread.
    pub(crate) fn enter(&self, identity: Arc<ExtensionIdentity>) -> ScopeGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let thread = thread::current().id();
        self.inner
            .frames
            .lock()
            .entry(thread)
            .or_default()
            .push(Frame { id, identity });
        ScopeGuard {
            stack: self.inner.clone(),
            thread,
            id,
            _not_send: PhantomData,
        }
    }

    /// The identity active on this thread, or the host default.
    pub fn current(&self) -> Arc<ExtensionIdentity> {
        let thread = thread::current().id();
        let frames = self.inner.frames.lock();
        match frames.get(&thread).and_then(|v| v.last()) {
            Some(frame) => frame.identity.clone(),
            None => self.inner.default.read().clone(),
        }
    }

    /// Number of entries active on this thread.
    pub fn depth(&self) -> usize {
        let thread = thread::current().id();
        self.inner.frames.lock().get(&thread).map_or(0, Vec::len)
    }

    /// Run `f` with `identity` active.
    pub fn scope<R>(&self, identity: &ExtensionIdentity, f: impl FnOnce() -> R) -> R {
        let _guard = self.push(identity);
        f()
    }

    /// Wrap `fut` so that every poll runs with `identity` active.
    pub fn with_identity<F>(&self, identity: &ExtensionIdentity, fut: F) -> Scoped<F>
    where
        F: Future,
    {
        self.with_shared(Arc::new(identity.clone()), fut)
    }

    /// [`with_identity`](Self::with_identity) for an identity that is already a private copy.
    pub(crate) fn with_shared<F>(&self, identity: Arc<ExtensionIdentity>, fut: F) -> Scoped<F>
    where
        F: Future,
    {
        Scoped {
            stack: self.clone(),
            identity,
            inner: Box::pin(fut),
        }
    }

    /// The session's token holder.
    pub fn tokens(&self) -> &TokenSlot {
        &self.inner.tokens
    }

    /// The active access token, if authorization has completed.
    pub fn get_access_token(&self) -> Result<AccessTokenRecord, NotAuthenticated> {
        self.inner.tokens.get()
    }
}

/// Removes one specific entry from the stack when dropped.
#[must_use = "the scope ends when the guard is dropped"]
pub struct ScopeGuard {
    /// Stack the frame was pushed on.
    stack: Arc<StackInner>,
    /// Thread whose frames hold it.
    thread: ThreadId,
    /// The frame to remove.
    id: u64,
    /// Frames are per thread, so the guard must drop where it was made.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let mut frames = self.stack.frames.lock();
        if let Some(entries) = frames.get_mut(&self.thread) {
            if let Some(pos) = entries.iter().rposition(|f| f.id == self.id) {
                entries.remove(pos);
            }
            if entries.is_empty() {
                frames.remove(&self.thread);
            }
        }
    }
}

/// Future returned by [`ScopeStack::with_identity`].
pub struct Scoped<F> {
    /// Stack entered around each poll.
    stack: ScopeStack,
    /// Identity the future runs under.
    identity: Arc<ExtensionIdentity>,
    /// The wrapped future.
    inner: Pin<Box<F>>,
}

impl<F> Future for Scoped<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _guard = this.stack.enter(this.identity.clone());
        this.inner.as_mut().poll(cx)
    }
}
