//! The sign-in state machine for one provider.

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use futures::future;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    callback::{Callback, CallbackPayload},
    pkce::PkcePair,
    store::StoredToken,
};
use crate::{
    config::OAuthConfig,
    error::AuthorizationError,
    host::{DeepLinks, TokenStore, UrlOpener},
    token::{AccessTokenRecord, TokenKind, TokenSlot},
};

/// Static description of an OAuth provider an extension signs in with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Key used for callback routing and token storage.
    pub provider_key: String,
    /// OAuth client id.
    pub client_id: String,
    /// Provider's authorization endpoint.
    pub authorization_url: String,
    /// Deep link the provider redirects back to.
    pub redirect_uri: String,
    /// Requested scopes.
    #[serde(default)]
    pub scope: Option<String>,
    /// A token the user supplied directly, bypassing sign-in.
    #[serde(default)]
    pub personal_token: Option<String>,
}

/// Exchanges an authorization code for a token.
#[async_trait]
pub trait CodeExchange: Send + Sync {
    /// Redeem `code`, proving possession of `verifier`.
    async fn exchange(
        &self,
        provider: &ProviderConfig,
        code: &str,
        verifier: &str,
    ) -> Result<StoredToken, AuthorizationError>;
}

/// Observable sign-in state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No token and no flow running.
    Unauthorized,
    /// About to hand off to the browser.
    AwaitingExternalBrowser,
    /// Browser opened; waiting for a callback or a stored token.
    PendingCallback,
    /// A token is in the session slot.
    Authorized,
    /// The last flow failed; carries a human-readable hint.
    Error(String),
}

impl AuthState {
    /// A browser hand-off is under way.
    fn in_flight(&self) -> bool {
        matches!(self, Self::AwaitingExternalBrowser | Self::PendingCallback)
    }
}

/// What happened to a delivered callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Not addressed to this session or no flow was waiting.
    Ignored,
    /// The callback completed sign-in.
    Authorized,
    /// The callback ended the flow in an error.
    Failed(AuthorizationError),
}

/// Drives sign-in for a single provider.
///
/// Session state lives only in memory and is rebuilt from the token store at
/// the start of every [`authorize`](Self::authorize) call.
pub struct OAuthSession {
    /// Provider signed in with.
    provider: ProviderConfig,
    /// Store poll interval, attempts and timeout.
    poll: OAuthConfig,
    /// Persistent tokens.
    store: Arc<dyn TokenStore>,
    /// Browser hand-off.
    opener: Arc<dyn UrlOpener>,
    /// Callback source while a flow waits.
    links: Option<Arc<dyn DeepLinks>>,
    /// Code redemption; without it a code is kept as the token.
    exchange: Option<Arc<dyn CodeExchange>>,
    /// Where an obtained token goes.
    tokens: TokenSlot,
    /// Current state, observable.
    state: watch::Sender<AuthState>,
    /// PKCE pair of the flow awaiting a callback.
    pending: Mutex<Option<PkcePair>>,
    /// Parent of every flow; cancelled by the owner or on drop.
    root: CancellationToken,
    /// The current flow's token.
    flow: Mutex<CancellationToken>,
}

impl fmt::Debug for OAuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSession")
            .field("provider", &self.provider.provider_key)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Drop for OAuthSession {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl OAuthSession {
    /// Create a session that stores its result in `tokens`.
    pub fn new(
        provider: ProviderConfig,
        store: Arc<dyn TokenStore>,
        opener: Arc<dyn UrlOpener>,
        tokens: TokenSlot,
    ) -> Self {
        let root = CancellationToken::new();
        let flow = root.child_token();
        Self {
            provider,
            poll: OAuthConfig::default(),
            store,
            opener,
            links: None,
            exchange: None,
            tokens,
            state: watch::channel(AuthState::Unauthorized).0,
            pending: Mutex::new(None),
            root,
            flow: Mutex::new(flow),
        }
    }

    /// End every flow of this session when `owner` is cancelled.
    pub fn with_owner(mut self, owner: &CancellationToken) -> Self {
        self.root = owner.child_token();
        *self.flow.get_mut() = self.root.child_token();
        self
    }

    /// True once the owner has gone; later flows end immediately.
    pub fn is_closed(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Use these poll bounds.
    pub fn with_poll(mut self, poll: OAuthConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Listen for callbacks on `links` while a flow is pending.
    pub fn with_deep_links(mut self, links: Arc<dyn DeepLinks>) -> Self {
        self.links = Some(links);
        self
    }

    /// Redeem authorization codes through `exchange` instead of storing them as tokens.
    pub fn with_exchange(mut self, exchange: Arc<dyn CodeExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Provider this session signs in with.
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Current state.
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Build the authorization URL for one attempt.
    pub fn authorization_url(&self, pkce: &PkcePair) -> Result<Url, AuthorizationError> {
        let mut url = Url::parse(&self.provider.authorization_url).map_err(|e| {
            AuthorizationError::InvalidAuthorizationUrl(format!(
                "{}: {}",
                self.provider.authorization_url, e
            ))
        })?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("response_type", "code")
                .append_pair("client_id", &self.provider.client_id)
                .append_pair("redirect_uri", &self.provider.redirect_uri)
                .append_pair("state", &pkce.state)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", "S256");
            if let Some(scope) = &self.provider.scope {
                q.append_pair("scope", scope);
            }
        }
        Ok(url)
    }

    /// Run a complete interactive sign-in and return the state it ended in.
    ///
    /// A valid stored token short-circuits the flow. Otherwise the browser is
    /// opened and the flow waits for a callback, polling the token store as a
    /// backstop until the attempt budget or the timeout runs out.
    pub async fn authorize(&self) -> AuthState {
        let cancel = self.begin_flow();
        self.transition(AuthState::Unauthorized);
        if self.is_closed() {
            debug!(provider = %self.provider.provider_key, "session_closed");
            return AuthState::Unauthorized;
        }

        if self.try_stored_token().await {
            return AuthState::Authorized;
        }

        let pkce = PkcePair::generate();
        let url = match self.authorization_url(&pkce) {
            Ok(url) => url,
            Err(e) => return self.fail(e),
        };
        *self.pending.lock() = Some(pkce);
        self.transition(AuthState::AwaitingExternalBrowser);

        // Subscribe before opening so a fast callback is not missed.
        let links = self.links.as_ref().map(|l| l.subscribe());
        if !self.opener.open(url.as_str()) {
            return self.fail(AuthorizationError::BrowserUnavailable);
        }
        self.transition(AuthState::PendingCallback);

        self.wait_for_completion(&cancel, links).await
    }

    /// Feed a deep-link URL to the session.
    pub async fn handle_callback(&self, raw: &str) -> CallbackOutcome {
        let cb = match Callback::parse(raw) {
            Ok(cb) => cb,
            Err(e) => {
                debug!(error = %e, "deep_link_not_a_callback");
                return CallbackOutcome::Ignored;
            }
        };
        let Some(pkce) = self.pending.lock().clone() else {
            debug!(provider = %self.provider.provider_key, "callback_without_pending_flow");
            return CallbackOutcome::Ignored;
        };
        match cb.provider.as_deref() {
            Some(key) if key == self.provider.provider_key => {}
            None if cb.state.as_deref() == Some(pkce.state.as_str()) => {}
            other => {
                debug!(target_provider = ?other, "callback_for_other_provider");
                return CallbackOutcome::Ignored;
            }
        }
        let problem = match cb.state.as_deref() {
            None => Some("missing state"),
            Some(state) if state != pkce.state => Some("state mismatch"),
            Some(_) => None,
        };
        if let Some(problem) = problem {
            let err = AuthorizationError::MalformedCallback(problem.to_string());
            self.fail(err.clone());
            return CallbackOutcome::Failed(err);
        }

        let token = match cb.payload {
            Err(e) => {
                self.fail(e.clone());
                return CallbackOutcome::Failed(e);
            }
            Ok(CallbackPayload::Error(message)) => {
                let err = AuthorizationError::Provider(message);
                self.fail(err.clone());
                return CallbackOutcome::Failed(err);
            }
            Ok(CallbackPayload::Token(token)) => token,
            Ok(CallbackPayload::Code(code)) => match &self.exchange {
                Some(exchange) => {
                    match exchange.exchange(&self.provider, &code, &pkce.verifier).await {
                        Ok(token) => token,
                        Err(e) => {
                            self.fail(e.clone());
                            return CallbackOutcome::Failed(e);
                        }
                    }
                }
                None => StoredToken::new(code),
            },
        };

        // The flow may have ended while the exchange was in progress.
        if self.pending.lock().as_ref() != Some(&pkce) {
            return CallbackOutcome::Ignored;
        }
        self.store
            .set_token(&self.provider.provider_key, &token)
            .await;
        self.complete(&token);
        CallbackOutcome::Authorized
    }

    /// Abort a running flow and return to `Unauthorized`.
    pub fn cancel(&self) {
        self.flow.lock().cancel();
        if self.pending.lock().take().is_some() || self.state.borrow().in_flight() {
            self.transition(AuthState::Unauthorized);
        }
    }

    /// Forget the token in the session slot and in storage.
    pub async fn sign_out(&self) {
        self.cancel();
        self.tokens.reset();
        self.store.remove_token(&self.provider.provider_key).await;
        self.transition(AuthState::Unauthorized);
        info!(provider = %self.provider.provider_key, "signed_out");
    }

    /// Headless sign-in: return a token or the reason there is none.
    ///
    /// A personal token wins over any stored or interactive one.
    pub async fn obtain_token(&self) -> Result<AccessTokenRecord, AuthorizationError> {
        if let Some(token) = self.provider.personal_token.as_deref() {
            self.tokens.set(token, TokenKind::Personal);
            self.transition(AuthState::Authorized);
            return self
                .tokens
                .get()
                .map_err(|e| AuthorizationError::Failed(e.to_string()));
        }
        match self.authorize().await {
            AuthState::Authorized => self
                .tokens
                .get()
                .map_err(|e| AuthorizationError::Failed(e.to_string())),
            AuthState::Error(hint) => Err(AuthorizationError::Failed(hint)),
            _ => Err(AuthorizationError::Cancelled),
        }
    }

    /// Run `body` once a token is available.
    pub async fn run_authorized<F>(&self, body: F) -> Result<F::Output, AuthorizationError>
    where
        F: Future,
    {
        self.obtain_token().await?;
        Ok(body.await)
    }

    /// End the previous flow and start a new one.
    fn begin_flow(&self) -> CancellationToken {
        let mut flow = self.flow.lock();
        flow.cancel();
        *flow = self.root.child_token();
        flow.clone()
    }

    /// Use an unexpired stored token if there is one.
    async fn try_stored_token(&self) -> bool {
        match self.store.get_token(&self.provider.provider_key).await {
            Some(token) if !token.is_expired() => {
                debug!(provider = %self.provider.provider_key, "stored_token_fast_path");
                self.complete(&token);
                true
            }
            Some(_) => {
                debug!(provider = %self.provider.provider_key, "stored_token_expired");
                false
            }
            None => false,
        }
    }

    /// Wait for a callback, a stored token, cancellation or the poll limits.
    async fn wait_for_completion(
        &self,
        cancel: &CancellationToken,
        mut links: Option<broadcast::Receiver<String>>,
    ) -> AuthState {
        let mut ticker = time::interval(self.poll.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        let deadline = time::sleep(self.poll.poll_timeout());
        tokio::pin!(deadline);
        let mut state_rx = self.state.subscribe();
        let mut attempts = 0u32;

        loop {
            {
                let current = state_rx.borrow_and_update();
                if !current.in_flight() {
                    return current.clone();
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    // A newer flow replaced this one and owns the state.
                    if !self.is_closed() {
                        return self.state();
                    }
                    self.pending.lock().take();
                    self.transition(AuthState::Unauthorized);
                    debug!(provider = %self.provider.provider_key, "flow_closed_by_owner");
                    return AuthState::Unauthorized;
                }
                _ = &mut deadline => {
                    return self.fail(AuthorizationError::TookTooLong);
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return self.state();
                    }
                }
                link = next_link(&mut links) => match link {
                    Some(url) => {
                        self.handle_callback(&url).await;
                    }
                    None => links = None,
                },
                _ = ticker.tick() => {
                    attempts += 1;
                    if self.poll_store_once().await {
                        return AuthState::Authorized;
                    }
                    if attempts >= self.poll.poll_max_attempts {
                        return self.fail(AuthorizationError::TookTooLong);
                    }
                }
            }
        }
    }

    /// One store read; completes the flow if a usable token appeared.
    async fn poll_store_once(&self) -> bool {
        match self.store.get_token(&self.provider.provider_key).await {
            Some(token) if !token.is_expired() => {
                if self.pending.lock().is_none() {
                    return false;
                }
                debug!(provider = %self.provider.provider_key, "token_found_by_poll");
                self.complete(&token);
                true
            }
            _ => false,
        }
    }

    /// Publish `token` to the slot and end the flow authorized.
    fn complete(&self, token: &StoredToken) {
        self.pending.lock().take();
        self.tokens.set(token.access_token.clone(), TokenKind::OAuth);
        self.transition(AuthState::Authorized);
        info!(provider = %self.provider.provider_key, "authorized");
    }

    /// End the flow in an error state carrying the hint for `err`.
    fn fail(&self, err: AuthorizationError) -> AuthState {
        self.pending.lock().take();
        warn!(provider = %self.provider.provider_key, error = %err, "authorization_failed");
        let state = AuthState::Error(err.hint());
        self.transition(state.clone());
        state
    }

    /// Move to `next`, notifying watchers only on change.
    fn transition(&self, next: AuthState) {
        self.state.send_if_modified(|cur| {
            if *cur == next {
                return false;
            }
            debug!(provider = %self.provider.provider_key, from = ?cur, to = ?next, "auth_state");
            *cur = next;
            true
        });
    }
}

/// Next raw URL from `links`, or `None` once the source is gone. Never
/// resolves when there is no source.
async fn next_link(links: &mut Option<broadcast::Receiver<String>>) -> Option<String> {
    let Some(rx) = links.as_mut() else {
        return future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(url) => return Some(url),
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "deep_link_backlog_dropped"),
            Err(RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{host::RecordingUrlOpener, oauth::MemoryTokenStore};

    fn provider() -> ProviderConfig {
        ProviderConfig {
            provider_key: "github".into(),
            client_id: "cid".into(),
            authorization_url: "https://github.com/login/oauth/authorize".into(),
            redirect_uri: "extkit://oauth?provider=github".into(),
            scope: Some("repo notifications".into()),
            personal_token: None,
        }
    }

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let session = OAuthSession::new(
            provider(),
            Arc::new(MemoryTokenStore::new()),
            Arc::new(RecordingUrlOpener::default()),
            TokenSlot::new(),
        );
        let pkce = PkcePair::generate();
        let url = session.authorization_url(&pkce).unwrap();
        let q: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(q["client_id"], "cid");
        assert_eq!(q["state"], pkce.state);
        assert_eq!(q["code_challenge"], pkce.challenge);
        assert_eq!(q["code_challenge_method"], "S256");
        assert_eq!(q["scope"], "repo notifications");
        assert_eq!(q["redirect_uri"], "extkit://oauth?provider=github");
    }

    #[test]
    fn invalid_authorization_url_is_reported() {
        let mut p = provider();
        p.authorization_url = "not a url".into();
        let session = OAuthSession::new(
            p,
            Arc::new(MemoryTokenStore::new()),
            Arc::new(RecordingUrlOpener::default()),
            TokenSlot::new(),
        );
        assert!(matches!(
            session.authorization_url(&PkcePair::generate()),
            Err(AuthorizationError::InvalidAuthorizationUrl(_))
        ));
    }

    #[tokio::test]
    async fn personal_token_bypasses_flow() {
        let mut p = provider();
        p.personal_token = Some("ghp_x".into());
        let opener = Arc::new(RecordingUrlOpener::default());
        let slot = TokenSlot::new();
        let session = OAuthSession::new(
            p,
            Arc::new(MemoryTokenStore::new()),
            opener.clone(),
            slot.clone(),
        );
        let rec = session.obtain_token().await.unwrap();
        assert_eq!(rec.kind, TokenKind::Personal);
        assert_eq!(slot.get().unwrap().token, "ghp_x");
        assert!(opener.opened().is_empty());
    }
}
