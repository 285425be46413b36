use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use extkit_runtime::{
    AccessTokenRecord, AuthorizationError, Error, ExtensionIdentity, Runtime, RuntimeConfig,
    RuntimeHost, ScopeStack, TokenKind, TokenSlot,
    config::OAuthConfig,
    host::{DeepLinkBus, NullIconExtractor, RecordingMenuHost, RecordingUrlOpener, TokenStore},
    oauth::{
        AuthState, CallbackOutcome, CodeExchange, MemoryTokenStore, OAuthSession,
        ProviderConfig, StoredToken, challenge_for,
    },
};
use tokio::time::sleep;
use url::Url;

fn provider() -> ProviderConfig {
    ProviderConfig {
        provider_key: "github".into(),
        client_id: "cid".into(),
        authorization_url: "https://github.com/login/oauth/authorize".into(),
        redirect_uri: "extkit://oauth?provider=github".into(),
        scope: None,
        personal_token: None,
    }
}

fn fast_poll(attempts: u32) -> OAuthConfig {
    OAuthConfig {
        poll_interval_ms: 100,
        poll_max_attempts: attempts,
        poll_timeout_ms: 60_000,
    }
}

struct Fixture {
    store: Arc<MemoryTokenStore>,
    opener: Arc<RecordingUrlOpener>,
    slot: TokenSlot,
    links: DeepLinkBus,
    session: OAuthSession,
}

fn fixture(poll: OAuthConfig) -> Fixture {
    let store = Arc::new(MemoryTokenStore::new());
    let opener = Arc::new(RecordingUrlOpener::default());
    let slot = TokenSlot::new();
    let links = DeepLinkBus::new();
    let session = OAuthSession::new(provider(), store.clone(), opener.clone(), slot.clone())
        .with_poll(poll)
        .with_deep_links(Arc::new(links.clone()));
    Fixture {
        store,
        opener,
        slot,
        links,
        session,
    }
}

/// Wait for the browser hand-off and return the `state` it carried.
async fn opened_state(opener: &RecordingUrlOpener) -> String {
    loop {
        if let Some(url) = opener.opened().first() {
            let url = Url::parse(url).unwrap();
            let q: HashMap<_, _> = url.query_pairs().into_owned().collect();
            return q["state"].clone();
        }
        sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn poll_picks_up_a_token_written_elsewhere() {
    let f = fixture(fast_poll(50));
    let (state, ()) = tokio::join!(f.session.authorize(), async {
        sleep(Duration::from_millis(250)).await;
        assert_eq!(f.session.state(), AuthState::PendingCallback);
        f.store.insert("github", StoredToken::new("from-poll"));
    });
    assert_eq!(state, AuthState::Authorized);
    assert_eq!(f.slot.get().unwrap().token, "from-poll");
    assert_eq!(f.opener.opened().len(), 1);
    assert!(f.store.reads() >= 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_poll_reports_took_too_long() {
    let f = fixture(fast_poll(3));
    let state = f.session.authorize().await;
    match &state {
        AuthState::Error(hint) => assert!(hint.contains("took too long"), "{}", hint),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(f.session.state(), state);
    assert!(!f.slot.is_set());
    // One read for the stored-token check plus one per attempt.
    assert_eq!(f.store.reads(), 4);
}

#[tokio::test(start_paused = true)]
async fn flow_timeout_ends_the_poll() {
    let f = fixture(OAuthConfig {
        poll_interval_ms: 100,
        poll_max_attempts: 10_000,
        poll_timeout_ms: 450,
    });
    let state = f.session.authorize().await;
    assert!(matches!(state, AuthState::Error(ref h) if h.contains("took too long")));
}

#[tokio::test(start_paused = true)]
async fn deep_link_callback_completes_the_flow() {
    let f = fixture(fast_poll(1000));
    let (state, delivered) = tokio::join!(f.session.authorize(), async {
        let s = opened_state(&f.opener).await;
        f.links.deliver(&format!(
            "extkit://oauth?provider=github&state={}&access_token=t1&token_type=bearer",
            s
        ))
    });
    assert_eq!(delivered, 1);
    assert_eq!(state, AuthState::Authorized);
    assert_eq!(
        f.slot.get().unwrap(),
        AccessTokenRecord {
            token: "t1".into(),
            kind: TokenKind::OAuth,
        }
    );
    let stored = f.store.get_token("github").await.unwrap();
    assert_eq!(stored.access_token, "t1");
}

#[tokio::test(start_paused = true)]
async fn provider_error_surfaces_its_message() {
    let f = fixture(fast_poll(1000));
    let (state, outcome) = tokio::join!(f.session.authorize(), async {
        let s = opened_state(&f.opener).await;
        f.session
            .handle_callback(&format!(
                "extkit://oauth?provider=github&state={}&error=access_denied&error_description=User+said+no",
                s
            ))
            .await
    });
    assert!(matches!(outcome, CallbackOutcome::Failed(_)));
    assert_eq!(state, AuthState::Error("User said no".into()));
    assert!(!f.slot.is_set());
}

#[tokio::test(start_paused = true)]
async fn callbacks_for_other_providers_are_ignored() {
    let f = fixture(fast_poll(1000));
    assert_eq!(
        f.session
            .handle_callback("extkit://oauth?provider=github&access_token=early")
            .await,
        CallbackOutcome::Ignored
    );

    let (state, ()) = tokio::join!(f.session.authorize(), async {
        let s = opened_state(&f.opener).await;
        let other = format!("extkit://oauth?provider=linear&state={}&access_token=x", s);
        assert_eq!(f.session.handle_callback(&other).await, CallbackOutcome::Ignored);
        assert_eq!(f.session.state(), AuthState::PendingCallback);
        f.session.cancel();
    });
    assert_eq!(state, AuthState::Unauthorized);
    assert!(!f.slot.is_set());
}

#[tokio::test(start_paused = true)]
async fn forged_state_fails_the_flow() {
    let f = fixture(fast_poll(1000));
    let (state, outcome) = tokio::join!(f.session.authorize(), async {
        opened_state(&f.opener).await;
        f.session
            .handle_callback("extkit://oauth?provider=github&state=forged&access_token=x")
            .await
    });
    assert!(matches!(outcome, CallbackOutcome::Failed(_)));
    assert!(matches!(state, AuthState::Error(_)));
    assert!(!f.slot.is_set());
}

#[tokio::test(start_paused = true)]
async fn callbacks_without_state_are_rejected() {
    let f = fixture(fast_poll(1000));
    let (state, outcome) = tokio::join!(f.session.authorize(), async {
        opened_state(&f.opener).await;
        f.session
            .handle_callback("extkit://oauth?provider=github&access_token=x")
            .await
    });
    assert_eq!(
        outcome,
        CallbackOutcome::Failed(AuthorizationError::MalformedCallback("missing state".into()))
    );
    assert!(matches!(state, AuthState::Error(_)));
    assert!(!f.slot.is_set());
    assert!(f.store.get_token("github").await.is_none());
}

#[tokio::test]
async fn stored_token_skips_the_browser_and_sign_out_forgets_it() {
    let f = fixture(fast_poll(3));
    f.store.insert("github", StoredToken::new("kept"));
    assert_eq!(f.session.authorize().await, AuthState::Authorized);
    assert!(f.opener.opened().is_empty());
    assert_eq!(f.slot.get().unwrap().token, "kept");

    f.session.sign_out().await;
    assert_eq!(f.session.state(), AuthState::Unauthorized);
    assert!(!f.slot.is_set());
    assert!(f.store.get_token("github").await.is_none());
}

#[tokio::test]
async fn expired_tokens_are_not_used() {
    let f = fixture(fast_poll(1));
    let mut old = StoredToken::new("stale");
    old.obtained_at = 1;
    old.expires_in = Some(60);
    f.store.insert("github", old);
    assert!(matches!(f.session.authorize().await, AuthState::Error(_)));
    assert_eq!(f.opener.opened().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn runtime_scope_sees_the_token_only_after_authorization() {
    let rt = Runtime::new(
        RuntimeConfig {
            oauth: fast_poll(5),
            ..RuntimeConfig::default()
        },
        ScopeStack::default(),
        RuntimeHost {
            menu: Arc::new(RecordingMenuHost::new()),
            icons: Arc::new(NullIconExtractor),
            opener: Arc::new(RecordingUrlOpener::default()),
        },
    );
    assert!(rt.scope().get_access_token().is_err());

    let store = Arc::new(MemoryTokenStore::new());
    let session = rt.oauth_session(provider(), store.clone());
    let (state, ()) = tokio::join!(session.authorize(), async {
        sleep(Duration::from_millis(150)).await;
        store.insert("github", StoredToken::new("t1"));
    });
    assert_eq!(state, AuthState::Authorized);
    assert_eq!(
        rt.scope().get_access_token().unwrap(),
        AccessTokenRecord {
            token: "t1".into(),
            kind: TokenKind::OAuth,
        }
    );

    session.sign_out().await;
    assert!(rt.scope().get_access_token().is_err());
}

#[tokio::test]
async fn refused_browser_is_an_error() {
    let store = Arc::new(MemoryTokenStore::new());
    let session = OAuthSession::new(
        provider(),
        store,
        Arc::new(RecordingUrlOpener::refusing()),
        TokenSlot::new(),
    );
    let state = session.authorize().await;
    assert_eq!(
        state,
        AuthState::Error("Could not open your browser to sign in. Try again.".into())
    );
}

/// Trades codes for `tok-<code>` and remembers what it was given.
#[derive(Default)]
struct RecordingExchange {
    seen: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl CodeExchange for RecordingExchange {
    async fn exchange(
        &self,
        _provider: &ProviderConfig,
        code: &str,
        verifier: &str,
    ) -> Result<StoredToken, AuthorizationError> {
        self.seen
            .lock()
            .unwrap()
            .push((code.to_string(), verifier.to_string()));
        Ok(StoredToken::new(format!("tok-{code}")))
    }
}

#[tokio::test(start_paused = true)]
async fn codes_are_redeemed_with_the_pkce_verifier() {
    let exchange = Arc::new(RecordingExchange::default());
    let f = fixture(fast_poll(1000));
    let session = f.session.with_exchange(exchange.clone());
    let (state, outcome) = tokio::join!(session.authorize(), async {
        let s = opened_state(&f.opener).await;
        session
            .handle_callback(&format!("extkit://oauth?provider=github&state={s}&code=abc"))
            .await
    });
    assert_eq!(outcome, CallbackOutcome::Authorized);
    assert_eq!(state, AuthState::Authorized);
    assert_eq!(f.slot.get().unwrap().token, "tok-abc");

    let seen = exchange.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "abc");
    let opened = Url::parse(&f.opener.opened()[0]).unwrap();
    let q: HashMap<_, _> = opened.query_pairs().into_owned().collect();
    assert_eq!(q["code_challenge"], challenge_for(&seen[0].1));
}

#[tokio::test(start_paused = true)]
async fn without_an_exchange_the_code_is_kept_as_the_token() {
    let f = fixture(fast_poll(1000));
    let (state, _) = tokio::join!(f.session.authorize(), async {
        let s = opened_state(&f.opener).await;
        f.links
            .deliver(&format!("extkit://oauth?provider=github&state={s}&code=raw"))
    });
    assert_eq!(state, AuthState::Authorized);
    assert_eq!(f.store.get_token("github").await.unwrap().access_token, "raw");
}

#[tokio::test]
async fn run_authorized_runs_the_body_only_with_a_token() {
    let f = fixture(fast_poll(3));
    f.store.insert("github", StoredToken::new("kept"));
    let slot = f.slot.clone();
    let out = f
        .session
        .run_authorized(async move { slot.get().map(|r| r.token) })
        .await
        .unwrap();
    assert_eq!(out.unwrap(), "kept");

    let session = OAuthSession::new(
        provider(),
        Arc::new(MemoryTokenStore::new()),
        Arc::new(RecordingUrlOpener::refusing()),
        TokenSlot::new(),
    );
    let ran = session.run_authorized(async { true }).await;
    assert!(matches!(ran, Err(AuthorizationError::Failed(_))));
}

fn runtime_with(opener: Arc<RecordingUrlOpener>) -> Runtime {
    Runtime::new(
        RuntimeConfig {
            oauth: fast_poll(1000),
            ..RuntimeConfig::default()
        },
        ScopeStack::default(),
        RuntimeHost {
            menu: Arc::new(RecordingMenuHost::new()),
            icons: Arc::new(NullIconExtractor),
            opener,
        },
    )
}

const EMPTY_VIEW: &str = "fn render(ui) {} export_default(Fn(\"render\"));";

#[tokio::test(start_paused = true)]
async fn unmounting_the_instance_stops_its_sign_in_poll() {
    let opener = Arc::new(RecordingUrlOpener::default());
    let rt = runtime_with(opener.clone());
    let identity = ExtensionIdentity::new("github", "inbox").unwrap();
    let instance = rt.mount(rt.load(EMPTY_VIEW).unwrap(), identity).await.unwrap();

    let store = Arc::new(MemoryTokenStore::new());
    let session = Arc::new(
        rt.instance_oauth_session(instance.ext_id(), provider(), store.clone())
            .unwrap(),
    );
    let task = tokio::spawn({
        let session = session.clone();
        async move { session.authorize().await }
    });

    opened_state(&opener).await;
    sleep(Duration::from_millis(350)).await;
    assert_eq!(session.state(), AuthState::PendingCallback);
    let polled = store.reads();
    assert!(polled >= 2, "{polled}");

    rt.unmount(instance.ext_id()).await.unwrap();
    assert_eq!(task.await.unwrap(), AuthState::Unauthorized);
    assert!(session.is_closed());

    let reads = store.reads();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(store.reads(), reads);

    // Later attempts end before reaching the browser.
    assert_eq!(session.authorize().await, AuthState::Unauthorized);
    assert_eq!(opener.opened().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn runtime_shutdown_ends_sign_in_in_progress() {
    let opener = Arc::new(RecordingUrlOpener::default());
    let rt = runtime_with(opener.clone());
    let store = Arc::new(MemoryTokenStore::new());
    let session = rt.oauth_session(provider(), store.clone());

    let (state, ()) = tokio::join!(session.authorize(), async {
        opened_state(&opener).await;
        rt.shutdown().await;
    });
    assert_eq!(state, AuthState::Unauthorized);
    assert!(rt.scope().get_access_token().is_err());

    // Arriving after shutdown, the token is not picked up.
    store.insert("github", StoredToken::new("late"));
    sleep(Duration::from_secs(1)).await;
    assert!(rt.scope().get_access_token().is_err());
}

#[tokio::test]
async fn instance_sessions_need_a_mounted_instance() {
    let rt = runtime_with(Arc::new(RecordingUrlOpener::default()));
    let session =
        rt.instance_oauth_session("github.inbox", provider(), Arc::new(MemoryTokenStore::new()));
    assert!(matches!(session, Err(Error::UnknownInstance(id)) if id == "github.inbox"));
}
