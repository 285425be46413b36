use std::{fs, sync::Arc};

use extkit_runtime::{
    CommandMode, Error, ExtensionIdentity, KeyEvent, LoadError, Runtime, RuntimeConfig,
    RuntimeHost, ScopeStack, TokenKind,
    host::{NullIconExtractor, RecordingMenuHost, RecordingUrlOpener},
    shortcut::PanelOutcome,
};

fn runtime() -> (Runtime, Arc<RecordingUrlOpener>) {
    let opener = Arc::new(RecordingUrlOpener::default());
    let rt = Runtime::new(
        RuntimeConfig::default(),
        ScopeStack::default(),
        RuntimeHost {
            menu: Arc::new(RecordingMenuHost::new()),
            icons: Arc::new(NullIconExtractor),
            opener: opener.clone(),
        },
    );
    (rt, opener)
}

fn load_err(rt: &Runtime, src: &str) -> LoadError {
    match rt.load(src) {
        Err(Error::Load(e)) => e,
        Err(other) => panic!("expected a load error, got {other}"),
        Ok(c) => panic!("expected a load error, got {c:?}"),
    }
}

#[test]
fn non_callable_exports_are_rejected() {
    let (rt, _) = runtime();
    match load_err(&rt, "export_default(42);") {
        LoadError::NotAComponent { found } => assert_eq!(found, "i64"),
        other => panic!("unexpected {other:?}"),
    }
    match load_err(&rt, r#"export_default(#{ title: "x" });"#) {
        LoadError::NotAComponent { found } => assert!(found.contains("map"), "{}", found),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn missing_export_is_reported() {
    let (rt, _) = runtime();
    match load_err(&rt, "fn render(ui) { ui.item(#{ title: \"x\" }); }") {
        LoadError::NotAComponent { found } => assert_eq!(found, "nothing"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn components_take_exactly_the_builder() {
    let (rt, _) = runtime();
    let err = load_err(&rt, "fn render(ui, extra) {} export_default(Fn(\"render\"));");
    assert!(matches!(err, LoadError::NotAComponent { .. }));
    assert!(rt.load("fn render(ui) {} export_default(Fn(\"render\"));").is_ok());
}

#[test]
fn parse_errors_carry_position_and_excerpt() {
    let (rt, _) = runtime();
    let src = "let a = 1;\nlet b = ;\nexport_default(|ui| ());";
    match load_err(&rt, src) {
        LoadError::Parse {
            line, excerpt, ..
        } => {
            assert_eq!(line, 2);
            assert!(excerpt.contains("let b = ;"), "{}", excerpt);
            assert!(excerpt.contains('^'));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn top_level_throw_is_an_eval_error() {
    let (rt, _) = runtime();
    match load_err(&rt, "let x = 1;\nthrow \"boom\";") {
        LoadError::Eval { line, message, .. } => {
            assert_eq!(line, Some(2));
            assert!(message.contains("boom"), "{}", message);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unknown_imports_degrade_to_empty_modules() {
    let (rt, _) = runtime();
    let src = r#"
        import "lodash" as lodash;
        import "@extkit/ui" as kit;
        let done = kit::emoji("✅");
        export_default(|ui| ui.item(#{ title: "ok", icon: done }));
    "#;
    let component = rt.load(src).unwrap();
    let out = component.render().unwrap();
    assert_eq!(out.items()[0].title, "ok");
}

#[test]
fn missing_files_are_read_errors() {
    let (rt, _) = runtime();
    let dir = tempfile::tempdir().unwrap();
    let err = rt.load_file(&dir.path().join("absent.rhai")).unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::Read { .. })));

    let path = dir.path().join("bundle.rhai");
    fs::write(&path, "export_default(|ui| ());").unwrap();
    assert!(rt.load_file(&path).is_ok());
}

const VIEW: &str = r#"
    export_default(|ui| {
        ui.item(#{
            title: "Open Dashboard",
            on_action: || api::open_url("https://example.com/dash"),
        });
        ui.item(#{
            title: "Copy Token",
            shortcut: "cmd+shift+c",
            on_action: || api::open_url("token:" + api::access_token().token),
        });
        ui.item(#{ title: "Disabled", shortcut: "cmd+d", disabled: true, on_action: || 1 });
    });
"#;

#[tokio::test]
async fn view_actions_route_through_the_panel() {
    let (rt, opener) = runtime();
    let identity = ExtensionIdentity::new("dash", "open")
        .unwrap()
        .with_mode(CommandMode::View);
    let instance = rt.mount(rt.load(VIEW).unwrap(), identity).await.unwrap();

    assert_eq!(instance.run_primary().await.as_deref(), Some("Open Dashboard"));
    assert_eq!(opener.opened(), ["https://example.com/dash"]);

    let cmd_k = KeyEvent {
        meta: true,
        ..KeyEvent::key("k")
    };
    assert_eq!(instance.on_key(&cmd_k).await, PanelOutcome::ToggleMenu);

    let cmd_d = KeyEvent {
        meta: true,
        ..KeyEvent::key("d")
    };
    assert_eq!(instance.on_key(&cmd_d).await, PanelOutcome::Unhandled);

    // Without a token the handler fails inside the boundary.
    let copy = KeyEvent {
        meta: true,
        shift: true,
        ..KeyEvent::key("C")
    };
    assert_eq!(
        instance.on_key(&copy).await,
        PanelOutcome::Run("Copy Token".to_string())
    );
    let err = instance.last_error().unwrap();
    assert!(err.message.contains("not authenticated"), "{}", err.message);

    rt.scope().tokens().set("t1", TokenKind::OAuth);
    instance.on_key(&copy).await;
    assert_eq!(opener.opened().last().map(String::as_str), Some("token:t1"));
    assert!(instance.last_error().is_none());
}
