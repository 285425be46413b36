//! The `api` module bundles import: identity, preferences, tokens and the browser.

use std::sync::Arc;

use rhai::{Module, serde::to_dynamic};

use crate::{host::UrlOpener, scope::ScopeStack};

/// The importable `api` module.
///
/// Every function reads the identity active on the scope stack at call time,
/// so a handler fired long after render still sees its own extension.
pub(super) fn api_module(scope: &ScopeStack, opener: Arc<dyn UrlOpener>) -> Module {
    let mut module = Module::new();

    let s = scope.clone();
    module.set_native_fn("preferences", move || to_dynamic(&s.current().preferences));

    let s = scope.clone();
    module.set_native_fn("identity", move || to_dynamic(&*s.current()));

    let s = scope.clone();
    module.set_native_fn("access_token", move || match s.get_access_token() {
        Ok(record) => to_dynamic(&record),
        Err(e) => Err(e.to_string().into()),
    });

    module.set_native_fn("open_url", move |url: &str| Ok(opener.open(url)));

    module
}
