//! Import resolution for bundles.

use rhai::{Engine, EvalAltResult, Module, ModuleResolver, Position, Shared};
use tracing::warn;

/// What an `import` path refers to inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportTarget {
    /// The UI builder helpers.
    Ui,
    /// The compatibility API.
    Api,
    /// Anything else; resolves to an empty module.
    Unknown,
}

impl ImportTarget {
    /// Classify an import path.
    pub fn classify(path: &str) -> Self {
        match path {
            "ui" | "@extkit/ui" => Self::Ui,
            "api" | "@extkit/api" => Self::Api,
            _ => Self::Unknown,
        }
    }
}

/// Module resolver with a closed table: `ui`, `api` and an empty stand-in.
///
/// Nothing is ever read from disk.
pub(super) struct SandboxResolver {
    /// Served for `ui` imports.
    ui: Shared<Module>,
    /// Served for `api` imports.
    api: Shared<Module>,
    /// Served for everything else.
    empty: Shared<Module>,
}

impl SandboxResolver {
    /// Resolve `ui` and `api` to these modules.
    pub(super) fn new(ui: Shared<Module>, api: Shared<Module>) -> Self {
        Self {
            ui,
            api,
            empty: Module::new().into(),
        }
    }
}

impl ModuleResolver for SandboxResolver {
    fn resolve(
        &self,
        _engine: &Engine,
        _source: Option<&str>,
        path: &str,
        _pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        Ok(match ImportTarget::classify(path) {
            ImportTarget::Ui => self.ui.clone(),
            ImportTarget::Api => self.api.clone(),
            ImportTarget::Unknown => {
                warn!(module = path, "unknown_import_stubbed");
                self.empty.clone()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_aliases() {
        assert_eq!(ImportTarget::classify("ui"), ImportTarget::Ui);
        assert_eq!(ImportTarget::classify("@extkit/ui"), ImportTarget::Ui);
        assert_eq!(ImportTarget::classify("@extkit/api"), ImportTarget::Api);
        assert_eq!(ImportTarget::classify("lodash"), ImportTarget::Unknown);
        assert_eq!(ImportTarget::classify("./ui"), ImportTarget::Unknown);
    }
}
