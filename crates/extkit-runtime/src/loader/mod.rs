//! Loading extension bundles into a sandboxed script engine.
//!
//! A bundle is a Rhai script that declares a component and hands it to
//! `export_default`. The engine it runs in can import exactly two modules,
//! `ui` and `api` (also reachable as `@extkit/ui` and `@extkit/api`, and
//! pre-registered so closures see them without importing). Any other import
//! yields an empty module and a warning.

mod api;
mod boundary;
mod resolver;
pub mod ui;

use std::{
    fmt, fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use rhai::{AST, Dynamic, Engine, EvalAltResult, FnPtr, Module, Position, Scope, Shared};
use tracing::{debug, info};

pub use self::{
    boundary::ErrorBoundary,
    resolver::ImportTarget,
    ui::{Handler, IconKind, IconSpec, RenderOutput, StatusSpec, UiItem, UiNode},
};
use self::{resolver::SandboxResolver, ui::UiBuilder};
use crate::{
    config::EngineLimits,
    error::{LoadError, RenderError, excerpt_at},
    host::UrlOpener,
    scope::ScopeStack,
};

/// Collaborators a bundle is loaded against.
#[derive(Clone)]
pub struct LoadEnv {
    /// Scope stack the `api` module reads identities and tokens from.
    pub scope: ScopeStack,
    /// Browser hand-off for `api::open_url`.
    pub opener: Arc<dyn UrlOpener>,
    /// Engine limits.
    pub limits: EngineLimits,
}

impl fmt::Debug for LoadEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadEnv")
            .field("scope", &self.scope)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// A compiled bundle and the function it exported.
struct Compiled {
    /// Sandboxed engine the bundle was evaluated in.
    engine: Engine,
    /// Script functions the export calls into.
    ast: AST,
    /// The exported render function.
    func: FnPtr,
    /// Source text, for error excerpts.
    source: Arc<str>,
}

/// A loaded bundle's default export, ready to render.
///
/// Clones share the engine.
#[derive(Clone)]
pub struct Component {
    /// Shared by clones.
    inner: Arc<Compiled>,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("fn", &self.inner.func.fn_name())
            .finish_non_exhaustive()
    }
}

impl Component {
    /// Run the component's render function.
    pub fn render(&self) -> Result<RenderOutput, RenderError> {
        let ui = UiBuilder::root();
        let c = &self.inner;
        c.func
            .call::<Dynamic>(&c.engine, &c.ast, (ui.clone(),))
            .map_err(|e| render_error(&e))?;
        Ok(ui.finish())
    }

    /// Invoke an entry's callback.
    pub fn run_handler(&self, handler: &Handler) -> Result<(), RenderError> {
        let c = &self.inner;
        handler
            .func
            .call::<Dynamic>(&c.engine, &c.ast, ())
            .map(|_| ())
            .map_err(|e| render_error(&e))
    }

    /// Bundle source text.
    pub fn source(&self) -> &str {
        &self.inner.source
    }
}

/// Read and load a bundle from disk.
pub fn load_file(path: &Path, env: &LoadEnv) -> Result<Component, LoadError> {
    let source = fs::read_to_string(path).map_err(|e| LoadError::Read {
        path: Some(path.to_path_buf()),
        message: e.to_string(),
    })?;
    load(&source, env)
}

/// Compile and evaluate a bundle, returning its default export.
pub fn load(source: &str, env: &LoadEnv) -> Result<Component, LoadError> {
    let export = Arc::new(Mutex::new(None));
    let engine = build_engine(env, export.clone());

    let ast = engine.compile(source).map_err(|err| {
        let (line, col) = pos_to_line_col(err.position()).unwrap_or((1, 1));
        LoadError::Parse {
            line,
            col,
            message: err.to_string(),
            excerpt: excerpt_at(source, line, col),
        }
    })?;

    engine
        .run_ast_with_scope(&mut Scope::new(), &ast)
        .map_err(|err| eval_error(source, &err))?;

    let exported = lock_unpoisoned(&export).take();
    let func = match exported {
        None => {
            return Err(LoadError::NotAComponent {
                found: "nothing".to_string(),
            });
        }
        Some(value) => {
            let found = value.type_name().to_string();
            value
                .try_cast::<FnPtr>()
                .ok_or(LoadError::NotAComponent { found })?
        }
    };

    if !takes_one_argument(&ast, &func) {
        return Err(LoadError::NotAComponent {
            found: format!("function {} without a single ui parameter", func.fn_name()),
        });
    }

    debug!(component = func.fn_name(), "bundle_loaded");
    Ok(Component {
        inner: Arc::new(Compiled {
            engine,
            ast,
            func,
            source: Arc::from(source),
        }),
    })
}

/// The export must name a script function taking the builder.
fn takes_one_argument(ast: &AST, func: &FnPtr) -> bool {
    let want = func.curry().len() + 1;
    ast.iter_functions()
        .any(|f| f.name == func.fn_name() && f.params.len() == want)
}

/// Engine with the sandbox limits, both modules and the builder type.
///
/// `export_default` stores its argument in `export`.
fn build_engine(env: &LoadEnv, export: Arc<Mutex<Option<Dynamic>>>) -> Engine {
    let mut engine = Engine::new();

    let limits = &env.limits;
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_fn_expr_depth);
    engine.disable_symbol("eval");

    let scope = env.scope.clone();
    engine.on_print(move |s| {
        info!(target: "extkit::ext", ext = %scope.current().instance_id(), "{}", s);
    });
    let scope = env.scope.clone();
    engine.on_debug(move |s, _src, pos| {
        debug!(target: "extkit::ext", ext = %scope.current().instance_id(), line = ?pos.line(), "{}", s);
    });

    let ui_module: Shared<Module> = ui::ui_module().into();
    let api_module: Shared<Module> = api::api_module(&env.scope, env.opener.clone()).into();
    engine.register_static_module("ui", ui_module.clone());
    engine.register_static_module("api", api_module.clone());
    engine.set_module_resolver(SandboxResolver::new(ui_module, api_module));

    ui::register_builder(&mut engine);
    engine.register_fn("export_default", move |value: Dynamic| {
        *lock_unpoisoned(&export) = Some(value);
    });

    engine
}

/// Load error with line, column and excerpt where the position is known.
fn eval_error(source: &str, err: &EvalAltResult) -> LoadError {
    let (pos, message) = extract_validation_error(err)
        .unwrap_or_else(|| (err.position(), err.to_string()));
    match pos_to_line_col(pos) {
        Some((line, col)) => LoadError::Eval {
            line: Some(line),
            col: Some(col),
            message,
            excerpt: Some(excerpt_at(source, line, col)),
        },
        None => LoadError::Eval {
            line: None,
            col: None,
            message,
            excerpt: None,
        },
    }
}

/// Render error, preferring a builder message over rhai's wrapping.
fn render_error(err: &EvalAltResult) -> RenderError {
    let (pos, message) = extract_validation_error(err)
        .unwrap_or_else(|| (err.position(), err.to_string()));
    RenderError {
        message,
        line: pos.line(),
    }
}

/// Tags errors raised by the `ui` builder so their message survives nesting.
#[derive(Debug, Clone)]
struct ValidationError {
    /// Shown to the extension author as is.
    message: String,
}

/// Raise a builder error from a native function.
pub(crate) fn boxed_validation_error(message: String, pos: Position) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(ValidationError { message }),
        pos,
    ))
}

/// Builder error inside `err`, looking through call and module frames.
fn extract_validation_error(err: &EvalAltResult) -> Option<(Position, String)> {
    match err {
        EvalAltResult::ErrorRuntime(d, pos) if d.is::<ValidationError>() => {
            let ve: ValidationError = d.clone_cast();
            Some((*pos, ve.message))
        }
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => extract_validation_error(inner),
        _ => None,
    }
}

/// One-based line and column, if the position has a line.
fn pos_to_line_col(pos: Position) -> Option<(usize, usize)> {
    let line = pos.line()?;
    let col = pos.position().unwrap_or(1);
    Some((line.max(1), col.max(1)))
}

/// Lock, recovering the guard from a poisoned mutex.
pub(crate) fn lock_unpoisoned<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
