//! Extkit Runtime
//!
//! Hosts third-party extension bundles and makes them behave as if written
//! against a fixed compatibility API:
//! - loads Rhai bundles into a sandbox exposing only the `ui` and `api` modules
//! - tracks which extension identity is active, even across interleaved async work
//! - serializes menu-bar commands into the native menu host's wire format
//! - drives OAuth sign-in with deep-link callbacks and a polling backstop
//!
//! The usual entry point is [`Runtime`]: load a bundle, then
//! [`mount`](Runtime::mount) it under an [`ExtensionIdentity`]. Native
//! collaborators are reached only through the traits in [`host`].

pub mod config;
mod error;
pub mod host;
mod identity;
pub mod loader;
pub mod menubar;
pub mod oauth;
mod runtime;
mod scope;
pub mod shortcut;
mod token;

pub use config::RuntimeConfig;
pub use error::{
    AuthorizationError, ConfigError, Error, IdentityError, LoadError, PublishError,
    RenderError, Result, SerializationError, excerpt_at,
};
pub use identity::{CommandMode, ExtensionIdentity, Preferences};
pub use runtime::{Instance, Runtime, RuntimeHost};
pub use scope::{ScopeGuard, ScopeStack, Scoped};
pub use shortcut::{KeyEvent, Shortcut, matches as matches_shortcut};
pub use token::{AccessTokenRecord, NotAuthenticated, TokenKind, TokenSlot};
