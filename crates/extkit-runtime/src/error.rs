//! Error types for loading, rendering, publishing and authorizing extensions.

use std::{
    cmp::{max, min},
    fmt::Write as _,
    path::PathBuf,
    result::Result as StdResult,
};

use thiserror::Error;

use crate::token::NotAuthenticated;

/// Convenient result type for the runtime crate.
pub type Result<T> = StdResult<T, Error>;

/// Unified error type for runtime operations surfaced to the host.
#[derive(Debug, Error)]
pub enum Error {
    /// A bundle could not be turned into a component.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A mounted component failed while rendering.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Runtime configuration could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An identity failed validation.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Sign-in did not complete.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    /// A token was requested before authorization.
    #[error(transparent)]
    NotAuthenticated(#[from] NotAuthenticated),

    /// No mounted instance carries this id.
    #[error("no mounted extension with id {0}")]
    UnknownInstance(String),
}

/// Errors produced while turning a bundle into a component.
#[derive(Debug, Error, Clone)]
pub enum LoadError {
    /// The bundle file could not be read.
    #[error("{message}")]
    Read {
        /// Bundle path.
        path: Option<PathBuf>,
        /// Human-readable error message.
        message: String,
    },
    /// The bundle does not compile.
    #[error("{message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// 1-based column number.
        col: usize,
        /// Human-readable error message.
        message: String,
        /// Rendered excerpt including a caret at the error location.
        excerpt: String,
    },
    /// Top-level evaluation of the bundle failed.
    #[error("{message}")]
    Eval {
        /// Optional 1-based line number.
        line: Option<usize>,
        /// Optional 1-based column number.
        col: Option<usize>,
        /// Human-readable error message.
        message: String,
        /// Optional excerpt including a caret at the error location.
        excerpt: Option<String>,
    },
    /// The bundle's default export is missing or not callable.
    #[error("default export is not a component (found {found})")]
    NotAComponent {
        /// Type name of whatever was exported.
        found: String,
    },
}

impl LoadError {
    /// Render a human-friendly message including location and an excerpt when available.
    pub fn pretty(&self) -> String {
        match self {
            Self::Read { path, message } => match path {
                Some(p) => format!("Could not read bundle {}: {}", p.display(), message),
                None => format!("Could not read bundle: {}", message),
            },
            Self::Parse {
                line,
                col,
                message,
                excerpt,
            } => format!(
                "Bundle parse error at line {}, column {}\n{}\n{}",
                line, col, message, excerpt
            ),
            Self::Eval {
                line,
                col,
                message,
                excerpt,
            } => match (line, col, excerpt) {
                (Some(l), Some(c), Some(ex)) => {
                    format!("Bundle failed at {}:{}\n{}\n{}", l, c, message, ex)
                }
                (Some(l), _, _) => format!("Bundle failed at line {}\n{}", l, message),
                _ => format!("Bundle failed\n{}", message),
            },
            Self::NotAComponent { .. } => self.to_string(),
        }
    }
}

/// A component raised an error while rendering or running a handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RenderError {
    /// Human-readable error message.
    pub message: String,
    /// Optional 1-based line number in the bundle.
    pub line: Option<usize>,
}

/// An icon could not be turned into pixels.
#[derive(Debug, Error, Clone)]
pub enum SerializationError {
    /// The host's icon extractor failed for a file.
    #[error("icon extraction failed for {}: {message}", path.display())]
    IconExtraction {
        /// File whose icon was requested.
        path: PathBuf,
        /// Extractor message.
        message: String,
    },
}

/// The native host refused a menu update.
#[derive(Debug, Error, Clone)]
pub enum PublishError {
    /// The host answered with an error.
    #[error("menu host rejected update: {0}")]
    Rejected(String),
    /// The host connection is gone.
    #[error("menu host disconnected")]
    Disconnected,
}

/// Reasons a sign-in flow ends in the error state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// The authorization URL could not be built.
    #[error("invalid authorization url: {0}")]
    InvalidAuthorizationUrl(String),
    /// The external browser could not be opened.
    #[error("could not open the browser")]
    BrowserUnavailable,
    /// The provider reported an error in its callback.
    #[error("provider error: {0}")]
    Provider(String),
    /// The callback could not be understood.
    #[error("malformed callback: {0}")]
    MalformedCallback(String),
    /// The poll budget ran out before a token showed up.
    #[error("authorization took too long")]
    TookTooLong,
    /// Exchanging the authorization code failed.
    #[error("code exchange failed: {0}")]
    Exchange(String),
    /// The flow was cancelled before it finished.
    #[error("authorization cancelled")]
    Cancelled,
    /// The flow finished in an error state with this hint.
    #[error("{0}")]
    Failed(String),
}

impl AuthorizationError {
    /// Short sentence suitable for showing in a sign-in view.
    pub fn hint(&self) -> String {
        match self {
            Self::InvalidAuthorizationUrl(_) => {
                "The extension's sign-in address is invalid.".to_string()
            }
            Self::BrowserUnavailable => {
                "Could not open your browser to sign in. Try again.".to_string()
            }
            Self::Provider(msg) => msg.clone(),
            Self::MalformedCallback(_) => {
                "The sign-in response was not understood. Try again.".to_string()
            }
            Self::TookTooLong => "Sign-in took too long. Try again.".to_string(),
            Self::Exchange(_) => "Could not finish signing in with the provider.".to_string(),
            Self::Cancelled => "Sign-in was cancelled.".to_string(),
            Self::Failed(hint) => hint.clone(),
        }
    }
}

/// An identity field failed validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {field}: {value:?} (expected lowercase letters, digits, '.', '_' or '-')")]
pub struct IdentityError {
    /// Which field was rejected.
    pub field: &'static str,
    /// The rejected value.
    pub value: String,
}

/// Runtime configuration could not be loaded.
#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("could not read {}: {message}", path.display())]
    Read {
        /// Config path.
        path: PathBuf,
        /// I/O error message.
        message: String,
    },
    /// The file is not valid RON for the config schema.
    #[error("could not parse {}: {message}", path.as_ref().map_or("config".to_string(), |p| p.display().to_string()))]
    Parse {
        /// Config path, if loaded from disk.
        path: Option<PathBuf>,
        /// Parser message.
        message: String,
    },
}

/// Build a small 2-3 line excerpt with a caret at `(line_no, col_no)`.
pub fn excerpt_at(source: &str, line_no: usize, col_no: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let total = lines.len();
    let start = max(1usize, line_no.saturating_sub(2));
    let end = min(total, line_no + 1);

    let mut out = String::new();
    for n in start..=end {
        let text = lines.get(n - 1).copied().unwrap_or("");
        let _ignored = writeln!(out, " {:>4} | {}", n, text);
        if n == line_no {
            let prefix = format!(" {:>4} | ", n);
            let _ignored = writeln!(
                out,
                "{}{}^",
                " ".repeat(prefix.len()),
                " ".repeat(col_no.saturating_sub(1))
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_points_at_column() {
        let src = "let a = 1;\nlet b = ;\nlet c = 3;";
        let ex = excerpt_at(src, 2, 9);
        let lines: Vec<&str> = ex.lines().collect();
        assert_eq!(lines[1], "    2 | let b = ;");
        assert_eq!(lines[2].find('^'), Some(16));
    }

    #[test]
    fn hints_are_human_readable() {
        assert_eq!(
            AuthorizationError::TookTooLong.hint(),
            "Sign-in took too long. Try again."
        );
        assert_eq!(
            AuthorizationError::Provider("access_denied".into()).hint(),
            "access_denied"
        );
    }

    #[test]
    fn not_a_component_pretty() {
        let err = LoadError::NotAComponent {
            found: "i64".into(),
        };
        assert_eq!(err.pretty(), "default export is not a component (found i64)");
    }
}
