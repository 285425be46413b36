//! Per-instance failure containment.

use parking_lot::Mutex;
use tracing::warn;

use crate::error::RenderError;

/// Contains render and handler failures for one instance.
///
/// A failure is logged and remembered; it never propagates to the caller,
/// so sibling instances keep running.
#[derive(Debug, Default)]
pub struct ErrorBoundary {
    /// Instance id used in logs.
    label: String,
    /// Most recent failure, cleared by the next success.
    last: Mutex<Option<RenderError>>,
}

impl ErrorBoundary {
    /// Create a boundary; `label` tags its log lines.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            last: Mutex::new(None),
        }
    }

    /// Unwrap a render result, recording the error instead of returning it.
    ///
    /// A success clears any previously recorded error.
    pub fn guard<T>(&self, result: Result<T, RenderError>) -> Option<T> {
        match result {
            Ok(value) => {
                *self.last.lock() = None;
                Some(value)
            }
            Err(e) => {
                warn!(instance = %self.label, line = ?e.line, error = %e, "render_failed");
                *self.last.lock() = Some(e);
                None
            }
        }
    }

    /// The most recent contained error, if the last guarded call failed.
    pub fn error(&self) -> Option<RenderError> {
        self.last.lock().clone()
    }

    /// True when the last guarded call failed.
    pub fn has_failed(&self) -> bool {
        self.last.lock().is_some()
    }
}
