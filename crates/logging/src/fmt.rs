//! Render `tracing` events into concise logfmt strings.

use std::fmt::{Debug, Write};

use tracing::{
    Event, Metadata,
    field::{Field, Visit},
};

/// Rendered fields extracted from a tracing Event.
#[derive(Debug, Clone)]
pub struct RenderedLog {
    /// Severity level (e.g., INFO, WARN) for the event.
    pub level: String,
    /// Event target (typically the module path).
    pub target: String,
    /// `message` followed by any remaining fields as `key=value`.
    pub message: String,
}

/// Collects the `message` field and renders the rest as logfmt pairs.
#[derive(Default)]
struct LogfmtVisitor {
    /// Captured `message` field, if present.
    msg: Option<String>,
    /// Accumulated non-message fields.
    fields: String,
}

impl LogfmtVisitor {
    /// Append a `key=value` pair, quoting values that contain spaces or quotes.
    fn push_pair(&mut self, key: &str, value: &str) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        if value.is_empty() || value.contains([' ', '"', '=']) {
            let _ignored = write!(self.fields, "{}={:?}", key, value);
        } else {
            let _ignored = write!(self.fields, "{}={}", key, value);
        }
    }
}

impl Visit for LogfmtVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.msg = Some(value.to_string());
        } else {
            self.push_pair(field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        let rendered = format!("{:?}", value);
        if field.name() == "message" {
            self.msg = Some(rendered);
        } else {
            self.push_pair(field.name(), &rendered);
        }
    }
}

/// Extract a concise triple (level, target, message) from a tracing Event.
///
/// The message is the `message` field when present, followed by the other
/// fields in logfmt form; events without a message render only the fields.
pub fn render_event(event: &Event<'_>) -> RenderedLog {
    let meta: &Metadata<'_> = event.metadata();
    let mut vis = LogfmtVisitor::default();
    event.record(&mut vis);
    let message = match (vis.msg, vis.fields.is_empty()) {
        (Some(msg), true) => msg,
        (Some(msg), false) => format!("{} {}", msg, vis.fields),
        (None, _) => vis.fields,
    };
    RenderedLog {
        level: meta.level().to_string(),
        target: meta.target().to_string(),
        message,
    }
}
