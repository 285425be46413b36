//! Forward runtime log events to the native menu host.
//!
//! When a host connection is attached with [`set_sink`], every event that
//! passes the subscriber's filter is rendered with [`crate::fmt`] and sent as
//! [`MsgToHost::Log`]. Without a sink the layer does nothing.

use std::sync::{
    OnceLock,
    atomic::{AtomicU64, Ordering},
};

use extkit_protocol::{MsgToHost, ipc::HostTx};
use parking_lot::Mutex;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::fmt;

/// Host connection that receives forwarded logs, if any.
static LOG_SINK: OnceLock<Mutex<Option<HostTx>>> = OnceLock::new();

/// Number of events rendered and sent since process start.
static FORWARDED: AtomicU64 = AtomicU64::new(0);

/// The sink slot, created on first use.
fn sink() -> &'static Mutex<Option<HostTx>> {
    LOG_SINK.get_or_init(|| Mutex::new(None))
}

/// Attach the host channel that should receive log lines.
pub fn set_sink(tx: HostTx) {
    *sink().lock() = Some(tx);
}

/// Detach the host channel.
pub fn clear_sink() {
    *sink().lock() = None;
}

/// Total number of events forwarded so far.
pub fn forwarded_count() -> u64 {
    FORWARDED.load(Ordering::Relaxed)
}

/// Tracing layer that mirrors events to the host when a sink is attached.
pub struct ForwardLayer;

impl<S> Layer<S> for ForwardLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let tx_opt = { sink().lock().clone() };
        let Some(tx) = tx_opt else { return };

        let r = fmt::render_event(event);
        let msg = MsgToHost::Log {
            level: r.level,
            target: r.target,
            message: r.message,
        };
        if tx.send(msg).is_err() {
            // Host went away.
            clear_sink();
        } else {
            FORWARDED.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Create the forwarding layer instance to add to your subscriber.
pub fn layer() -> ForwardLayer {
    ForwardLayer
}
