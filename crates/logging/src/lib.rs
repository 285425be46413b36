//! Logging setup shared by the extkit binary and runtime.
//!
//! [`LogArgs`] is flattened into the binary's CLI and turned into an
//! `EnvFilter` directive by [`compute_spec`]. [`fmt`] renders events as
//! logfmt lines and [`forward`] relays them to the native menu host.

use std::env;

use clap::Args;
use tracing_subscriber::EnvFilter;

pub mod fmt;
pub mod forward;

/// Target used for `print`/`debug` output coming from extension scripts.
pub const EXTENSION_TARGET: &str = "extkit::ext";

/// Tracing targets owned by this workspace. Level flags only touch these.
pub const WORKSPACE_TARGETS: &[&str] = &[
    "extkit",
    "extkit_runtime",
    "extkit_protocol",
    "keycode",
    "logging",
];

/// Log verbosity flags.
#[derive(Debug, Clone, Default, Args)]
pub struct LogArgs {
    /// Log everything from extkit crates at trace level
    #[arg(long, conflicts_with_all = ["debug", "log_level", "log_filter"])]
    pub trace: bool,

    /// Log everything from extkit crates at debug level
    #[arg(long, conflicts_with_all = ["trace", "log_level", "log_filter"])]
    pub debug: bool,

    /// Level applied to every extkit crate (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Raw filter directive, e.g. "extkit_runtime=trace,extkit::ext=debug".
    /// Takes precedence over every other flag and over RUST_LOG.
    #[arg(long)]
    pub log_filter: Option<String>,

    /// Silence output printed by extension scripts
    #[arg(long)]
    pub quiet_extensions: bool,
}

/// Directive giving every workspace target the same `level`.
pub fn workspace_level(level: &str) -> String {
    let level = level.to_ascii_lowercase();
    WORKSPACE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Resolve the filter directive from `args` and the `RUST_LOG` environment.
///
/// An explicit `--log-filter` wins, then the level flags, then `RUST_LOG`,
/// then `info` for the workspace targets. `--quiet-extensions` is applied on
/// top of whichever source was chosen.
pub fn compute_spec(args: &LogArgs) -> String {
    compute_spec_with_env(args, env::var("RUST_LOG").ok())
}

/// [`compute_spec`] with the `RUST_LOG` value supplied by the caller.
pub fn compute_spec_with_env(args: &LogArgs, rust_log: Option<String>) -> String {
    let level = if args.trace {
        Some("trace")
    } else if args.debug {
        Some("debug")
    } else {
        args.log_level.as_deref()
    };
    let base = match (&args.log_filter, level, rust_log) {
        (Some(filter), _, _) => filter.clone(),
        (None, Some(level), _) => workspace_level(level),
        (None, None, Some(env)) => env,
        (None, None, None) => workspace_level("info"),
    };
    if args.quiet_extensions {
        format!("{base},{EXTENSION_TARGET}=off")
    } else {
        base
    }
}

/// Parse a directive into an `EnvFilter`.
pub fn env_filter_from_spec(spec: &str) -> EnvFilter {
    EnvFilter::new(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins() {
        let args = LogArgs {
            trace: true,
            log_filter: Some("extkit_runtime=trace".into()),
            ..LogArgs::default()
        };
        assert_eq!(
            compute_spec_with_env(&args, Some("warn".into())),
            "extkit_runtime=trace"
        );
    }

    #[test]
    fn flags_beat_environment() {
        let args = LogArgs {
            debug: true,
            ..LogArgs::default()
        };
        let spec = compute_spec_with_env(&args, Some("warn".into()));
        assert!(spec.contains("extkit_runtime=debug"));
        assert!(!spec.contains("warn"));
    }

    #[test]
    fn environment_then_default() {
        let args = LogArgs::default();
        assert_eq!(compute_spec_with_env(&args, Some("warn".into())), "warn");
        assert_eq!(
            compute_spec_with_env(&args, None),
            workspace_level("info")
        );
    }

    #[test]
    fn quiet_extensions_appends_directive() {
        let args = LogArgs {
            quiet_extensions: true,
            ..LogArgs::default()
        };
        let spec = compute_spec_with_env(&args, None);
        assert!(spec.ends_with("extkit::ext=off"));
    }
}
