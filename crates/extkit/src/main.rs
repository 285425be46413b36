//! Binary entrypoint for the extkit host.
//!
//! Mounts one bundle against stand-in host collaborators: published menus go
//! to stdout (one message per line) and stdin lines play the part of the
//! native host's clicks, key presses and deep links.
use std::{
    env, fs, io,
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use extkit_protocol::{
    MsgFromHost,
    ipc::{HostRx, host_channel},
};
use extkit_runtime::{
    AuthorizationError, CommandMode, ConfigError, Error, ExtensionIdentity, IdentityError,
    Instance, Preferences, Runtime, RuntimeConfig, RuntimeHost, ScopeStack, TokenSlot,
    host::{
        ChannelMenuHost, DeepLinkBus, NullIconExtractor, RecordingMenuHost, RecordingUrlOpener,
    },
    oauth::{AuthState, FileTokenStore, OAuthSession, ProviderConfig},
};
use logging::{LogArgs, forward};
use thiserror::Error as ThisError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{fmt, prelude::*};

mod input;
mod opener;
mod output;

use crate::{
    input::{HostCommand, parse_line, parse_pref},
    opener::SystemUrlOpener,
    output::OutputFormat,
};

#[derive(Parser, Debug)]
#[command(name = "extkit", about = "Host extension bundles from the command line", version)]
/// Command-line interface for the `extkit` binary.
struct Cli {
    /// Logging controls
    #[command(flatten)]
    log: LogArgs,

    /// Runtime configuration file (defaults to ~/.extkit/runtime.ron)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
/// Top-level CLI subcommands.
enum Command {
    /// Mount a bundle and serve it until stdin closes.
    Run {
        /// Bundle to load.
        bundle: PathBuf,

        /// Identity and preferences.
        #[command(flatten)]
        target: TargetArgs,

        /// Output encoding for host messages.
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,

        /// Mirror runtime logs to stdout as host log messages.
        #[arg(long)]
        forward_logs: bool,

        /// Sign in with this provider (RON file) in the background.
        #[arg(long, value_name = "PATH")]
        provider: Option<PathBuf>,

        /// Token store used for sign-in (defaults to ~/.extkit/tokens.json)
        #[arg(long, value_name = "PATH")]
        tokens: Option<PathBuf>,
    },
    /// Load and render a bundle once, then exit.
    Check {
        /// Bundle to load.
        bundle: PathBuf,

        /// Identity and preferences.
        #[command(flatten)]
        target: TargetArgs,

        /// Print the menu that would be published, as JSON.
        #[arg(long)]
        dump: bool,
    },
    /// Run a sign-in flow for a provider.
    Auth {
        /// Provider description (RON).
        provider: PathBuf,

        /// Token store (defaults to ~/.extkit/tokens.json)
        #[arg(long, value_name = "PATH")]
        tokens: Option<PathBuf>,

        /// Forget the stored token instead of signing in.
        #[arg(long)]
        sign_out: bool,
    },
}

/// Presentation mode as spelled on the command line.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum ModeArg {
    /// Status-menu command.
    #[default]
    MenuBar,
    /// Command with a view and action panel.
    View,
    /// Command that only runs.
    NoView,
}

impl From<ModeArg> for CommandMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::MenuBar => Self::MenuBar,
            ModeArg::View => Self::View,
            ModeArg::NoView => Self::NoView,
        }
    }
}

/// Who the bundle runs as.
#[derive(Args, Debug)]
struct TargetArgs {
    /// Extension name (defaults to the bundle's file stem)
    #[arg(long)]
    extension: Option<String>,

    /// Command name
    #[arg(long = "command-name", default_value = "default")]
    command_name: String,

    /// Presentation mode
    #[arg(long, value_enum, default_value_t)]
    mode: ModeArg,

    /// Publisher name shown to scripts
    #[arg(long)]
    owner: Option<String>,

    /// Preference as key=value; repeatable
    #[arg(long = "pref", value_name = "KEY=VALUE")]
    prefs: Vec<String>,
}

/// Errors that end the process.
#[derive(Debug, ThisError)]
enum CliError {
    /// Loading, mounting or routing failed.
    #[error(transparent)]
    Runtime(#[from] Error),
    /// Bad runtime configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Bad extension or command name.
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// Reading input or files.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Dumping a menu.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Bad arguments.
    #[error("{0}")]
    Usage(String),
    /// Sign-in did not finish.
    #[error("{}", .0.hint())]
    Auth(AuthorizationError),
}

impl CliError {
    /// Load errors with their source excerpt; everything else as displayed.
    fn pretty(&self) -> String {
        match self {
            Self::Runtime(Error::Load(e)) => e.pretty(),
            other => other.to_string(),
        }
    }
}

/// `~/.extkit`.
fn extkit_home() -> PathBuf {
    PathBuf::from(env::var_os("HOME").unwrap_or_default()).join(".extkit")
}

/// `--config` when given, else `~/.extkit/runtime.ron` when present, else defaults.
fn load_config(explicit: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    match explicit {
        Some(path) => RuntimeConfig::load(path),
        None => RuntimeConfig::load_or_default(&extkit_home().join("runtime.ron")),
    }
}

/// Identity for `bundle`: named after the file unless `--extension` says otherwise.
fn identity_for(bundle: &Path, target: &TargetArgs) -> Result<ExtensionIdentity, CliError> {
    let extension = match &target.extension {
        Some(name) => name.clone(),
        None => bundle
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .ok_or_else(|| CliError::Usage(format!("no file name in {}", bundle.display())))?,
    };
    let mut preferences = Preferences::new();
    for spec in &target.prefs {
        let (key, value) = parse_pref(spec).map_err(|e| CliError::Usage(e.to_string()))?;
        preferences.insert(key, value);
    }
    let root = bundle.parent().unwrap_or_else(|| Path::new("."));
    let owner = target.owner.as_deref().unwrap_or("local");
    Ok(ExtensionIdentity::new(&extension, &target.command_name)?
        .with_owner(owner)
        .with_display_name(extension.clone())
        .with_mode(target.mode.into())
        .with_paths(
            root.join("assets"),
            extkit_home().join("support").join(&extension),
        )
        .with_preferences(preferences))
}

/// Provider description from a RON file.
fn read_provider(path: &Path) -> Result<ProviderConfig, CliError> {
    let text = fs::read_to_string(path)?;
    ron::from_str(&text)
        .map_err(|e| CliError::Usage(format!("invalid provider {}: {}", path.display(), e)))
}

/// `--tokens` or `~/.extkit/tokens.json`.
fn token_store(path: Option<&Path>) -> Arc<FileTokenStore> {
    let path = path.map_or_else(|| extkit_home().join("tokens.json"), Path::to_path_buf);
    Arc::new(FileTokenStore::new(path))
}

/// Print host messages until every sender is gone.
async fn print_messages(mut rx: HostRx, format: OutputFormat) {
    while let Some(msg) = rx.recv().await {
        if let Some(method) = msg.method() {
            trace!(method = method.as_str(), "host_message");
        }
        match output::render(&msg, format) {
            Ok(line) => println!("{}", line),
            Err(e) => error!(error = %e, "message_render_failed"),
        }
    }
}

/// Apply one stdin command to the mounted instance.
async fn handle_command(rt: &Runtime, instance: &Instance, links: &DeepLinkBus, cmd: HostCommand) {
    let msg = cmd.to_host_msg(instance.ext_id());
    if let Some(msg) = &msg {
        debug!(channel = msg.notification().as_str(), "host_notification");
    }
    match msg {
        Some(MsgFromHost::MenuAction { ext_id, item_id }) => {
            match rt.on_menu_action(&ext_id, &item_id).await {
                Ok(true) => {}
                Ok(false) => warn!(ext = %ext_id, item_id, "menu_action_unknown"),
                Err(e) => warn!(error = %e, "menu_action_failed"),
            }
        }
        Some(MsgFromHost::DeepLink { url }) => {
            let receivers = links.deliver(&url);
            debug!(receivers, "deep_link_delivered");
        }
        None => match cmd {
            HostCommand::Key(event) => {
                let outcome = instance.on_key(&event).await;
                info!(key = %event.key, ?outcome, "key_handled");
            }
            HostCommand::Enter => match instance.run_primary().await {
                Some(title) => info!(action = %title, "primary_action_ran"),
                None => info!("no_primary_action"),
            },
            HostCommand::Pref { key, value } => {
                let mut prefs = instance.identity().preferences.clone();
                prefs.insert(key, value);
                instance.update_preferences(prefs);
            }
            HostCommand::Click { .. } | HostCommand::Link(_) | HostCommand::Quit => {}
        },
    }
    if let Some(bridge) = instance.bridge() {
        bridge.flush().await;
    }
    if let Some(err) = instance.last_error() {
        warn!(ext = %instance.ext_id(), error = %err.message, line = ?err.line, "extension_error");
    }
}

/// Mount `bundle` and drive it from stdin until `quit` or EOF.
async fn run(
    config: RuntimeConfig,
    bundle: &Path,
    target: &TargetArgs,
    format: OutputFormat,
    forward_logs: bool,
    sign_in: Option<(ProviderConfig, Arc<FileTokenStore>)>,
) -> Result<(), CliError> {
    let identity = identity_for(bundle, target)?;
    let (tx, rx) = host_channel();
    if forward_logs {
        forward::set_sink(tx.clone());
    }
    let printer = tokio::spawn(print_messages(rx, format));
    let links = DeepLinkBus::new();

    let rt = Runtime::new(
        config,
        ScopeStack::default(),
        RuntimeHost {
            menu: Arc::new(ChannelMenuHost::new(tx)),
            icons: Arc::new(NullIconExtractor),
            opener: Arc::new(SystemUrlOpener),
        },
    );
    let component = rt.load_file(bundle)?;
    let instance = rt.mount(component, identity).await?;
    if let Some(bridge) = instance.bridge() {
        bridge.flush().await;
    }

    let mut sign_in_task = None;
    if let Some((provider, store)) = sign_in {
        let session = rt
            .instance_oauth_session(instance.ext_id(), provider, store)?
            .with_deep_links(Arc::new(links.clone()));
        let instance = instance.clone();
        sign_in_task = Some(tokio::spawn(async move {
            let state = session.authorize().await;
            info!(provider = %session.provider().provider_key, ?state, "sign_in_finished");
            if state == AuthState::Authorized {
                instance.render();
            }
        }));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Ok(Some(HostCommand::Quit)) => break,
            Ok(Some(cmd)) => handle_command(&rt, &instance, &links, cmd).await,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "bad_input"),
        }
    }

    rt.shutdown().await;
    if let Some(task) = sign_in_task
        && let Err(e) = task.await
    {
        error!(error = %e, "sign_in_task_failed");
    }
    forward::clear_sink();
    drop(instance);
    drop(rt);
    if let Err(e) = printer.await {
        error!(error = %e, "printer_failed");
    }
    Ok(())
}

/// Render `bundle` once against a recording host and report what it published.
async fn check(
    config: RuntimeConfig,
    bundle: &Path,
    target: &TargetArgs,
    dump: bool,
) -> Result<(), CliError> {
    let identity = identity_for(bundle, target)?;
    let ext_id = identity.instance_id();
    let host = Arc::new(RecordingMenuHost::new());
    let rt = Runtime::new(
        config,
        ScopeStack::default(),
        RuntimeHost {
            menu: host.clone(),
            icons: Arc::new(NullIconExtractor),
            opener: Arc::new(RecordingUrlOpener::refusing()),
        },
    );
    let instance = rt.mount(rt.load_file(bundle)?, identity).await?;
    if let Some(bridge) = instance.bridge() {
        bridge.flush().await;
    }
    if let Some(err) = instance.last_error() {
        return Err(Error::Render(err).into());
    }
    if dump {
        let menu = host.last_publish(&ext_id).unwrap_or_default();
        println!("{}", serde_json::to_string_pretty(&menu)?);
    } else {
        println!("OK");
    }
    rt.shutdown().await;
    Ok(())
}

/// Copy `link` lines from stdin onto the bus; other lines are ignored.
async fn forward_links(links: &DeepLinkBus) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Ok(Some(HostCommand::Link(url))) => {
                links.deliver(&url);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "bad_input"),
        }
    }
    Ok(())
}

/// Sign in to `provider`, or sign out with `sign_out`.
async fn auth(
    config: &RuntimeConfig,
    provider: ProviderConfig,
    store: Arc<FileTokenStore>,
    sign_out: bool,
) -> Result<(), CliError> {
    let links = DeepLinkBus::new();
    let tokens = TokenSlot::new();
    let session = OAuthSession::new(provider, store, Arc::new(SystemUrlOpener), tokens.clone())
        .with_poll(config.oauth.clone())
        .with_deep_links(Arc::new(links.clone()));

    if sign_out {
        session.sign_out().await;
        println!("signed out of {}", session.provider().provider_key);
        return Ok(());
    }

    eprintln!("Waiting for sign-in. Paste the callback as `link <url>` if the browser does not return.");
    let authorize = session.authorize();
    tokio::pin!(authorize);
    let state = tokio::select! {
        state = &mut authorize => state,
        read = forward_links(&links) => {
            read?;
            // Stdin closed; the poll can still finish the flow.
            authorize.await
        }
    };
    match state {
        AuthState::Authorized => {
            let kind = tokens.get().map(|r| r.kind.to_string()).unwrap_or_default();
            println!("authorized ({})", kind);
            Ok(())
        }
        AuthState::Error(hint) => Err(CliError::Auth(AuthorizationError::Failed(hint))),
        other => Err(CliError::Usage(format!("sign-in ended in {:?}", other))),
    }
}

/// Entry point.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let spec = logging::compute_spec(&cli.log);
    tracing_subscriber::registry()
        .with(logging::env_filter_from_spec(&spec))
        .with(fmt::layer().without_time().with_writer(io::stderr))
        .with(forward::layer())
        .try_init()
        .ok();

    let result = match load_config(cli.config.as_deref()) {
        Err(e) => Err(CliError::from(e)),
        Ok(config) => match &cli.command {
            Command::Run {
                bundle,
                target,
                format,
                forward_logs,
                provider,
                tokens,
            } => {
                let sign_in = match provider {
                    Some(path) => match read_provider(path) {
                        Ok(p) => Some((p, token_store(tokens.as_deref()))),
                        Err(e) => {
                            eprintln!("{}", e.pretty());
                            process::exit(1);
                        }
                    },
                    None => None,
                };
                run(config, bundle, target, *format, *forward_logs, sign_in).await
            }
            Command::Check {
                bundle,
                target,
                dump,
            } => check(config, bundle, target, *dump).await,
            Command::Auth {
                provider,
                tokens,
                sign_out,
            } => match read_provider(provider) {
                Ok(p) => auth(&config, p, token_store(tokens.as_deref()), *sign_out).await,
                Err(e) => Err(e),
            },
        },
    };

    if let Err(e) = result {
        eprintln!("{}", e.pretty());
        process::exit(1);
    }
}
