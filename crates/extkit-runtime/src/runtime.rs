//! Mounting loaded components as running extension instances.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Weak},
};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    Error, Result,
    config::RuntimeConfig,
    error::RenderError,
    host::{IconExtractor, MenuHost, TokenStore, UrlOpener},
    identity::{CommandMode, ExtensionIdentity, Preferences},
    loader::{self, Component, ErrorBoundary, Handler, LoadEnv, RenderOutput},
    menubar::{Action, IconResolver, MenuBarBridge, registrations_from_render},
    oauth::{OAuthSession, ProviderConfig},
    scope::ScopeStack,
    shortcut::{ActionPanel, KeyEvent, PanelOutcome},
};

/// Native collaborators the runtime talks to.
#[derive(Clone)]
pub struct RuntimeHost {
    /// Status menu host for menu-bar commands.
    pub menu: Arc<dyn MenuHost>,
    /// File icon extraction.
    pub icons: Arc<dyn IconExtractor>,
    /// Browser hand-off.
    pub opener: Arc<dyn UrlOpener>,
}

/// Owns the scope stack and every mounted instance.
pub struct Runtime {
    /// Active configuration.
    config: RuntimeConfig,
    /// Stack every instance renders and dispatches on.
    scope: ScopeStack,
    /// Native collaborators.
    host: RuntimeHost,
    /// Icon cache shared by every bridge.
    icons: Arc<IconResolver>,
    /// Mounted instances by instance id.
    instances: Mutex<HashMap<String, Arc<Instance>>>,
    /// Parent of every instance's and session's lifetime; cancelled by shutdown.
    lifetime: CancellationToken,
}

impl Runtime {
    /// Create a runtime around `scope`.
    pub fn new(config: RuntimeConfig, scope: ScopeStack, host: RuntimeHost) -> Self {
        let icons = Arc::new(IconResolver::new(host.icons.clone(), &config.icons));
        Self {
            config,
            scope,
            host,
            icons,
            instances: Mutex::new(HashMap::new()),
            lifetime: CancellationToken::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The scope stack every instance runs on.
    pub fn scope(&self) -> &ScopeStack {
        &self.scope
    }

    /// Collaborators bundles are loaded against.
    pub fn load_env(&self) -> LoadEnv {
        LoadEnv {
            scope: self.scope.clone(),
            opener: self.host.opener.clone(),
            limits: self.config.engine.clone(),
        }
    }

    /// Load a bundle from source text.
    pub fn load(&self, source: &str) -> Result<Component> {
        Ok(loader::load(source, &self.load_env())?)
    }

    /// Load a bundle from disk.
    pub fn load_file(&self, path: &Path) -> Result<Component> {
        Ok(loader::load_file(path, &self.load_env())?)
    }

    /// A sign-in session that stores its result in this runtime's token holder.
    ///
    /// Its flows end when the runtime shuts down.
    pub fn oauth_session(
        &self,
        provider: ProviderConfig,
        store: Arc<dyn TokenStore>,
    ) -> OAuthSession {
        self.session_under(&self.lifetime, provider, store)
    }

    /// A sign-in session owned by the mounted instance `ext_id`.
    ///
    /// Unmounting the instance stops any flow in progress, including its
    /// token-store poll.
    pub fn instance_oauth_session(
        &self,
        ext_id: &str,
        provider: ProviderConfig,
        store: Arc<dyn TokenStore>,
    ) -> Result<OAuthSession> {
        let instance = self
            .instance(ext_id)
            .ok_or_else(|| Error::UnknownInstance(ext_id.to_string()))?;
        Ok(self.session_under(&instance.lifetime, provider, store))
    }

    /// A session whose flows end when `owner` is cancelled.
    fn session_under(
        &self,
        owner: &CancellationToken,
        provider: ProviderConfig,
        store: Arc<dyn TokenStore>,
    ) -> OAuthSession {
        OAuthSession::new(
            provider,
            store,
            self.host.opener.clone(),
            self.scope.tokens().clone(),
        )
        .with_poll(self.config.oauth.clone())
        .with_owner(owner)
    }

    /// Start `component` under `identity` and render it once.
    ///
    /// An instance already mounted under the same id is unmounted first.
    pub async fn mount(
        &self,
        component: Component,
        identity: ExtensionIdentity,
    ) -> Result<Arc<Instance>> {
        identity.validate()?;
        let ext_id = identity.instance_id();
        let previous = self.instances.lock().remove(&ext_id);
        if let Some(old) = previous {
            old.unmount().await;
        }

        let identity = Arc::new(identity);
        let surface = match identity.command_mode {
            CommandMode::MenuBar => Surface::MenuBar(MenuBarBridge::new(
                identity.clone(),
                self.host.menu.clone(),
                self.icons.clone(),
                self.scope.clone(),
            )),
            CommandMode::View => Surface::View(Mutex::new(ActionPanel::new())),
            CommandMode::NoView => Surface::NoView,
        };
        let instance = Arc::new_cyclic(|me| Instance {
            me: me.clone(),
            ext_id: ext_id.clone(),
            component,
            identity: RwLock::new(identity),
            boundary: Arc::new(ErrorBoundary::new(ext_id.clone())),
            scope: self.scope.clone(),
            surface,
            lifetime: self.lifetime.child_token(),
        });

        info!(ext = %ext_id, mode = ?instance.mode(), "extension_mounted");
        instance.render();
        self.instances.lock().insert(ext_id, instance.clone());
        Ok(instance)
    }

    /// Look up a mounted instance.
    pub fn instance(&self, ext_id: &str) -> Option<Arc<Instance>> {
        self.instances.lock().get(ext_id).cloned()
    }

    /// Ids of every mounted instance, sorted.
    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Route a menu pick from the native host.
    ///
    /// Returns false when the instance is known but the entry is not.
    pub async fn on_menu_action(&self, ext_id: &str, item_id: &str) -> Result<bool> {
        let instance = self
            .instance(ext_id)
            .ok_or_else(|| Error::UnknownInstance(ext_id.to_string()))?;
        Ok(instance.on_menu_action(item_id).await)
    }

    /// Stop an instance and remove its menu.
    pub async fn unmount(&self, ext_id: &str) -> Result<()> {
        let instance = self
            .instances
            .lock()
            .remove(ext_id)
            .ok_or_else(|| Error::UnknownInstance(ext_id.to_string()))?;
        instance.unmount().await;
        info!(ext = %ext_id, "extension_unmounted");
        Ok(())
    }

    /// Unmount everything and end every sign-in flow started through this runtime.
    pub async fn shutdown(&self) {
        let all: Vec<Arc<Instance>> = self.instances.lock().drain().map(|(_, v)| v).collect();
        for instance in all {
            instance.unmount().await;
        }
        self.lifetime.cancel();
    }
}

/// A view action bound to its script handler.
#[derive(Clone)]
struct ViewAction {
    /// Reported when the action runs.
    title: String,
    /// Script callback.
    handler: Handler,
}

/// Where an instance's renders go.
enum Surface {
    /// Status menu.
    MenuBar(MenuBarBridge),
    /// Foreground view; only its actions are kept.
    View(Mutex<ActionPanel<ViewAction>>),
    /// Renders run for their side effects.
    NoView,
}

/// One running activation of a component.
pub struct Instance {
    /// Handle given to menu actions, so they do not keep the instance alive.
    me: Weak<Self>,
    /// `extension.command`.
    ext_id: String,
    /// The loaded bundle.
    component: Component,
    /// Replaced whole when preferences change.
    identity: RwLock<Arc<ExtensionIdentity>>,
    /// Holds the last render or handler failure.
    boundary: Arc<ErrorBoundary>,
    /// Shared with the runtime.
    scope: ScopeStack,
    /// Render target.
    surface: Surface,
    /// Cancelled on unmount; owns the instance's sign-in sessions.
    lifetime: CancellationToken,
}

impl Instance {
    /// Instance id (`extension.command`).
    pub fn ext_id(&self) -> &str {
        &self.ext_id
    }

    /// The identity the instance currently runs under.
    pub fn identity(&self) -> Arc<ExtensionIdentity> {
        self.identity.read().clone()
    }

    /// Presentation mode.
    pub fn mode(&self) -> CommandMode {
        self.identity.read().command_mode
    }

    /// The menu-bar bridge, for menu-bar commands.
    pub fn bridge(&self) -> Option<&MenuBarBridge> {
        match &self.surface {
            Surface::MenuBar(bridge) => Some(bridge),
            _ => None,
        }
    }

    /// The error contained by the most recent render or handler, if it failed.
    pub fn last_error(&self) -> Option<RenderError> {
        self.boundary.error()
    }

    /// Render under this instance's identity and push the result to its surface.
    ///
    /// Returns false when the render failed; the error stays in the boundary.
    pub fn render(&self) -> bool {
        let identity = self.identity();
        let result = {
            let _guard = self.scope.enter(identity);
            self.component.render()
        };
        let Some(output) = self.boundary.guard(result) else {
            return false;
        };
        match &self.surface {
            Surface::MenuBar(bridge) => {
                bridge.set_status(output.status.clone());
                bridge.apply_render(registrations_from_render(&output, &|h| self.bind(h)));
            }
            Surface::View(panel) => *panel.lock() = view_panel(&output),
            Surface::NoView => debug!(ext = %self.ext_id, "no_view_command_ran"),
        }
        true
    }

    /// Replace the instance's preferences and re-render.
    pub fn update_preferences(&self, preferences: Preferences) {
        let next = {
            let mut current = self.identity.write();
            let mut next = (**current).clone();
            next.preferences = preferences;
            let next = Arc::new(next);
            *current = next.clone();
            next
        };
        if let Surface::MenuBar(bridge) = &self.surface {
            bridge.set_identity(next);
        }
        self.render();
    }

    /// Fire a published menu entry.
    pub async fn on_menu_action(&self, item_id: &str) -> bool {
        match &self.surface {
            Surface::MenuBar(bridge) => bridge.on_menu_action(item_id).await,
            _ => false,
        }
    }

    /// Route a key press through the view's action panel.
    ///
    /// Runs the matched action and reports its title.
    pub async fn on_key(&self, event: &KeyEvent) -> PanelOutcome<String> {
        let outcome = match &self.surface {
            Surface::View(panel) => panel.lock().dispatch(event),
            _ => PanelOutcome::Unhandled,
        };
        match outcome {
            PanelOutcome::Run(action) => {
                self.run_scoped(action.handler).await;
                PanelOutcome::Run(action.title)
            }
            PanelOutcome::ToggleMenu => PanelOutcome::ToggleMenu,
            PanelOutcome::Unhandled => PanelOutcome::Unhandled,
        }
    }

    /// Run the view's first action, as Enter would.
    pub async fn run_primary(&self) -> Option<String> {
        let action = match &self.surface {
            Surface::View(panel) => panel.lock().primary().cloned(),
            _ => None,
        }?;
        self.run_scoped(action.handler).await;
        Some(action.title)
    }

    /// Run `handler` under this instance's identity, containing failures.
    async fn run_scoped(&self, handler: Handler) {
        let identity = self.identity();
        let component = self.component.clone();
        let boundary = self.boundary.clone();
        self.scope
            .with_shared(identity, async move {
                boundary.guard(component.run_handler(&handler));
            })
            .await;
    }

    /// Bind a script handler to a menu action that re-renders afterwards.
    fn bind(&self, handler: &Handler) -> Action {
        let me = self.me.clone();
        let handler = handler.clone();
        Action::sync(move || {
            if let Some(instance) = me.upgrade() {
                let ran = instance.component.run_handler(&handler);
                if instance.boundary.guard(ran).is_some() {
                    instance.render();
                }
            }
        })
    }

    /// End sign-in flows and remove the menu.
    async fn unmount(&self) {
        self.lifetime.cancel();
        if let Surface::MenuBar(bridge) = &self.surface {
            bridge.unmount().await;
        }
    }
}

/// Enabled actions of a render, in order, with their shortcuts.
fn view_panel(output: &RenderOutput) -> ActionPanel<ViewAction> {
    let mut panel = ActionPanel::new();
    for item in output.items() {
        if let Some(handler) = &item.on_action
            && !item.disabled
        {
            panel.push(
                item.shortcut.clone(),
                ViewAction {
                    title: item.title.clone(),
                    handler: handler.clone(),
                },
            );
        }
    }
    panel
}
