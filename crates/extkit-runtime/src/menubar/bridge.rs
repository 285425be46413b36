//! Keeps one instance's status menu in step with its registrations.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use extkit_protocol::{Icon, MenuItemNode, MenuNode, MenuPublish};
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::watch, task};
use tracing::{debug, trace, warn};

use super::{
    Action, IconResolver, ItemSpec, LayoutNode, MenuRegistration, PendingRegistration,
    RegistrationKind, SectionInfo, SubmenuSpec, layout,
};
use crate::{
    host::MenuHost,
    identity::ExtensionIdentity,
    loader::{IconSpec, StatusSpec},
    scope::ScopeStack,
};

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    /// Nothing registered yet.
    Idle,
    /// Changes are waiting for the next sync.
    Registering,
    /// A sync is resolving icons or publishing.
    Syncing,
    /// The host shows the latest registrations.
    Published,
    /// Unmounted; the bridge does nothing further.
    TornDown,
}

/// Mutable bridge state, guarded by one lock.
struct State {
    /// Lifecycle phase.
    phase: BridgePhase,
    /// Top-level registrations by id.
    registrations: HashMap<String, MenuRegistration>,
    /// Order handed to the next new registration.
    next_order: u64,
    /// Status item icon and text.
    status: StatusSpec,
    /// Identity actions run under.
    identity: Arc<ExtensionIdentity>,
    /// Actions of the last successful publish, by dispatch id.
    dispatch: HashMap<String, Action>,
    /// Changed since the last snapshot.
    dirty: bool,
    /// A sync task is queued or running.
    sync_scheduled: bool,
}

/// Shared between clones of a bridge.
struct Inner {
    /// Instance id the menu is published under.
    ext_id: String,
    /// Where menus go.
    host: Arc<dyn MenuHost>,
    /// Shared icon cache.
    icons: Arc<IconResolver>,
    /// Stack actions run on.
    scope: ScopeStack,
    /// Cleared on unmount, readable without the state lock.
    mounted: AtomicBool,
    /// Everything else.
    state: Mutex<State>,
    /// True while no sync is scheduled or running.
    idle: watch::Sender<bool>,
}

/// Projects one menu-bar instance's registrations onto the native menu host.
///
/// Registration calls mark the bridge dirty and schedule a single sync task
/// that runs after the current task yields, so a burst of registrations
/// produces one publish. Clones share state.
#[derive(Clone)]
pub struct MenuBarBridge {
    /// Shared by clones.
    inner: Arc<Inner>,
}

/// What one sync publishes, copied out so the lock is not held across awaits.
struct Snapshot {
    /// Registrations in no particular order; layout sorts them.
    registrations: Vec<MenuRegistration>,
    /// Status item at snapshot time.
    status: StatusSpec,
    /// Identity whose assets path resolves icons.
    identity: Arc<ExtensionIdentity>,
}

impl MenuBarBridge {
    /// Create a mounted bridge publishing as `identity.instance_id()`.
    pub fn new(
        identity: Arc<ExtensionIdentity>,
        host: Arc<dyn MenuHost>,
        icons: Arc<IconResolver>,
        scope: ScopeStack,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ext_id: identity.instance_id(),
                host,
                icons,
                scope,
                mounted: AtomicBool::new(true),
                state: Mutex::new(State {
                    phase: BridgePhase::Idle,
                    registrations: HashMap::new(),
                    next_order: 0,
                    status: StatusSpec::default(),
                    identity,
                    dispatch: HashMap::new(),
                    dirty: false,
                    sync_scheduled: false,
                }),
                idle: watch::channel(true).0,
            }),
        }
    }

    /// Instance id the menu is published under.
    pub fn ext_id(&self) -> &str {
        &self.inner.ext_id
    }

    /// Current phase.
    pub fn phase(&self) -> BridgePhase {
        self.inner.state.lock().phase
    }

    /// False once unmounted.
    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    /// Number of top-level registrations.
    pub fn len(&self) -> usize {
        self.inner.state.lock().registrations.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the entries the host can currently fire.
    pub fn dispatch_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.state.lock().dispatch.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register or replace an entry.
    pub fn register_item(&self, id: impl Into<String>, item: ItemSpec, section: SectionInfo) {
        self.register(id.into(), RegistrationKind::Item(item), section);
    }

    /// Register or replace a nested menu.
    pub fn register_submenu(
        &self,
        id: impl Into<String>,
        submenu: SubmenuSpec,
        section: SectionInfo,
    ) {
        self.register(id.into(), RegistrationKind::Submenu(submenu), section);
    }

    /// Register or replace a separator.
    pub fn register_separator(&self, id: impl Into<String>, section: SectionInfo) {
        self.register(id.into(), RegistrationKind::Separator, section);
    }

    /// Register or replace a section start.
    pub fn register_section(&self, id: impl Into<String>, section: SectionInfo) {
        self.register(id.into(), RegistrationKind::SectionMarker, section);
    }

    /// Remove an entry. Unknown ids are ignored.
    pub fn unregister(&self, id: &str) {
        let removed = {
            let mut st = self.inner.state.lock();
            st.phase != BridgePhase::TornDown && st.registrations.remove(id).is_some()
        };
        if removed {
            self.schedule_sync();
        }
    }

    /// Replace the status item's icon and text.
    pub fn set_status(&self, status: StatusSpec) {
        let changed = {
            let mut st = self.inner.state.lock();
            let changed = st.phase != BridgePhase::TornDown && st.status != status;
            st.status = status;
            changed
        };
        if changed {
            self.schedule_sync();
        }
    }

    /// Swap in a newer identity; later actions run under it.
    pub fn set_identity(&self, identity: Arc<ExtensionIdentity>) {
        self.inner.state.lock().identity = identity;
    }

    /// Replace every registration with `entries`.
    ///
    /// Ids that disappear are unregistered, surviving ids keep their order
    /// and new ids are appended after everything registered so far.
    pub fn apply_render(&self, entries: Vec<PendingRegistration>) {
        {
            let mut st = self.inner.state.lock();
            if st.phase == BridgePhase::TornDown {
                return;
            }
            let keep: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
            st.registrations.retain(|id, _| keep.contains(id.as_str()));
            for entry in entries {
                upsert(&mut st, entry.id, entry.kind, entry.section);
            }
        }
        self.schedule_sync();
    }

    /// Upsert one registration and schedule a sync.
    fn register(&self, id: String, kind: RegistrationKind, section: SectionInfo) {
        {
            let mut st = self.inner.state.lock();
            if st.phase == BridgePhase::TornDown {
                debug!(ext = %self.inner.ext_id, id, "register_after_unmount");
                return;
            }
            upsert(&mut st, id, kind, section);
        }
        self.schedule_sync();
    }

    /// Mark dirty and queue a sync task unless one is already queued.
    ///
    /// Outside a tokio runtime nothing is queued; [`sync_now`](Self::sync_now) picks it up.
    fn schedule_sync(&self) {
        {
            let mut st = self.inner.state.lock();
            if st.phase == BridgePhase::TornDown {
                return;
            }
            st.dirty = true;
            if st.phase != BridgePhase::Syncing {
                st.phase = BridgePhase::Registering;
            }
            if st.sync_scheduled {
                return;
            }
            if Handle::try_current().is_err() {
                trace!(ext = %self.inner.ext_id, "sync_deferred_no_runtime");
                return;
            }
            st.sync_scheduled = true;
        }
        self.inner.idle.send_replace(false);
        let this = self.clone();
        tokio::spawn(async move {
            task::yield_now().await;
            this.run_sync().await;
        });
    }

    /// Wait until no sync is scheduled or running.
    pub async fn flush(&self) {
        let mut rx = self.inner.idle.subscribe();
        let _ignored = rx.wait_for(|idle| *idle).await;
    }

    /// Run a sync on the calling task if changes are pending and none is scheduled.
    pub async fn sync_now(&self) {
        {
            let mut st = self.inner.state.lock();
            if st.sync_scheduled || !st.dirty {
                return;
            }
            st.sync_scheduled = true;
        }
        self.inner.idle.send_replace(false);
        self.run_sync().await;
    }

    /// Release the sync slot and wake flushers.
    fn finish_sync(&self, st: &mut State) {
        st.sync_scheduled = false;
        self.inner.idle.send_replace(true);
    }

    /// Publish snapshots until nothing changed while the last one was in flight.
    async fn run_sync(&self) {
        loop {
            let snap = {
                let mut st = self.inner.state.lock();
                if !self.is_mounted() || !st.dirty {
                    self.finish_sync(&mut st);
                    return;
                }
                st.dirty = false;
                st.phase = BridgePhase::Syncing;
                Snapshot {
                    registrations: st.registrations.values().cloned().collect(),
                    status: st.status.clone(),
                    identity: st.identity.clone(),
                }
            };

            let nodes = layout(&snap.registrations);
            let mut specs = HashSet::new();
            collect_icons(&nodes, &mut specs);
            if let Some(icon) = &snap.status.icon {
                specs.insert(icon.clone());
            }
            let icons = self
                .inner
                .icons
                .resolve_all(specs, &snap.identity.assets_path)
                .await;
            if !self.is_mounted() {
                trace!(ext = %self.inner.ext_id, "sync_abandoned");
                self.finish_sync(&mut self.inner.state.lock());
                return;
            }

            let mut dispatch = HashMap::new();
            let menu = MenuPublish {
                icon: lookup(&icons, snap.status.icon.as_ref()),
                title: snap.status.title.clone(),
                tooltip: snap.status.tooltip.clone(),
                items: serialize(&nodes, &icons, &mut dispatch),
            };
            let entries = menu.interactive_count();
            let result = self.inner.host.publish(&self.inner.ext_id, menu).await;

            let mut st = self.inner.state.lock();
            if !self.is_mounted() {
                self.finish_sync(&mut st);
                return;
            }
            match result {
                Ok(()) => {
                    debug!(ext = %self.inner.ext_id, entries, "menu_published");
                    st.dispatch = dispatch;
                    st.phase = BridgePhase::Published;
                }
                Err(e) => {
                    warn!(ext = %self.inner.ext_id, error = %e, "menu_publish_failed");
                    st.phase = BridgePhase::Registering;
                }
            }
            if st.dirty {
                st.phase = BridgePhase::Registering;
            }
        }
    }

    /// Fire a published entry under the instance's latest identity.
    ///
    /// Returns false when the id is unknown or the bridge is unmounted.
    pub async fn on_menu_action(&self, item_id: &str) -> bool {
        let (action, identity) = {
            let st = self.inner.state.lock();
            if st.phase == BridgePhase::TornDown {
                return false;
            }
            (st.dispatch.get(item_id).cloned(), st.identity.clone())
        };
        let Some(action) = action else {
            debug!(ext = %self.inner.ext_id, item_id, "menu_action_unknown");
            return false;
        };
        self.inner
            .scope
            .with_shared(identity, async move { action.invoke().await })
            .await;
        true
    }

    /// Tear down: drop all actions and ask the host to remove the status item.
    pub async fn unmount(&self) {
        {
            let mut st = self.inner.state.lock();
            if st.phase == BridgePhase::TornDown {
                return;
            }
            self.inner.mounted.store(false, Ordering::SeqCst);
            st.phase = BridgePhase::TornDown;
            st.dispatch.clear();
            st.registrations.clear();
            st.dirty = false;
        }
        if let Err(e) = self.inner.host.dispose(&self.inner.ext_id).await {
            warn!(ext = %self.inner.ext_id, error = %e, "menu_dispose_failed");
        }
    }
}

/// Replace an entry in place, or append a new one after everything else.
fn upsert(st: &mut State, id: String, kind: RegistrationKind, section: SectionInfo) {
    if let Some(existing) = st.registrations.get_mut(&id) {
        existing.kind = kind;
        existing.section = section;
        return;
    }
    let order = st.next_order;
    st.next_order += 1;
    st.registrations.insert(
        id.clone(),
        MenuRegistration {
            id,
            kind,
            section,
            order,
        },
    );
}

/// Every icon a laid-out menu refers to.
fn collect_icons(nodes: &[LayoutNode], out: &mut HashSet<IconSpec>) {
    /// An item's icon and its alternate's.
    fn item_icons(item: &ItemSpec, out: &mut HashSet<IconSpec>) {
        if let Some(icon) = &item.icon {
            out.insert(icon.clone());
        }
        if let Some(alt) = &item.alternate {
            item_icons(alt, out);
        }
    }
    for node in nodes {
        match node {
            LayoutNode::Item { item, .. } => item_icons(item, out),
            LayoutNode::Submenu { icon, children, .. } => {
                if let Some(icon) = icon {
                    out.insert(icon.clone());
                }
                collect_icons(children, out);
            }
            LayoutNode::Separator | LayoutNode::Label(_) => {}
        }
    }
}

/// A resolved icon, or the empty icon.
fn lookup(icons: &HashMap<IconSpec, Icon>, spec: Option<&IconSpec>) -> Icon {
    spec.and_then(|s| icons.get(s).cloned()).unwrap_or_default()
}

/// Dispatch id for an entry, or its option-key alternate.
fn dispatch_id(reg_id: &str, alternate: bool) -> String {
    if alternate {
        format!("alt:{}", reg_id)
    } else {
        format!("item:{}", reg_id)
    }
}

/// Wire form of an item, recording its enabled actions in `dispatch`.
fn serialize_item(
    reg_id: &str,
    item: &ItemSpec,
    alternate: bool,
    icons: &HashMap<IconSpec, Icon>,
    dispatch: &mut HashMap<String, Action>,
) -> MenuItemNode {
    let id = dispatch_id(reg_id, alternate);
    if let Some(action) = &item.on_action
        && !item.disabled
    {
        dispatch.insert(id.clone(), action.clone());
    }
    MenuItemNode {
        dispatch_id: id,
        title: item.title.clone(),
        subtitle: item.subtitle.clone(),
        tooltip: item.tooltip.clone(),
        icon: lookup(icons, item.icon.as_ref()),
        shortcut: item.shortcut.as_ref().map(|s| s.canonical()),
        disabled: item.disabled,
        alternate: if alternate {
            None
        } else {
            item.alternate
                .as_ref()
                .map(|alt| Box::new(serialize_item(reg_id, alt, true, icons, dispatch)))
        },
    }
}

/// Wire form of a laid-out menu.
fn serialize(
    nodes: &[LayoutNode],
    icons: &HashMap<IconSpec, Icon>,
    dispatch: &mut HashMap<String, Action>,
) -> Vec<MenuNode> {
    nodes
        .iter()
        .map(|node| match node {
            LayoutNode::Item { id, item } => {
                MenuNode::Item(serialize_item(id, item, false, icons, dispatch))
            }
            LayoutNode::Separator => MenuNode::Separator,
            LayoutNode::Label(title) => MenuNode::Label {
                title: title.clone(),
            },
            LayoutNode::Submenu {
                title,
                icon,
                tooltip,
                children,
                ..
            } => MenuNode::Submenu {
                title: title.clone(),
                icon: lookup(icons, icon.as_ref()),
                tooltip: tooltip.clone(),
                children: serialize(children, icons, dispatch),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Duration};

    use async_trait::async_trait;
    use tokio::{
        runtime::Builder,
        sync::{Notify, Semaphore},
    };

    use super::*;
    use crate::{
        config::IconConfig,
        error::PublishError,
        host::{HostCall, NullIconExtractor, RecordingMenuHost},
    };

    fn bridge(host: Arc<dyn MenuHost>) -> MenuBarBridge {
        let identity = ExtensionIdentity::new("github", "inbox").unwrap();
        MenuBarBridge::new(
            Arc::new(identity),
            host,
            Arc::new(IconResolver::new(
                Arc::new(NullIconExtractor),
                &IconConfig::default(),
            )),
            ScopeStack::default(),
        )
    }

    fn titled(title: &str) -> ItemSpec {
        ItemSpec {
            title: title.into(),
            ..ItemSpec::default()
        }
    }

    #[tokio::test]
    async fn burst_of_registrations_publishes_once() {
        let host = Arc::new(RecordingMenuHost::new());
        let b = bridge(host.clone());
        b.register_item("a", titled("A"), SectionInfo::default());
        b.register_item("b", titled("B"), SectionInfo::default());
        b.register_separator("s", SectionInfo::default());
        assert_eq!(b.phase(), BridgePhase::Registering);
        b.flush().await;

        let published = host.publishes_for("github.inbox");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].items.len(), 2);
        assert_eq!(b.phase(), BridgePhase::Published);
    }

    #[tokio::test]
    async fn failed_publish_waits_for_next_registration() {
        let host = Arc::new(RecordingMenuHost::new());
        host.fail_next_publishes(1);
        let b = bridge(host.clone());
        b.register_item("a", titled("A"), SectionInfo::default());
        b.flush().await;
        assert!(host.publishes_for("github.inbox").is_empty());
        assert_eq!(b.phase(), BridgePhase::Registering);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(host.publishes_for("github.inbox").is_empty());

        b.register_item("b", titled("B"), SectionInfo::default());
        b.flush().await;
        assert_eq!(host.publishes_for("github.inbox").len(), 1);
    }

    #[tokio::test]
    async fn actions_are_dispatched_and_removed_on_unmount() {
        let host = Arc::new(RecordingMenuHost::new());
        let b = bridge(host.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        b.register_item(
            "a",
            ItemSpec {
                on_action: Some(Action::sync(move || {
                    h.fetch_add(1, Ordering::SeqCst);
                })),
                alternate: Some(Box::new(titled("A+"))),
                ..titled("A")
            },
            SectionInfo::default(),
        );
        b.flush().await;
        assert_eq!(b.dispatch_ids(), ["item:a"]);
        let menu = host.last_publish("github.inbox").unwrap();
        match &menu.items[0] {
            MenuNode::Item(item) => {
                assert_eq!(item.dispatch_id, "item:a");
                assert_eq!(
                    item.alternate.as_ref().map(|a| a.dispatch_id.as_str()),
                    Some("alt:a")
                );
            }
            other => panic!("expected item, got {other:?}"),
        }

        assert!(b.on_menu_action("item:a").await);
        assert!(!b.on_menu_action("alt:a").await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        b.unmount().await;
        assert!(!b.on_menu_action("item:a").await);
        assert_eq!(
            host.calls().last(),
            Some(&HostCall::Dispose {
                ext_id: "github.inbox".into()
            })
        );
        b.register_item("late", titled("Late"), SectionInfo::default());
        b.flush().await;
        assert_eq!(host.publishes_for("github.inbox").len(), 1);
    }

    #[tokio::test]
    async fn imperative_sections_submenus_and_removal() {
        let host = Arc::new(RecordingMenuHost::new());
        let b = bridge(host.clone());
        let recent = SectionInfo::new("recent", Some("Recent".into()));
        b.register_item("top", titled("Top"), SectionInfo::default());
        b.register_section("recent", recent.clone());
        b.register_item(
            "first",
            ItemSpec {
                on_action: Some(Action::sync(|| {})),
                ..titled("First")
            },
            recent.clone(),
        );
        b.register_submenu(
            "more",
            SubmenuSpec {
                title: "More".into(),
                children: vec![MenuRegistration {
                    id: "deep".into(),
                    kind: RegistrationKind::Item(ItemSpec {
                        on_action: Some(Action::sync(|| {})),
                        ..titled("Deep")
                    }),
                    section: SectionInfo::default(),
                    order: 0,
                }],
                ..SubmenuSpec::default()
            },
            recent,
        );
        b.flush().await;

        let menu = host.last_publish("github.inbox").unwrap();
        assert_eq!(menu.items.len(), 5);
        assert!(matches!(menu.items[1], MenuNode::Separator));
        assert!(matches!(&menu.items[2], MenuNode::Label { title } if title == "Recent"));
        match &menu.items[4] {
            MenuNode::Submenu { title, children, .. } => {
                assert_eq!(title, "More");
                assert_eq!(children.len(), 1);
            }
            other => panic!("expected submenu, got {other:?}"),
        }
        assert_eq!(b.dispatch_ids(), ["item:deep", "item:first"]);

        b.unregister("more");
        b.unregister("missing");
        b.flush().await;
        assert_eq!(b.dispatch_ids(), ["item:first"]);
        assert_eq!(host.last_publish("github.inbox").unwrap().items.len(), 4);
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn registrations_outside_a_runtime_wait_for_sync_now() {
        let host = Arc::new(RecordingMenuHost::new());
        let b = bridge(host.clone());
        b.register_item("a", titled("A"), SectionInfo::default());
        assert_eq!(b.phase(), BridgePhase::Registering);

        let rt = Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(b.sync_now());
        assert_eq!(host.publishes_for("github.inbox").len(), 1);
        assert_eq!(b.phase(), BridgePhase::Published);

        // Nothing dirty: a second call publishes nothing.
        rt.block_on(b.sync_now());
        assert_eq!(host.publishes_for("github.inbox").len(), 1);
    }

    /// Holds each publish until the test lets it through.
    struct GatedHost {
        inner: RecordingMenuHost,
        entered: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl MenuHost for GatedHost {
        async fn publish(&self, ext_id: &str, menu: MenuPublish) -> Result<(), PublishError> {
            self.entered.notify_one();
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.inner.publish(ext_id, menu).await
        }

        async fn dispose(&self, ext_id: &str) -> Result<(), PublishError> {
            self.inner.dispose(ext_id).await
        }
    }

    fn status(title: &str) -> StatusSpec {
        StatusSpec {
            title: Some(title.into()),
            ..StatusSpec::default()
        }
    }

    #[tokio::test]
    async fn status_changed_during_a_publish_goes_out_next() {
        let host = Arc::new(GatedHost {
            inner: RecordingMenuHost::new(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        let b = bridge(host.clone());
        b.set_status(status("1 unread"));
        host.entered.notified().await;
        assert_eq!(b.phase(), BridgePhase::Syncing);

        b.set_status(status("2 unread"));
        assert_eq!(b.phase(), BridgePhase::Syncing);
        host.gate.add_permits(2);
        b.flush().await;

        let titles: Vec<Option<String>> = host
            .inner
            .publishes_for("github.inbox")
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, [Some("1 unread".to_string()), Some("2 unread".to_string())]);
        assert_eq!(b.phase(), BridgePhase::Published);
    }

    #[tokio::test]
    async fn render_diff_keeps_surviving_order() {
        let host = Arc::new(RecordingMenuHost::new());
        let b = bridge(host.clone());
        let pending = |ids: &[&str]| {
            ids.iter()
                .map(|id| PendingRegistration {
                    id: id.to_string(),
                    kind: RegistrationKind::Item(titled(id)),
                    section: SectionInfo::default(),
                })
                .collect::<Vec<_>>()
        };
        b.apply_render(pending(&["a", "b", "c"]));
        b.flush().await;
        b.apply_render(pending(&["d", "c", "a"]));
        b.flush().await;

        let titles: Vec<String> = host
            .last_publish("github.inbox")
            .unwrap()
            .items
            .iter()
            .filter_map(|n| match n {
                MenuNode::Item(i) => Some(i.title.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(titles, ["a", "c", "d"]);
    }
}
