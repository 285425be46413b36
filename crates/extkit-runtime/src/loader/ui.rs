//! The `ui` surface: the render builder passed to components and the nodes it produces.
//!
//! A component is a script function taking one argument, the builder:
//!
//! ```rhai
//! fn render(ui) {
//!     ui.status(#{ icon: ui::emoji("🔔"), title: "3" });
//!     ui.section(#{ title: "Inbox" }, |s| {
//!         s.item(#{ title: "Open inbox", shortcut: "cmd+o", on_action: || api::open_url("https://example.com") });
//!     });
//!     ui.separator();
//!     ui.submenu(#{ title: "More" }, |m| m.item(#{ title: "Settings" }));
//! }
//! export_default(Fn("render"));
//! ```

use std::{
    collections::HashSet,
    fmt, mem,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use rhai::{
    Dynamic, Engine, EvalAltResult, FnPtr, Map, Module, NativeCallContext, serde::from_dynamic,
};
use serde::Deserialize;

use super::{boxed_validation_error, lock_unpoisoned};
use crate::shortcut::Shortcut;

/// Where an icon's pixels come from, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IconKind {
    /// A file; relative paths resolve against the extension's assets directory.
    File(PathBuf),
    /// An inline `data:` URL.
    DataUrl(String),
    /// An emoji grapheme.
    Emoji(String),
}

/// An icon as declared by a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IconSpec {
    /// Pixel source.
    pub kind: IconKind,
    /// Tint for light/dark menu bars.
    pub template: bool,
}

impl IconSpec {
    /// Interpret a bare string: `data:` URLs, then anything path-like, then emoji.
    pub fn parse(value: &str) -> Self {
        let kind = if value.starts_with("data:") {
            IconKind::DataUrl(value.to_string())
        } else if value.contains('/') || Path::new(value).extension().is_some() {
            IconKind::File(PathBuf::from(value))
        } else {
            IconKind::Emoji(value.to_string())
        };
        Self {
            kind,
            template: false,
        }
    }
}

/// A script callback attached to an entry.
#[derive(Clone)]
pub struct Handler {
    /// Script function, possibly with curried arguments.
    pub(crate) func: FnPtr,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("fn", &self.func.fn_name())
            .finish_non_exhaustive()
    }
}

/// A clickable entry.
#[derive(Debug, Clone)]
pub struct UiItem {
    /// Stable id within the instance.
    pub id: String,
    /// Primary label.
    pub title: String,
    /// Secondary label.
    pub subtitle: Option<String>,
    /// Hover text.
    pub tooltip: Option<String>,
    /// Leading icon.
    pub icon: Option<IconSpec>,
    /// Keyboard shortcut.
    pub shortcut: Option<Shortcut>,
    /// Greyed out.
    pub disabled: bool,
    /// Callback run when the entry is activated.
    pub on_action: Option<Handler>,
    /// Variant activated with the option key held.
    pub alternate: Option<Box<Self>>,
}

/// One rendered node.
#[derive(Debug, Clone)]
pub enum UiNode {
    /// Clickable entry.
    Item(UiItem),
    /// Horizontal rule.
    Separator {
        /// Stable id.
        id: String,
    },
    /// Nested menu.
    Submenu {
        /// Stable id.
        id: String,
        /// Label.
        title: String,
        /// Leading icon.
        icon: Option<IconSpec>,
        /// Hover text.
        tooltip: Option<String>,
        /// Child nodes.
        children: Vec<Self>,
    },
    /// Group of nodes separated from their neighbours.
    Section {
        /// Stable id.
        id: String,
        /// Optional heading.
        title: Option<String>,
        /// Child nodes.
        children: Vec<Self>,
    },
}

impl UiNode {
    /// Id of the node.
    pub fn id(&self) -> &str {
        match self {
            Self::Item(item) => &item.id,
            Self::Separator { id }
            | Self::Submenu { id, .. }
            | Self::Section { id, .. } => id,
        }
    }
}

/// Status item properties for menu-bar commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSpec {
    /// Status icon.
    pub icon: Option<IconSpec>,
    /// Status text.
    pub title: Option<String>,
    /// Hover text.
    pub tooltip: Option<String>,
}

/// Everything one render produced.
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    /// Top-level nodes in declaration order.
    pub nodes: Vec<UiNode>,
    /// Status item properties.
    pub status: StatusSpec,
}

impl RenderOutput {
    /// Visit every item, including nested and alternate ones.
    pub fn items(&self) -> Vec<&UiItem> {
        /// Depth-first, alternates right after their parent.
        fn walk<'a>(nodes: &'a [UiNode], out: &mut Vec<&'a UiItem>) {
            for node in nodes {
                match node {
                    UiNode::Item(item) => {
                        out.push(item);
                        if let Some(alt) = &item.alternate {
                            out.push(alt);
                        }
                    }
                    UiNode::Submenu { children, .. } | UiNode::Section { children, .. } => {
                        walk(children, out);
                    }
                    UiNode::Separator { .. } => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.nodes, &mut out);
        out
    }
}

/// State shared by a root builder and its children.
#[derive(Debug, Default)]
struct Shared {
    /// Last `status` call wins.
    status: StatusSpec,
    /// Every id claimed so far in this render.
    ids: HashSet<String>,
}

/// The builder handed to a component's render function.
#[derive(Clone)]
pub struct UiBuilder {
    /// Nodes added at this level.
    nodes: Arc<Mutex<Vec<UiNode>>>,
    /// Render-wide state.
    shared: Arc<Mutex<Shared>>,
    /// Parent path plus `/`; empty at the root.
    prefix: String,
}

impl fmt::Debug for UiBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiBuilder")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl UiBuilder {
    /// A fresh builder for one render.
    pub(crate) fn root() -> Self {
        Self {
            nodes: Arc::new(Mutex::new(Vec::new())),
            shared: Arc::new(Mutex::new(Shared::default())),
            prefix: String::new(),
        }
    }

    /// Builder for the children of `id`.
    fn child(&self, id: &str) -> Self {
        Self {
            nodes: Arc::new(Mutex::new(Vec::new())),
            shared: self.shared.clone(),
            prefix: format!("{}/", id),
        }
    }

    /// Drain the nodes added at this level.
    fn take_nodes(&self) -> Vec<UiNode> {
        mem::take(&mut *lock_unpoisoned(&self.nodes))
    }

    /// Everything the render produced.
    pub(crate) fn finish(self) -> RenderOutput {
        let nodes = self.take_nodes();
        let status = mem::take(&mut lock_unpoisoned(&self.shared).status);
        RenderOutput { nodes, status }
    }

    /// Append at this level.
    fn push(&self, node: UiNode) {
        lock_unpoisoned(&self.nodes).push(node);
    }

    /// Claim a unique id: the explicit one if given, otherwise `<kind>-<n>`
    /// under the parent path, where `n` is the node's position in this
    /// builder. Labels never feed the id, so retitling keeps it. Repeats get a
    /// `~n` suffix.
    fn claim_id(&self, explicit: Option<String>, kind: &str) -> String {
        let base = explicit.unwrap_or_else(|| {
            let n = lock_unpoisoned(&self.nodes).len();
            format!("{}{}-{}", self.prefix, kind, n)
        });
        let mut shared = lock_unpoisoned(&self.shared);
        if shared.ids.insert(base.clone()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}~{}", base, n);
            if shared.ids.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// An icon as scripts write it: a bare string or a `ui.icon(...)` map.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum RawIcon {
    /// No icon.
    #[default]
    None,
    /// Emoji, data URL or file path, told apart by [`IconSpec::parse`].
    Plain(String),
    /// Explicit kind.
    Full {
        /// `file`, `data_url` or `emoji`.
        kind: String,
        /// Path, URL or glyph.
        value: String,
        /// Tint for light/dark menu bars.
        #[serde(default)]
        template: bool,
    },
}

/// Item map fields other than `on_action` and `alternate`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawItem {
    /// Explicit id.
    #[serde(default)]
    id: Option<String>,
    /// Required label.
    title: String,
    /// Secondary label.
    #[serde(default)]
    subtitle: Option<String>,
    /// Hover text.
    #[serde(default)]
    tooltip: Option<String>,
    /// Entry icon.
    #[serde(default)]
    icon: RawIcon,
    /// Shortcut string, such as `cmd+shift+k`.
    #[serde(default)]
    shortcut: Option<String>,
    /// Greyed out and not dispatchable.
    #[serde(default)]
    disabled: bool,
}

/// Submenu and section map fields.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGroup {
    /// Explicit id.
    #[serde(default)]
    id: Option<String>,
    /// Submenu label or section heading.
    #[serde(default)]
    title: Option<String>,
    /// Submenu icon.
    #[serde(default)]
    icon: RawIcon,
    /// Hover text.
    #[serde(default)]
    tooltip: Option<String>,
}

/// `ui.status(...)` map fields.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStatus {
    /// Status item icon.
    #[serde(default)]
    icon: RawIcon,
    /// Status item text.
    #[serde(default)]
    title: Option<String>,
    /// Hover text.
    #[serde(default)]
    tooltip: Option<String>,
}

/// Result type of native builder functions.
type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

/// Validate a script icon.
fn icon_from_raw(ctx: &NativeCallContext, raw: RawIcon) -> RhaiResult<Option<IconSpec>> {
    match raw {
        RawIcon::None => Ok(None),
        RawIcon::Plain(s) => Ok(Some(IconSpec::parse(&s))),
        RawIcon::Full {
            kind,
            value,
            template,
        } => {
            let kind = match kind.as_str() {
                "file" => IconKind::File(PathBuf::from(value)),
                "data_url" => IconKind::DataUrl(value),
                "emoji" => IconKind::Emoji(value),
                other => {
                    return Err(boxed_validation_error(
                        format!("unknown icon kind: {}", other),
                        ctx.call_position(),
                    ));
                }
            };
            Ok(Some(IconSpec { kind, template }))
        }
    }
}

/// Remove `key` from `map` as a callback. Unit counts as absent.
fn take_handler(ctx: &NativeCallContext, map: &mut Map, key: &str) -> RhaiResult<Option<Handler>> {
    match map.remove(key) {
        None => Ok(None),
        Some(v) if v.is_unit() => Ok(None),
        Some(v) => match v.try_cast::<FnPtr>() {
            Some(func) => Ok(Some(Handler { func })),
            None => Err(boxed_validation_error(
                format!("{} must be a function", key),
                ctx.call_position(),
            )),
        },
    }
}

/// Deserialize the rest of a map, naming `what` in the error.
fn decode<T: for<'de> Deserialize<'de>>(
    ctx: &NativeCallContext,
    what: &str,
    map: Map,
) -> RhaiResult<T> {
    from_dynamic(&Dynamic::from_map(map)).map_err(|e| {
        boxed_validation_error(format!("invalid {} map: {}", what, e), ctx.call_position())
    })
}

/// Validate an item map. The returned item has no id yet; the explicit one,
/// if any, comes back alongside it.
fn parse_item(ctx: &NativeCallContext, mut map: Map) -> RhaiResult<(Option<String>, UiItem)> {
    let on_action = take_handler(ctx, &mut map, "on_action")?;
    let alternate = match map.remove("alternate") {
        None => None,
        Some(v) => match v.try_cast::<Map>() {
            // Alternates dispatch through their parent's id.
            Some(alt) => Some(Box::new(parse_item(ctx, alt)?.1)),
            None => {
                return Err(boxed_validation_error(
                    "alternate must be an item map".to_string(),
                    ctx.call_position(),
                ));
            }
        },
    };
    let raw: RawItem = decode(ctx, "item", map)?;
    let shortcut = match raw.shortcut.as_deref() {
        None => None,
        Some(spec) => Some(Shortcut::parse(spec).ok_or_else(|| {
            boxed_validation_error(format!("invalid shortcut: {}", spec), ctx.call_position())
        })?),
    };
    let item = UiItem {
        id: String::new(),
        icon: icon_from_raw(ctx, raw.icon)?,
        title: raw.title,
        subtitle: raw.subtitle,
        tooltip: raw.tooltip,
        shortcut,
        disabled: raw.disabled,
        on_action,
        alternate,
    };
    Ok((raw.id, item))
}

/// Parse, claim an id and append.
fn push_item(ctx: &NativeCallContext, ui: &UiBuilder, map: Map) -> RhaiResult<()> {
    let (explicit, mut item) = parse_item(ctx, map)?;
    item.id = ui.claim_id(explicit, "item");
    ui.push(UiNode::Item(item));
    Ok(())
}

/// Run `func` against `child` and collect what it added.
fn build_children(
    ctx: &NativeCallContext,
    child: &UiBuilder,
    func: &FnPtr,
) -> RhaiResult<Vec<UiNode>> {
    func.call_within_context::<Dynamic>(ctx, (child.clone(),))?;
    Ok(child.take_nodes())
}

/// Register the `Ui` type and its methods.
pub(crate) fn register_builder(engine: &mut Engine) {
    engine.register_type_with_name::<UiBuilder>("Ui");

    engine.register_fn(
        "item",
        |ctx: NativeCallContext, ui: &mut UiBuilder, map: Map| -> RhaiResult<()> {
            push_item(&ctx, ui, map)
        },
    );

    engine.register_fn(
        "item",
        |ctx: NativeCallContext, ui: &mut UiBuilder, title: &str, func: FnPtr| -> RhaiResult<()> {
            let mut map = Map::new();
            map.insert("title".into(), title.into());
            map.insert("on_action".into(), Dynamic::from(func));
            push_item(&ctx, ui, map)
        },
    );

    engine.register_fn("separator", |ui: &mut UiBuilder| {
        let id = ui.claim_id(None, "separator");
        ui.push(UiNode::Separator { id });
    });

    engine.register_fn(
        "submenu",
        |ctx: NativeCallContext, ui: &mut UiBuilder, map: Map, func: FnPtr| -> RhaiResult<()> {
            let raw: RawGroup = decode(&ctx, "submenu", map)?;
            let title = raw.title.ok_or_else(|| {
                boxed_validation_error("submenu requires a title".to_string(), ctx.call_position())
            })?;
            let id = ui.claim_id(raw.id, "submenu");
            let children = build_children(&ctx, &ui.child(&id), &func)?;
            ui.push(UiNode::Submenu {
                id,
                icon: icon_from_raw(&ctx, raw.icon)?,
                title,
                tooltip: raw.tooltip,
                children,
            });
            Ok(())
        },
    );

    engine.register_fn(
        "section",
        |ctx: NativeCallContext, ui: &mut UiBuilder, map: Map, func: FnPtr| -> RhaiResult<()> {
            let raw: RawGroup = decode(&ctx, "section", map)?;
            let id = ui.claim_id(raw.id, "section");
            let children = build_children(&ctx, &ui.child(&id), &func)?;
            ui.push(UiNode::Section {
                id,
                title: raw.title,
                children,
            });
            Ok(())
        },
    );

    engine.register_fn(
        "section",
        |ctx: NativeCallContext, ui: &mut UiBuilder, func: FnPtr| -> RhaiResult<()> {
            let id = ui.claim_id(None, "section");
            let children = build_children(&ctx, &ui.child(&id), &func)?;
            ui.push(UiNode::Section {
                id,
                title: None,
                children,
            });
            Ok(())
        },
    );

    engine.register_fn(
        "status",
        |ctx: NativeCallContext, ui: &mut UiBuilder, map: Map| -> RhaiResult<()> {
            let raw: RawStatus = decode(&ctx, "status", map)?;
            let icon = icon_from_raw(&ctx, raw.icon)?;
            lock_unpoisoned(&ui.shared).status = StatusSpec {
                icon,
                title: raw.title,
                tooltip: raw.tooltip,
            };
            Ok(())
        },
    );
}

/// Icon map as `ui.icon` returns it.
fn icon_map(kind: &str, value: &str) -> Map {
    let mut map = Map::new();
    map.insert("kind".into(), kind.into());
    map.insert("value".into(), value.into());
    map.insert("template".into(), false.into());
    map
}

/// The importable `ui` module: icon constructors and kind constants.
pub(crate) fn ui_module() -> Module {
    let mut module = Module::new();
    module.set_var("FILE", "file");
    module.set_var("DATA_URL", "data_url");
    module.set_var("EMOJI", "emoji");

    module.set_native_fn("file", |path: &str| Ok(icon_map("file", path)));
    module.set_native_fn("data_url", |url: &str| Ok(icon_map("data_url", url)));
    module.set_native_fn("emoji", |e: &str| Ok(icon_map("emoji", e)));
    module.set_native_fn("icon", |kind: &str, value: &str| Ok(icon_map(kind, value)));
    module.set_native_fn("template", |mut icon: Map| {
        icon.insert("template".into(), true.into());
        Ok(icon)
    });
    module
}
