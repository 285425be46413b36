//! Menu-bar mode: live registrations, their layout, and the bridge that
//! publishes them to the native menu host.

mod bridge;
mod icons;

use std::{fmt, sync::Arc};

use futures::future::BoxFuture;

pub use self::{
    bridge::{BridgePhase, MenuBarBridge},
    icons::IconResolver,
};
use crate::{
    loader::{Handler, IconSpec, RenderOutput, UiItem, UiNode},
    shortcut::Shortcut,
};

/// Boxed async callback.
type ActionFn = dyn Fn() -> BoxFuture<'static, ()> + Send + Sync;

/// A callback run when a published entry is picked.
#[derive(Clone)]
pub struct Action(Arc<ActionFn>);

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Action")
    }
}

impl Action {
    /// Wrap an async callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wrap a synchronous callback. It runs when the returned future is polled.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move || {
            let f = f.clone();
            Box::pin(async move { f() })
        })
    }

    /// Run the callback to completion.
    pub(crate) async fn invoke(&self) {
        (self.0)().await;
    }
}

/// An interactive entry.
#[derive(Debug, Clone, Default)]
pub struct ItemSpec {
    /// Primary label.
    pub title: String,
    /// Secondary label.
    pub subtitle: Option<String>,
    /// Hover text.
    pub tooltip: Option<String>,
    /// Leading icon.
    pub icon: Option<IconSpec>,
    /// Display shortcut.
    pub shortcut: Option<Shortcut>,
    /// Greyed out.
    pub disabled: bool,
    /// Callback.
    pub on_action: Option<Action>,
    /// Variant activated with the option key held.
    pub alternate: Option<Box<Self>>,
}

/// A nested menu.
#[derive(Debug, Clone, Default)]
pub struct SubmenuSpec {
    /// Label.
    pub title: String,
    /// Leading icon.
    pub icon: Option<IconSpec>,
    /// Hover text.
    pub tooltip: Option<String>,
    /// Children, laid out by their own `order` and sections.
    pub children: Vec<MenuRegistration>,
}

/// What a registration contributes.
#[derive(Debug, Clone)]
pub enum RegistrationKind {
    /// Clickable entry.
    Item(ItemSpec),
    /// Explicit separator.
    Separator,
    /// Nested menu.
    Submenu(SubmenuSpec),
    /// Start of a section; renders nothing itself.
    SectionMarker,
}

/// Section membership of a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionInfo {
    /// Section identity; a change between neighbours inserts a separator.
    pub id: Option<String>,
    /// Heading shown at the start of the section.
    pub title: Option<String>,
}

impl SectionInfo {
    /// A section with an id and optional heading.
    pub fn new(id: impl Into<String>, title: Option<String>) -> Self {
        Self {
            id: Some(id.into()),
            title,
        }
    }
}

/// One entry of an instance's live menu.
#[derive(Debug, Clone)]
pub struct MenuRegistration {
    /// Unique within the instance and stable for its lifetime.
    pub id: String,
    /// Contribution.
    pub kind: RegistrationKind,
    /// Section membership.
    pub section: SectionInfo,
    /// Insertion counter; layout sorts by it.
    pub order: u64,
}

/// A laid-out menu node, before icons are resolved.
#[derive(Debug, Clone)]
pub enum LayoutNode {
    /// Clickable entry.
    Item {
        /// Registration id.
        id: String,
        /// Entry contents.
        item: ItemSpec,
    },
    /// Separator.
    Separator,
    /// Section heading.
    Label(String),
    /// Nested menu.
    Submenu {
        /// Registration id.
        id: String,
        /// Label.
        title: String,
        /// Leading icon.
        icon: Option<IconSpec>,
        /// Hover text.
        tooltip: Option<String>,
        /// Laid-out children.
        children: Vec<Self>,
    },
}

/// Order registrations for display.
///
/// Entries are stably sorted by `order`. A separator goes wherever the
/// section id differs from the previous entry's (never first, last or
/// doubled) and a heading follows when the new section has a title.
pub fn layout(registrations: &[MenuRegistration]) -> Vec<LayoutNode> {
    let mut sorted: Vec<&MenuRegistration> = registrations.iter().collect();
    sorted.sort_by_key(|r| r.order);

    let mut out = Vec::new();
    let mut prev: Option<Option<&str>> = None;
    for reg in sorted {
        let section = reg.section.id.as_deref();
        if prev != Some(section) {
            if prev.is_some() {
                push_separator(&mut out);
            }
            if let Some(title) = &reg.section.title {
                out.push(LayoutNode::Label(title.clone()));
            }
        }
        prev = Some(section);

        match &reg.kind {
            RegistrationKind::Item(item) => out.push(LayoutNode::Item {
                id: reg.id.clone(),
                item: item.clone(),
            }),
            RegistrationKind::Separator => push_separator(&mut out),
            RegistrationKind::Submenu(sub) => out.push(LayoutNode::Submenu {
                id: reg.id.clone(),
                title: sub.title.clone(),
                icon: sub.icon.clone(),
                tooltip: sub.tooltip.clone(),
                children: layout(&sub.children),
            }),
            RegistrationKind::SectionMarker => {}
        }
    }
    if matches!(out.last(), Some(LayoutNode::Separator)) {
        out.pop();
    }
    out
}

/// Separator unless at the start or after another separator.
fn push_separator(out: &mut Vec<LayoutNode>) {
    if !out.is_empty() && !matches!(out.last(), Some(LayoutNode::Separator)) {
        out.push(LayoutNode::Separator);
    }
}

/// A registration before it has been given an order.
#[derive(Debug, Clone)]
pub struct PendingRegistration {
    /// Registration id.
    pub id: String,
    /// Contribution.
    pub kind: RegistrationKind,
    /// Section membership.
    pub section: SectionInfo,
}

/// Flatten a render into registrations in declaration order.
///
/// Top-level sections become a marker followed by their members; sections
/// inside submenus are flattened the same way into the submenu's children.
pub fn registrations_from_render(
    output: &RenderOutput,
    bind: &dyn Fn(&Handler) -> Action,
) -> Vec<PendingRegistration> {
    let mut out = Vec::new();
    flatten(&output.nodes, &SectionInfo::default(), bind, &mut out);
    out
}

/// Append registrations for `nodes`, all in `section` unless a section node says otherwise.
fn flatten(
    nodes: &[UiNode],
    section: &SectionInfo,
    bind: &dyn Fn(&Handler) -> Action,
    out: &mut Vec<PendingRegistration>,
) {
    for node in nodes {
        match node {
            UiNode::Item(item) => out.push(PendingRegistration {
                id: item.id.clone(),
                kind: RegistrationKind::Item(item_spec(item, bind)),
                section: section.clone(),
            }),
            UiNode::Separator { id } => out.push(PendingRegistration {
                id: id.clone(),
                kind: RegistrationKind::Separator,
                section: section.clone(),
            }),
            UiNode::Submenu {
                id,
                title,
                icon,
                tooltip,
                children,
            } => {
                let mut nested = Vec::new();
                flatten(children, &SectionInfo::default(), bind, &mut nested);
                let children = nested
                    .into_iter()
                    .zip(0u64..)
                    .map(|(p, order)| MenuRegistration {
                        id: p.id,
                        kind: p.kind,
                        section: p.section,
                        order,
                    })
                    .collect();
                out.push(PendingRegistration {
                    id: id.clone(),
                    kind: RegistrationKind::Submenu(SubmenuSpec {
                        title: title.clone(),
                        icon: icon.clone(),
                        tooltip: tooltip.clone(),
                        children,
                    }),
                    section: section.clone(),
                });
            }
            UiNode::Section {
                id,
                title,
                children,
            } => {
                let inner = SectionInfo::new(id.clone(), title.clone());
                out.push(PendingRegistration {
                    id: id.clone(),
                    kind: RegistrationKind::SectionMarker,
                    section: inner.clone(),
                });
                flatten(children, &inner, bind, out);
            }
        }
    }
}

/// Menu form of a rendered item, binding its handlers.
fn item_spec(item: &UiItem, bind: &dyn Fn(&Handler) -> Action) -> ItemSpec {
    ItemSpec {
        title: item.title.clone(),
        subtitle: item.subtitle.clone(),
        tooltip: item.tooltip.clone(),
        icon: item.icon.clone(),
        shortcut: item.shortcut.clone(),
        disabled: item.disabled,
        on_action: item.on_action.as_ref().map(bind),
        alternate: item
            .alternate
            .as_ref()
            .map(|alt| Box::new(item_spec(alt, bind))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, order: u64, section: Option<&str>) -> MenuRegistration {
        MenuRegistration {
            id: id.to_string(),
            kind: RegistrationKind::Item(ItemSpec {
                title: id.to_string(),
                ..ItemSpec::default()
            }),
            section: SectionInfo {
                id: section.map(str::to_string),
                title: None,
            },
            order,
        }
    }

    fn shape(nodes: &[LayoutNode]) -> Vec<String> {
        nodes
            .iter()
            .map(|n| match n {
                LayoutNode::Item { id, .. } => id.clone(),
                LayoutNode::Separator => "---".to_string(),
                LayoutNode::Label(t) => format!("[{}]", t),
                LayoutNode::Submenu { id, children, .. } => {
                    format!("{}({})", id, shape(children).join(","))
                }
            })
            .collect()
    }

    #[test]
    fn sections_get_separators_and_headings() {
        let mut regs = vec![
            item("a", 0, None),
            MenuRegistration {
                id: "inbox".into(),
                kind: RegistrationKind::SectionMarker,
                section: SectionInfo::new("inbox", Some("Inbox".into())),
                order: 1,
            },
            item("b", 2, Some("inbox")),
            item("c", 3, None),
        ];
        regs[2].section.title = Some("Inbox".into());
        assert_eq!(shape(&layout(&regs)), ["a", "---", "[Inbox]", "b", "---", "c"]);
    }

    #[test]
    fn separators_never_lead_or_double() {
        let regs = vec![
            MenuRegistration {
                id: "s".into(),
                kind: RegistrationKind::Separator,
                section: SectionInfo::default(),
                order: 0,
            },
            item("a", 1, Some("x")),
            MenuRegistration {
                id: "s2".into(),
                kind: RegistrationKind::Separator,
                section: SectionInfo::new("y", None),
                order: 2,
            },
            item("b", 3, Some("y")),
        ];
        assert_eq!(shape(&layout(&regs)), ["a", "---", "b"]);
    }

    #[test]
    fn submenus_lay_out_recursively() {
        let regs = vec![MenuRegistration {
            id: "more".into(),
            kind: RegistrationKind::Submenu(SubmenuSpec {
                title: "More".into(),
                children: vec![item("y", 1, Some("b")), item("x", 0, Some("a"))],
                ..SubmenuSpec::default()
            }),
            section: SectionInfo::default(),
            order: 0,
        }];
        assert_eq!(shape(&layout(&regs)), ["more(x,---,y)"]);
    }
}
