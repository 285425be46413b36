//! Wire types exchanged between the extension runtime and the native menu host.
//!
//! The runtime serializes each menu-bar extension's registration tree into a
//! [`MenuPublish`] and sends it as [`MsgToHost::Publish`]. Interactive entries
//! carry an opaque `dispatch_id`; when the user picks one, the host answers
//! with [`MsgFromHost::MenuAction`] quoting the extension id and that id.

use serde::{Deserialize, Serialize};

pub mod rpc;

/// Where a resolved icon's pixels come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IconSource {
    /// Absolute path to an image file the host can load directly.
    FilePath(String),
    /// Inline `data:` URL.
    DataUrl(String),
    /// A single emoji grapheme rendered as text.
    Emoji(String),
    /// No icon.
    #[default]
    None,
}

/// A fully resolved icon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Icon {
    /// Pixel source.
    pub source: IconSource,
    /// When true the host tints the image for light/dark menu bars.
    #[serde(default)]
    pub template: bool,
}

impl Icon {
    /// The empty icon.
    pub fn none() -> Self {
        Self::default()
    }

    /// True when there is nothing to draw.
    pub fn is_none(&self) -> bool {
        matches!(self.source, IconSource::None)
    }
}

/// An interactive menu entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItemNode {
    /// Opaque id quoted back in [`MsgFromHost::MenuAction`].
    pub dispatch_id: String,
    /// Primary label.
    pub title: String,
    /// Secondary label shown right-aligned.
    #[serde(default)]
    pub subtitle: Option<String>,
    /// Hover text.
    #[serde(default)]
    pub tooltip: Option<String>,
    /// Leading icon.
    #[serde(default)]
    pub icon: Icon,
    /// Display-only keyboard shortcut in canonical chord form (e.g. `cmd+r`).
    #[serde(default)]
    pub shortcut: Option<String>,
    /// Greyed out and not selectable.
    #[serde(default)]
    pub disabled: bool,
    /// Variant shown while the option key is held.
    #[serde(default)]
    pub alternate: Option<Box<Self>>,
}

/// One node of a serialized menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuNode {
    /// Clickable entry.
    Item(MenuItemNode),
    /// Horizontal rule between sections.
    Separator,
    /// Disabled section heading.
    Label {
        /// Heading text.
        title: String,
    },
    /// Nested menu.
    Submenu {
        /// Submenu label.
        title: String,
        /// Leading icon.
        #[serde(default)]
        icon: Icon,
        /// Hover text.
        #[serde(default)]
        tooltip: Option<String>,
        /// Child nodes, already ordered and sectioned.
        children: Vec<Self>,
    },
}

/// The complete state of one extension's menu-bar presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MenuPublish {
    /// Status item icon.
    #[serde(default)]
    pub icon: Icon,
    /// Status item text.
    #[serde(default)]
    pub title: Option<String>,
    /// Status item hover text.
    #[serde(default)]
    pub tooltip: Option<String>,
    /// Menu contents.
    pub items: Vec<MenuNode>,
}

impl MenuPublish {
    /// Count every interactive entry, including those nested in submenus and alternates.
    pub fn interactive_count(&self) -> usize {
        /// Entries in `nodes` and below.
        fn count(nodes: &[MenuNode]) -> usize {
            nodes
                .iter()
                .map(|n| match n {
                    MenuNode::Item(item) => 1 + usize::from(item.alternate.is_some()),
                    MenuNode::Submenu { children, .. } => count(children),
                    MenuNode::Separator | MenuNode::Label { .. } => 0,
                })
                .sum()
        }
        count(&self.items)
    }
}

/// Messages sent from the runtime to the native menu host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MsgToHost {
    /// Replace the menu for `ext_id`.
    Publish {
        /// Extension instance id.
        ext_id: String,
        /// New menu contents.
        menu: MenuPublish,
    },
    /// Remove the status item for `ext_id`.
    Dispose {
        /// Extension instance id.
        ext_id: String,
    },
    /// Streaming log line from the runtime.
    Log {
        /// Level name.
        level: String,
        /// Tracing target.
        target: String,
        /// Rendered message.
        message: String,
    },
}

/// Messages sent from the native host back to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MsgFromHost {
    /// The user picked a previously published entry.
    MenuAction {
        /// Extension instance id.
        ext_id: String,
        /// The entry's `dispatch_id`.
        item_id: String,
    },
    /// The OS delivered a deep link addressed to the launcher.
    DeepLink {
        /// Raw URL as received.
        url: String,
    },
}

impl MsgToHost {
    /// The host method this message is sent as. Log lines travel as
    /// notifications and have none.
    pub fn method(&self) -> Option<rpc::HostMethod> {
        match self {
            Self::Publish { .. } => Some(rpc::HostMethod::Publish),
            Self::Dispose { .. } => Some(rpc::HostMethod::Dispose),
            Self::Log { .. } => None,
        }
    }
}

impl MsgFromHost {
    /// The notification channel this message arrives on.
    pub fn notification(&self) -> rpc::HostNotification {
        match self {
            Self::MenuAction { .. } => rpc::HostNotification::MenuAction,
            Self::DeepLink { .. } => rpc::HostNotification::DeepLink,
        }
    }
}

/// IPC-related helpers: channel aliases and message codec.
pub mod ipc {
    use super::MsgToHost;

    /// Tokio unbounded sender for host messages.
    pub type HostTx = tokio::sync::mpsc::UnboundedSender<MsgToHost>;
    /// Tokio unbounded receiver for host messages.
    pub type HostRx = tokio::sync::mpsc::UnboundedReceiver<MsgToHost>;

    /// Create a standard unbounded host channel (sender, receiver).
    pub fn host_channel() -> (HostTx, HostRx) {
        tokio::sync::mpsc::unbounded_channel::<MsgToHost>()
    }

    /// Codec for encoding/decoding host messages used by the IPC layer.
    pub mod codec;
}
