//! Method and notification names used on the runtime ↔ host channel.

/// Requests the runtime sends to the native menu host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMethod {
    /// Replace an extension's menu.
    Publish,
    /// Drop an extension's status item.
    Dispose,
}

impl HostMethod {
    /// Stable string name for the method when talking to MRPC.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Dispose => "dispose",
        }
    }

    /// Parse a method name received over MRPC.
    pub fn try_from_str(s: &str) -> Option<Self> {
        match s {
            "publish" => Some(Self::Publish),
            "dispose" => Some(Self::Dispose),
            _ => None,
        }
    }
}

/// One-way host→runtime notification channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostNotification {
    /// A published menu entry was activated.
    MenuAction,
    /// A deep link arrived for the launcher's URL scheme.
    DeepLink,
}

impl HostNotification {
    /// Stable string name for the notification channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MenuAction => "menu_action",
            Self::DeepLink => "deep_link",
        }
    }

    /// Parse a notification name.
    pub fn try_from_str(s: &str) -> Option<Self> {
        match s {
            "menu_action" => Some(Self::MenuAction),
            "deep_link" => Some(Self::DeepLink),
            _ => None,
        }
    }
}
