//! MessagePack framing of host messages inside msgpack-rpc binary values.

use mrpc::Value;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{MsgFromHost, MsgToHost};

/// Errors from encoding/decoding host messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided value was not a binary payload.
    #[error("expected binary message payload, got {0:?}")]
    InvalidValueType(Value),
    /// Deserialization via rmp_serde failed.
    #[error(transparent)]
    Decode(#[from] rmp_serde::decode::Error),
    /// Serialization via rmp_serde failed.
    #[error(transparent)]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Encode any message into a binary `mrpc::Value` using named msgpack fields.
fn encode<T: Serialize>(msg: &T) -> Result<Value, Error> {
    let bytes = rmp_serde::to_vec_named(msg)?;
    Ok(Value::Binary(bytes))
}

/// Decode a binary `mrpc::Value` back into a message.
fn decode<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    match value {
        Value::Binary(bytes) => Ok(rmp_serde::from_slice(&bytes)?),
        other => Err(Error::InvalidValueType(other)),
    }
}

/// Encode a `MsgToHost` message into an `mrpc::Value` as a binary payload.
pub fn msg_to_value(msg: &MsgToHost) -> Result<Value, Error> {
    encode(msg)
}

/// Decode an `mrpc::Value` (binary) back into a `MsgToHost`.
///
/// # Errors
/// Returns an error if the value is not binary or the payload does not decode.
pub fn value_to_msg(value: Value) -> Result<MsgToHost, Error> {
    decode(value)
}

/// Encode a host→runtime message.
pub fn reply_to_value(msg: &MsgFromHost) -> Result<Value, Error> {
    encode(msg)
}

/// Decode a host→runtime message.
pub fn value_to_reply(value: Value) -> Result<MsgFromHost, Error> {
    decode(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Icon, IconSource, MenuItemNode, MenuNode, MenuPublish};

    fn sample_menu() -> MenuPublish {
        let item = MenuItemNode {
            dispatch_id: "ext:1".into(),
            title: "Open".into(),
            subtitle: Some("⌘O".into()),
            tooltip: None,
            icon: Icon {
                source: IconSource::Emoji("📂".into()),
                template: false,
            },
            shortcut: Some("cmd+o".into()),
            disabled: false,
            alternate: Some(Box::new(MenuItemNode {
                dispatch_id: "ext:2".into(),
                title: "Open in Background".into(),
                subtitle: None,
                tooltip: None,
                icon: Icon::none(),
                shortcut: None,
                disabled: false,
                alternate: None,
            })),
        };
        MenuPublish {
            icon: Icon {
                source: IconSource::DataUrl("data:image/png;base64,AAAA".into()),
                template: true,
            },
            title: Some("3".into()),
            tooltip: None,
            items: vec![
                MenuNode::Label {
                    title: "Files".into(),
                },
                MenuNode::Item(item),
                MenuNode::Separator,
                MenuNode::Submenu {
                    title: "More".into(),
                    icon: Icon::none(),
                    tooltip: None,
                    children: vec![],
                },
            ],
        }
    }

    #[test]
    fn publish_survives_the_wire() {
        let msg = MsgToHost::Publish {
            ext_id: "github.notifications".into(),
            menu: sample_menu(),
        };
        let back = value_to_msg(msg_to_value(&msg).expect("encode")).expect("decode");
        match back {
            MsgToHost::Publish { ext_id, menu } => {
                assert_eq!(ext_id, "github.notifications");
                assert_eq!(menu, sample_menu());
                assert_eq!(menu.interactive_count(), 2);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn menu_action_reply_decodes() {
        let msg = MsgFromHost::MenuAction {
            ext_id: "a".into(),
            item_id: "a:7".into(),
        };
        let back = value_to_reply(reply_to_value(&msg).expect("encode")).expect("decode");
        assert!(matches!(back, MsgFromHost::MenuAction { item_id, .. } if item_id == "a:7"));
    }

    #[test]
    fn non_binary_value_is_rejected() {
        let err = value_to_msg(Value::Boolean(true)).expect_err("must reject");
        assert!(matches!(err, Error::InvalidValueType(_)));
    }
}
