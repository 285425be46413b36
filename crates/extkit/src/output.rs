//! Printing host-bound messages.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use clap::ValueEnum;
use extkit_protocol::{MsgToHost, ipc::codec};
use mrpc::Value;
use thiserror::Error;

/// How each message is written to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// The msgpack wire payload, base64 encoded, one per line.
    Msgpack,
}

/// A message could not be rendered.
#[derive(Debug, Error)]
pub enum OutputError {
    /// JSON serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The wire codec failed.
    #[error(transparent)]
    Codec(#[from] codec::Error),
    /// The codec produced something other than a binary payload.
    #[error("codec produced a non-binary value")]
    NotBinary,
}

/// Render one message as a single line.
pub fn render(msg: &MsgToHost, format: OutputFormat) -> Result<String, OutputError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(msg)?),
        OutputFormat::Msgpack => match codec::msg_to_value(msg)? {
            Value::Binary(bytes) => Ok(STANDARD.encode(bytes)),
            _ => Err(OutputError::NotBinary),
        },
    }
}
