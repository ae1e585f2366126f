//! Payload codec for task records.
//!
//! Two knobs make up a codec version:
//! - [`WireFormat`]: MessagePack (maps with string keys) or JSON
//! - [`KeyConvention`]: positional keys `"0".."3"` or camelCase names
//!
//! The key convention only governs encoding. Decoders accept positional,
//! camelCase and PascalCase keys alike.

use serde::Serialize;

use crate::task::{Headers, InputTask, OutputTask, Status};

/// Errors produced while encoding or decoding a task payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("msgpack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Serialization format of a frame payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    #[default]
    MsgPack,
    Json,
}

/// How record fields are keyed on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyConvention {
    /// Keys `"0"`, `"1"`, `"2"`, `"3"` in field order. Every key is written;
    /// absent optional fields are encoded as nil.
    #[default]
    Positional,
    /// camelCase field names; absent optional fields are omitted.
    Named,
}

/// Encodes and decodes [`InputTask`]/[`OutputTask`] payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCodec {
    pub format: WireFormat,
    pub keys: KeyConvention,
}

#[derive(Serialize)]
struct PositionalInput<'a> {
    #[serde(rename = "0")]
    message: &'a str,
    #[serde(rename = "1")]
    correlation_id: Option<&'a str>,
    #[serde(rename = "2")]
    original_queue_name: Option<&'a str>,
    #[serde(rename = "3")]
    headers: Option<&'a Headers>,
}

#[derive(Serialize)]
struct PositionalOutput<'a> {
    #[serde(rename = "0")]
    message: &'a str,
    #[serde(rename = "1")]
    status: Status,
    #[serde(rename = "2")]
    headers: Option<&'a Headers>,
    #[serde(rename = "3")]
    reply_queue_name: Option<&'a str>,
}

impl<'a> From<&'a InputTask> for PositionalInput<'a> {
    fn from(task: &'a InputTask) -> Self {
        Self {
            message: &task.message,
            correlation_id: task.correlation_id.as_deref(),
            original_queue_name: task.original_queue_name.as_deref(),
            headers: task.headers.as_ref(),
        }
    }
}

impl<'a> From<&'a OutputTask> for PositionalOutput<'a> {
    fn from(task: &'a OutputTask) -> Self {
        Self {
            message: &task.message,
            status: task.status,
            headers: task.headers.as_ref(),
            reply_queue_name: task.reply_queue_name.as_deref(),
        }
    }
}

impl TaskCodec {
    pub const fn new(format: WireFormat, keys: KeyConvention) -> Self {
        Self { format, keys }
    }

    /// MessagePack with positional keys.
    pub const fn msgpack() -> Self {
        Self::new(WireFormat::MsgPack, KeyConvention::Positional)
    }

    /// JSON with camelCase names.
    pub const fn json() -> Self {
        Self::new(WireFormat::Json, KeyConvention::Named)
    }

    pub fn encode_input(&self, task: &InputTask) -> Result<Vec<u8>> {
        match self.keys {
            KeyConvention::Positional => self.serialize(&PositionalInput::from(task)),
            KeyConvention::Named => self.serialize(task),
        }
    }

    pub fn decode_input(&self, payload: &[u8]) -> Result<InputTask> {
        self.deserialize(payload)
    }

    pub fn encode_output(&self, task: &OutputTask) -> Result<Vec<u8>> {
        match self.keys {
            KeyConvention::Positional => self.serialize(&PositionalOutput::from(task)),
            KeyConvention::Named => self.serialize(task),
        }
    }

    pub fn decode_output(&self, payload: &[u8]) -> Result<OutputTask> {
        self.deserialize(payload)
    }

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self.format {
            WireFormat::MsgPack => Ok(rmp_serde::to_vec_named(value)?),
            WireFormat::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    fn deserialize<T: serde::de::DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        match self.format {
            WireFormat::MsgPack => Ok(rmp_serde::from_slice(payload)?),
            WireFormat::Json => Ok(serde_json::from_slice(payload)?),
        }
    }
}
