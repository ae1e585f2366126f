//! Task records exchanged between a host and its worker.
//!
//! Field names serialize in camelCase. Decoding also accepts the positional
//! keys `"0".."3"` and the PascalCase names some hosts emit, so a worker
//! understands a host whichever key convention it was built with.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Header map carried by both task records.
pub type Headers = BTreeMap<String, String>;

/// Header through which a host grants a task a processing deadline.
pub const TIMEOUT_HEADER: &str = "TimeoutMilliseconds";

/// Result status of one processed task.
///
/// An open set of integer codes: the associated constants have fixed
/// meaning, any other code passes through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub i32);

impl Status {
    /// The host should drop the message without acknowledging a result.
    pub const IGNORE_MESSAGE: Status = Status(-1);
    /// The task completed.
    pub const DONE: Status = Status(200);
    /// The task completed and the reply should be routed to `reply_queue_name`.
    pub const DONE_WITH_REPLY: Status = Status(201);
    /// Processing failed unexpectedly.
    pub const UNKNOWN_ERROR: Status = Status(500);

    pub fn code(self) -> i32 {
        self.0
    }

    /// Whether the host should treat the task as finished.
    pub fn is_done(self) -> bool {
        self == Self::DONE || self == Self::DONE_WITH_REPLY
    }

    /// Name of a well-known code.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::IGNORE_MESSAGE => Some("IGNORE_MESSAGE"),
            Self::DONE => Some("DONE"),
            Self::DONE_WITH_REPLY => Some("DONE_WITH_REPLY"),
            Self::UNKNOWN_ERROR => Some("UNKNOWN_ERROR"),
            _ => None,
        }
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({name})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A task handed to the worker by its host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputTask {
    /// Task body.
    #[serde(alias = "0", alias = "Message")]
    pub message: String,

    /// Token that ties the eventual reply to this request.
    #[serde(
        default,
        alias = "1",
        alias = "CorrelationId",
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,

    /// Queue the host consumed the message from.
    #[serde(
        default,
        alias = "2",
        alias = "OriginalQueueName",
        skip_serializing_if = "Option::is_none"
    )]
    pub original_queue_name: Option<String>,

    #[serde(
        default,
        alias = "3",
        alias = "Headers",
        deserialize_with = "lenient_headers",
        skip_serializing_if = "Option::is_none"
    )]
    pub headers: Option<Headers>,
}

impl InputTask {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_original_queue_name(mut self, queue: impl Into<String>) -> Self {
        self.original_queue_name = Some(queue.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(key.into(), value.into());
        self
    }

    /// Look up one header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.as_ref()?.get(key).map(String::as_str)
    }

    /// Processing deadline granted through the `TimeoutMilliseconds` header.
    ///
    /// Negative, unparsable or missing values mean "no deadline".
    pub fn timeout(&self) -> Option<Duration> {
        let millis: i64 = self.header(TIMEOUT_HEADER)?.trim().parse().ok()?;
        u64::try_from(millis).ok().map(Duration::from_millis)
    }
}

/// The worker's result for one [`InputTask`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputTask {
    #[serde(alias = "0", alias = "Message")]
    pub message: String,

    #[serde(alias = "1", alias = "Status")]
    pub status: Status,

    #[serde(
        default,
        alias = "2",
        alias = "Headers",
        deserialize_with = "lenient_headers",
        skip_serializing_if = "Option::is_none"
    )]
    pub headers: Option<Headers>,

    /// Where the host should publish the reply; `None` when no reply routing
    /// is needed.
    #[serde(
        default,
        alias = "3",
        alias = "ReplyQueueName",
        skip_serializing_if = "Option::is_none"
    )]
    pub reply_queue_name: Option<String>,
}

impl OutputTask {
    pub fn new(message: impl Into<String>, status: Status) -> Self {
        Self {
            message: message.into(),
            status,
            headers: None,
            reply_queue_name: None,
        }
    }

    /// A completed task.
    pub fn done(message: impl Into<String>) -> Self {
        Self::new(message, Status::DONE)
    }

    /// A completed task whose reply goes to `queue`.
    pub fn reply_to(message: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            reply_queue_name: Some(queue.into()),
            ..Self::new(message, Status::DONE_WITH_REPLY)
        }
    }

    /// A message the host should drop.
    pub fn ignore(message: impl Into<String>) -> Self {
        Self::new(message, Status::IGNORE_MESSAGE)
    }

    pub fn with_headers(mut self, headers: Option<Headers>) -> Self {
        self.headers = headers;
        self
    }
}

/// Accepts string-to-scalar maps and stringifies the values; nil values
/// are dropped. Hosts written against loosely typed header dictionaries
/// send integers (`TimeoutMilliseconds`) and booleans here.
fn lenient_headers<'de, D>(deserializer: D) -> Result<Option<Headers>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|map| {
        map.into_iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                Some((key, value))
            })
            .collect()
    }))
}
