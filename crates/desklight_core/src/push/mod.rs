//! Push channel carrying server-side task lifecycle events.
//!
//! # Responsibility
//! - Decode inbound payloads into `PushEvent` values at the channel boundary.
//! - Maintain one long-lived STOMP subscription (see `channel`).
//!
//! # Invariants
//! - Classification is structural: only a text payload can be a deletion and
//!   only a JSON object can be an upsert.
//! - A malformed payload is an error value, never a panic or a closed channel.

pub mod channel;
pub mod reconnect;
pub mod stomp;

use crate::model::task::{Task, TaskId};
use serde::Deserialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use channel::{PushChannel, PushHandle, PushSettings, WsConnector};

/// Topic carrying task create/update/delete events.
pub const TASKS_TOPIC: &str = "/topic/tasks";

const LEGACY_DELETION_PREFIX: &str = "deleted:";
const MAX_PREVIEW_CHARS: usize = 80;

/// Decoded server event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// Insert the task, or replace the local task with the same id.
    Upsert(Task),
    /// Remove the task with this id.
    Deletion(TaskId),
}

impl PushEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Upsert(task) => task.id,
            Self::Deletion(id) => *id,
        }
    }
}

/// Explicitly tagged event envelope: `{"kind": "...", "payload": ...}`.
#[derive(Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
enum TaggedEvent {
    Upsert(Task),
    Deletion(TaskId),
}

impl From<TaggedEvent> for PushEvent {
    fn from(value: TaggedEvent) -> Self {
        match value {
            TaggedEvent::Upsert(task) => Self::Upsert(task),
            TaggedEvent::Deletion(id) => Self::Deletion(id),
        }
    }
}

/// Lifecycle of the push subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// Payload that could not be turned into a `PushEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushDecodeError {
    Empty,
    MalformedEnvelope(String),
    MalformedTask(String),
    InvalidDeletionId(String),
    Unrecognized(String),
}

impl Display for PushDecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty push payload"),
            Self::MalformedEnvelope(err) => write!(f, "malformed event envelope: {err}"),
            Self::MalformedTask(err) => write!(f, "malformed task payload: {err}"),
            Self::InvalidDeletionId(value) => write!(f, "invalid deleted task id `{value}`"),
            Self::Unrecognized(preview) => write!(f, "unrecognized push payload `{preview}`"),
        }
    }
}

impl Error for PushDecodeError {}

/// Push channel failures. All of them end the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Socket could not be opened or failed mid-session.
    Socket(String),
    /// Broker rejected or never completed the STOMP handshake.
    Handshake(String),
    /// Broker sent an ERROR frame or an unparseable frame.
    Protocol(String),
    /// Remote side closed the connection.
    Closed,
}

impl Display for PushError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Socket(message) => write!(f, "push socket error: {message}"),
            Self::Handshake(message) => write!(f, "push handshake failed: {message}"),
            Self::Protocol(message) => write!(f, "push protocol error: {message}"),
            Self::Closed => write!(f, "push connection closed by remote"),
        }
    }
}

impl Error for PushError {}

impl From<stomp::StompError> for PushError {
    fn from(value: stomp::StompError) -> Self {
        Self::Protocol(value.to_string())
    }
}

/// Decodes one message body from the tasks topic.
///
/// Accepted shapes:
/// - `{"kind": "UPSERT", "payload": {task}}` / `{"kind": "DELETION", "payload": 7}`
/// - any other JSON object as a task (legacy upsert), even with a `kind` field
/// - `"deleted:7"` as a JSON string or bare text (legacy deletion)
///
/// # Errors
/// - Returns `PushDecodeError` for every other payload.
pub fn decode_push_payload(body: &str) -> Result<PushEvent, PushDecodeError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(PushDecodeError::Empty);
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) if map.contains_key("kind") && map.contains_key("payload") => {
            serde_json::from_value::<TaggedEvent>(Value::Object(map))
                .map(PushEvent::from)
                .map_err(|err| PushDecodeError::MalformedEnvelope(err.to_string()))
        }
        Ok(value @ Value::Object(_)) => serde_json::from_value::<Task>(value)
            .map(PushEvent::Upsert)
            .map_err(|err| PushDecodeError::MalformedTask(err.to_string())),
        Ok(Value::String(text)) => decode_legacy_deletion(&text),
        Ok(_) => Err(PushDecodeError::Unrecognized(preview(trimmed))),
        Err(_) => decode_legacy_deletion(trimmed),
    }
}

fn decode_legacy_deletion(text: &str) -> Result<PushEvent, PushDecodeError> {
    let Some(raw_id) = text.trim().strip_prefix(LEGACY_DELETION_PREFIX) else {
        return Err(PushDecodeError::Unrecognized(preview(text)));
    };
    raw_id
        .parse::<TaskId>()
        .map(PushEvent::Deletion)
        .map_err(|_| PushDecodeError::InvalidDeletionId(raw_id.trim().to_string()))
}

fn preview(value: &str) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(MAX_PREVIEW_CHARS).collect::<String>();
    if normalized.chars().count() > MAX_PREVIEW_CHARS {
        truncated.push_str("...");
    }
    truncated
}
