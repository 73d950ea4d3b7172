//! Wire protocol for the push transport.
//!
//! Frames are JSON text. Chat messages and notices are untyped objects
//! (`{author, body, originId}` and `{system: true, body}`); everything else
//! carries a `type` tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{CatchUp, Message, Notice, ValidationError};

/// `type` tag of a presence query.
pub const PRESENCE_QUERY: &str = "presence-query";

/// Frame decoding error.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid message: {0}")]
    Invalid(#[from] ValidationError),
    #[error("Unknown frame type: {0}")]
    UnknownType(String),
}

/// Typed server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Control {
    /// Reply to a presence query.
    Presence { count: usize },
    /// Catch-up sent as the first frame of a session.
    History {
        offset: u64,
        #[serde(default)]
        epoch: u64,
        messages: Vec<Message>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notice: Option<Notice>,
    },
    /// A publish from this session was rejected.
    Error { message: String },
}

/// Message from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// A chat message with its absolute history index.
    Chat {
        #[serde(flatten)]
        message: Message,
        index: u64,
    },
    /// A system notice.
    Notice(Notice),
    /// A typed control frame.
    Control(Control),
}

impl ServerFrame {
    /// Build the catch-up frame.
    #[must_use]
    pub fn history(catch_up: CatchUp) -> Self {
        Self::Control(Control::History {
            offset: catch_up.page.offset,
            epoch: catch_up.page.epoch,
            messages: catch_up.page.messages,
            notice: catch_up.notice,
        })
    }

    /// Encode as JSON text.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Message from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// A chat message, still unvalidated.
    Publish(Value),
    /// Ask for the participant count.
    PresenceQuery,
}

impl ClientFrame {
    /// Decode a text frame.
    ///
    /// # Errors
    /// Returns error on invalid JSON or an unknown `type` tag.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        match value.get("type").and_then(Value::as_str) {
            None => Ok(Self::Publish(value)),
            Some(PRESENCE_QUERY) => Ok(Self::PresenceQuery),
            Some(other) => Err(FrameError::UnknownType(other.to_owned())),
        }
    }

    /// Encode a presence query.
    #[must_use]
    pub fn presence_query() -> String {
        serde_json::json!({ "type": PRESENCE_QUERY }).to_string()
    }
}

/// Catch-up as received by a client, entries not yet validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawHistory {
    /// Absolute index of the first entry.
    pub offset: u64,
    /// Number of clears the relay has performed.
    pub epoch: u64,
    /// Entries, oldest first.
    pub entries: Vec<Value>,
    /// Clear notice, if history was purged since the last append.
    pub notice: Option<Notice>,
}

/// A server frame as decoded by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Validated chat message.
    Chat {
        message: Message,
        index: Option<u64>,
    },
    /// System notice.
    Notice(Notice),
    /// Participant count.
    Presence(usize),
    /// Catch-up.
    History(RawHistory),
    /// Rejected publish.
    Error(String),
}

impl InboundFrame {
    /// Decode a text frame received from the server.
    ///
    /// # Errors
    /// Returns error on invalid JSON, unknown types, or invalid chat messages.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;

        if let Some(kind) = value.get("type").and_then(Value::as_str) {
            return match kind {
                "presence" => Ok(Self::Presence(
                    value.get("count").and_then(Value::as_u64).unwrap_or(0) as usize,
                )),
                "history" => Ok(Self::History(RawHistory {
                    offset: value.get("offset").and_then(Value::as_u64).unwrap_or(0),
                    epoch: value.get("epoch").and_then(Value::as_u64).unwrap_or(0),
                    entries: value
                        .get("messages")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default(),
                    notice: value
                        .get("notice")
                        .and_then(|n| serde_json::from_value(n.clone()).ok()),
                })),
                "error" => Ok(Self::Error(
                    value
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                )),
                other => Err(FrameError::UnknownType(other.to_owned())),
            };
        }

        if value.get("system").and_then(Value::as_bool) == Some(true) {
            let body = value
                .get("body")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Ok(Self::Notice(Notice::new(body)));
        }

        let message = Message::validate(&value)?;
        let index = value.get("index").and_then(Value::as_u64);
        Ok(Self::Chat { message, index })
    }
}
