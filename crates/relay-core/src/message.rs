//! Chat messages and their validation at the wire boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Maximum author length, in characters, after trimming.
pub const MAX_AUTHOR_CHARS: usize = 50;

/// Maximum body length, in characters, after trimming.
pub const MAX_BODY_CHARS: usize = 1000;

/// A validated chat message.
///
/// Only constructed through [`Message::validate`] or [`Message::new`], so every
/// instance in the store has a non-empty author and body within limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Nickname of the sender. Advisory only.
    pub author: String,
    /// Message text.
    pub body: String,
    /// Session that authored the message, used to suppress echoes.
    #[serde(default)]
    pub origin_id: Option<String>,
}

/// Message field names, used in validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The `author` field.
    Author,
    /// The `body` field.
    Body,
    /// The `originId` field.
    OriginId,
}

impl Field {
    const fn name(self) -> &'static str {
        match self {
            Self::Author => "author",
            Self::Body => "body",
            Self::OriginId => "originId",
        }
    }

    /// Field name used by older clients.
    const fn legacy_name(self) -> &'static str {
        match self {
            Self::Author => "user",
            Self::Body => "msg",
            Self::OriginId => "userId",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Message validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message must be a JSON object")]
    NotAnObject,
    #[error("missing field: {0}")]
    Missing(Field),
    #[error("field {0} must be a string")]
    NotAString(Field),
    #[error("field {0} is empty")]
    Empty(Field),
    #[error("field {field} exceeds {max} characters")]
    TooLong { field: Field, max: usize },
}

impl Message {
    /// Build a message from already-trusted parts, applying the same rules as
    /// [`Message::validate`].
    ///
    /// # Errors
    /// Returns error if author or body are empty after trimming or too long.
    pub fn new(
        author: &str,
        body: &str,
        origin_id: Option<String>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            author: checked(Field::Author, author, MAX_AUTHOR_CHARS)?,
            body: checked(Field::Body, body, MAX_BODY_CHARS)?,
            origin_id,
        })
    }

    /// Validate a loosely-typed wire payload into a message.
    ///
    /// Accepts `author`/`body`/`originId` and the older `user`/`msg`/`userId`
    /// names. Values are stored trimmed.
    ///
    /// # Errors
    /// Returns error on non-object payloads, missing or non-string fields,
    /// empty-after-trim fields, and oversize fields.
    pub fn validate(raw: &Value) -> Result<Self, ValidationError> {
        let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

        let author = required_str(obj, Field::Author)?;
        let body = required_str(obj, Field::Body)?;
        let origin_id = match lookup(obj, Field::OriginId) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(ValidationError::NotAString(Field::OriginId)),
        };

        Self::new(author, body, origin_id)
    }

    /// Whether this message was authored by the given origin.
    #[must_use]
    pub fn is_from(&self, origin_id: &str) -> bool {
        self.origin_id.as_deref() == Some(origin_id)
    }
}

fn lookup(obj: &Map<String, Value>, field: Field) -> Option<&Value> {
    obj.get(field.name()).or_else(|| obj.get(field.legacy_name()))
}

fn required_str(obj: &Map<String, Value>, field: Field) -> Result<&str, ValidationError> {
    match lookup(obj, field) {
        None | Some(Value::Null) => Err(ValidationError::Missing(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ValidationError::NotAString(field)),
    }
}

fn checked(field: Field, value: &str, max: usize) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty(field));
    }
    if trimmed.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(trimmed.to_owned())
}

/// A system notice, e.g. announcing that history was cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Always `true` on the wire; distinguishes notices from chat messages.
    pub system: bool,
    /// Notice text.
    pub body: String,
}

impl Notice {
    /// Create a system notice.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            system: true,
            body: body.into(),
        }
    }

    /// The notice broadcast when history is cleared.
    #[must_use]
    pub fn history_cleared() -> Self {
        Self::new("history cleared")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_validate_trims_fields() {
        let msg = Message::validate(&json!({
            "author": "  alice ",
            "body": "\thi there\n",
            "originId": "user_1"
        }))
        .unwrap();
        assert_eq!(msg.author, "alice");
        assert_eq!(msg.body, "hi there");
        assert!(msg.is_from("user_1"));
    }

    #[test]
    fn test_validate_accepts_legacy_names() {
        let msg = Message::validate(&json!({"user": "bob", "msg": "yo", "userId": "u9"})).unwrap();
        assert_eq!(msg.author, "bob");
        assert_eq!(msg.body, "yo");
        assert_eq!(msg.origin_id.as_deref(), Some("u9"));
    }

    #[test]
    fn test_validate_rejects_bad_payloads() {
        assert_eq!(
            Message::validate(&json!("hi")),
            Err(ValidationError::NotAnObject)
        );
        assert_eq!(
            Message::validate(&json!({"body": "hi"})),
            Err(ValidationError::Missing(Field::Author))
        );
        assert_eq!(
            Message::validate(&json!({"author": 7, "body": "hi"})),
            Err(ValidationError::NotAString(Field::Author))
        );
        assert_eq!(
            Message::validate(&json!({"author": "a", "body": "   "})),
            Err(ValidationError::Empty(Field::Body))
        );
        assert_eq!(
            Message::validate(&json!({"author": "a", "body": "b", "originId": 3})),
            Err(ValidationError::NotAString(Field::OriginId))
        );
    }

    #[test]
    fn test_length_limits_count_characters() {
        let author = "é".repeat(MAX_AUTHOR_CHARS);
        assert!(Message::new(&author, "ok", None).is_ok());

        let author = "a".repeat(MAX_AUTHOR_CHARS + 1);
        assert_eq!(
            Message::new(&author, "ok", None),
            Err(ValidationError::TooLong {
                field: Field::Author,
                max: MAX_AUTHOR_CHARS
            })
        );

        let body = "b".repeat(MAX_BODY_CHARS + 1);
        assert!(matches!(
            Message::new("a", &body, None),
            Err(ValidationError::TooLong { field: Field::Body, .. })
        ));
    }

    #[test]
    fn test_wire_field_names() {
        let msg = Message::new("alice", "hi", Some("o1".into())).unwrap();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"author": "alice", "body": "hi", "originId": "o1"}));
    }
}
