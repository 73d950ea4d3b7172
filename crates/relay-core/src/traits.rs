//! Collaborator traits for object storage and display rendering.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Message, Notice};

/// Result of storing an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Object identifier.
    pub id: String,
    /// Where the object can be retrieved, embedded into message bodies.
    pub locator: String,
}

/// A previously stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// Raw bytes.
    pub data: Bytes,
    /// MIME type given at upload.
    pub mime: String,
}

/// Object storage error.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("Object too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },
    #[error("Empty upload")]
    Empty,
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for upload storage backends.
///
/// The relay only needs to persist a blob and get back a locator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a blob.
    async fn put(&self, data: Bytes, mime: &str) -> Result<StoredObject, ObjectError>;

    /// Fetch a blob by id.
    async fn get(&self, id: &str) -> Result<Option<Object>, ObjectError>;
}

/// Trait for turning validated messages into display text.
pub trait Renderer: Send + Sync {
    /// Render a chat message.
    fn render(&self, message: &Message) -> String;

    /// Render a system notice.
    fn render_notice(&self, notice: &Notice) -> String {
        format!("* {}", notice.body)
    }
}

/// Plain-text renderer for terminals.
///
/// Control characters other than tab are dropped so a message cannot move
/// the cursor or recolor the terminal. Everything else is shown as typed.
#[derive(Debug, Default, Clone)]
pub struct PlainRenderer;

impl PlainRenderer {
    fn clean(text: &str) -> String {
        text.chars()
            .filter(|&c| c == '\t' || !c.is_control())
            .collect()
    }
}

impl Renderer for PlainRenderer {
    fn render(&self, message: &Message) -> String {
        format!("{}: {}", Self::clean(&message.author), Self::clean(&message.body))
    }

    fn render_notice(&self, notice: &Notice) -> String {
        format!("* {}", Self::clean(&notice.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_renderer_strips_control_characters() {
        let message = Message::new("eve", "hi\u{7}\u{1b}[2J!\tok", None).unwrap();
        assert_eq!(PlainRenderer.render(&message), "eve: hi[2J!\tok");
    }

    #[test]
    fn test_plain_renderer_keeps_angle_brackets() {
        let message = Message::new("bob", "if a < b then c", None).unwrap();
        assert_eq!(PlainRenderer.render(&message), "bob: if a < b then c");

        let message = Message::new("<b>eve</b>", "<3 and <unclosed tail", None).unwrap();
        assert_eq!(
            PlainRenderer.render(&message),
            "<b>eve</b>: <3 and <unclosed tail"
        );
    }

    #[test]
    fn test_plain_renderer_notice() {
        assert_eq!(
            PlainRenderer.render_notice(&Notice::history_cleared()),
            "* history cleared"
        );
    }
}
