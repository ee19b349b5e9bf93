//! Universal Channel Types
//!
//! Core message types shared by every chat platform.

use serde::{Deserialize, Serialize};

/// A chat message as seen by the bot
///
/// Values are immutable once built; the builder methods consume `self`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Platform message ID
    pub id: String,
    /// Conversation identifier (channel or thread ID)
    pub conversation_id: String,
    /// Author identifier (user ID on the platform)
    pub author_id: String,
    /// Author display name
    pub author_name: String,
    /// Whether the bot itself wrote the message
    pub is_own: bool,
    /// Message text with mentions resolved to names
    pub text: String,
    /// Attached image URLs, in attachment order
    pub images: Vec<String>,
    /// Timestamp (milliseconds since epoch)
    pub timestamp: i64,
}

impl ChatMessage {
    /// Create a new message from another user
    pub fn new(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        author_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let author_id = author_id.into();
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            author_name: author_id.clone(),
            author_id,
            is_own: false,
            text: text.into(),
            images: Vec::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Set author display name
    pub fn with_author_name(mut self, name: impl Into<String>) -> Self {
        self.author_name = name.into();
        self
    }

    /// Mark the message as written by the bot
    pub fn own(mut self) -> Self {
        self.is_own = true;
        self
    }

    /// Attach image URLs
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// Set timestamp
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Outbound message to a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Conversation identifier
    pub conversation_id: String,
    /// Message text
    pub content: String,
    /// Message this one is threaded to, if sent as a reply
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    /// Create a plain (non-threaded) message
    pub fn new(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            content: content.into(),
            reply_to: None,
        }
    }

    /// Create a message threaded as a reply to `target`
    pub fn reply(target: &ChatMessage, content: impl Into<String>) -> Self {
        Self::new(&target.conversation_id, content).with_reply_to(&target.id)
    }

    /// Create a follow-up in `target`'s conversation, not threaded
    pub fn follow_up(target: &ChatMessage, content: impl Into<String>) -> Self {
        Self::new(&target.conversation_id, content)
    }

    /// Set reply_to
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}
