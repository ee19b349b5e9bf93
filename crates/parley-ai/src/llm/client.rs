//! LLM client trait and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Chat message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One block of multi-part message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    ImageUrl(String),
}

/// Message content: plain text, or ordered parts when images are attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of the content, ignoring image parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text(text) => Some(text.as_str()),
                    ContentPart::ImageUrl(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Image URLs attached to the content, in order.
    pub fn image_urls(&self) -> Vec<&str> {
        match self {
            Self::Text(_) => Vec::new(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ImageUrl(url) => Some(url.as_str()),
                    ContentPart::Text(_) => None,
                })
                .collect(),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a message carrying text followed by image references.
    ///
    /// Falls back to plain text content when `images` is empty.
    pub fn with_images(role: Role, text: impl Into<String>, images: &[String]) -> Self {
        let text = text.into();
        if images.is_empty() {
            return Self {
                role,
                content: MessageContent::Text(text),
            };
        }

        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::Text(text));
        parts.extend(images.iter().cloned().map(ContentPart::ImageUrl));
        Self {
            role,
            content: MessageContent::Parts(parts),
        }
    }
}

/// LLM completion response
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: Option<TokenUsage>,
}

/// Reason for completion
#[derive(Debug, Clone, PartialEq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    ContentFilter,
    Error,
}

impl FinishReason {
    pub fn from_openai(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") | None => Self::Stop,
            Some("length") => Self::MaxTokens,
            Some("content_filter") => Self::ContentFilter,
            Some(_) => Self::Error,
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// LLM completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set temperature
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

/// LLM client trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Get provider name
    fn provider(&self) -> &str;

    /// Get model name
    fn model(&self) -> &str;

    /// Complete a chat request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
