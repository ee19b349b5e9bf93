//! Pipeline error taxonomy

use parley_ai::AiError;
use thiserror::Error;

/// Errors raised while turning an inbound message into a reply.
///
/// Only [`PipelineError::Source`] and [`PipelineError::Config`] are fatal;
/// everything else is confined to the message being processed.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Inbound message source failed: {0}")]
    Source(String),

    #[error("Failed to fetch history for conversation {conversation_id}: {message}")]
    HistoryFetch {
        conversation_id: String,
        message: String,
    },

    #[error("Completion request failed: {0}")]
    Completion(#[from] AiError),

    #[error("Failed to send segment {segment} to conversation {conversation_id}: {message}")]
    Send {
        conversation_id: String,
        segment: usize,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether the error must stop the bot rather than just the current message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Source(_) | Self::Config(_))
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
