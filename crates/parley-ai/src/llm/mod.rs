//! LLM module - completion client abstraction

mod client;
mod mock_client;
mod openai;

pub use client::{
    CompletionRequest, CompletionResponse, ContentPart, FinishReason, LlmClient, Message,
    MessageContent, Role, TokenUsage,
};
pub use mock_client::{MockLlmClient, MockStep};
pub use openai::OpenAIClient;
