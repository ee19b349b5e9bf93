//! Parley AI - completion-service client layer
//!
//! This crate provides:
//! - A provider-neutral chat completion request/response model
//! - Role-tagged messages with optional image parts for vision models
//! - An OpenAI-compatible `chat/completions` client
//! - A scripted mock client for pipeline tests

pub mod error;
mod http_client;
pub mod llm;

pub use error::{AiError, Result};
pub use llm::{
    CompletionRequest, CompletionResponse, ContentPart, FinishReason, LlmClient, Message,
    MessageContent, MockLlmClient, MockStep, OpenAIClient, Role, TokenUsage,
};
