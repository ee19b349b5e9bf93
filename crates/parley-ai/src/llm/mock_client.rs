//! Deterministic mock LLM client for pipeline tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{Duration, sleep};

use crate::error::{AiError, Result};

use super::{CompletionRequest, CompletionResponse, FinishReason, LlmClient, TokenUsage};

#[derive(Debug, Clone)]
enum MockStepKind {
    Text(String),
    Error(String),
}

/// Scripted completion step with optional delay.
#[derive(Debug, Clone)]
pub struct MockStep {
    delay_ms: u64,
    kind: MockStepKind,
}

impl MockStep {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Text(content.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Error(message.into()),
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// A deterministic mock LLM client driven by scripted steps.
///
/// Every request is recorded so tests can inspect what the pipeline rendered.
/// Once the script runs out, each call fails with [`AiError::Llm`].
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    model: String,
    script: Arc<Mutex<VecDeque<MockStep>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self::from_steps(model, Vec::new())
    }

    pub fn from_steps(model: impl Into<String>, steps: Vec<MockStep>) -> Self {
        Self {
            model: model.into(),
            script: Arc::new(Mutex::new(VecDeque::from(steps))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn push_step(&self, step: MockStep) {
        self.script.lock().await.push_back(step);
    }

    /// Requests received so far, in call order.
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_step(&self) -> Option<MockStep> {
        self.script.lock().await.pop_front()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().await.push(request);

        let step = self
            .next_step()
            .await
            .ok_or_else(|| AiError::Llm("mock script exhausted".to_string()))?;

        if step.delay_ms > 0 {
            sleep(Duration::from_millis(step.delay_ms)).await;
        }

        match step.kind {
            MockStepKind::Text(content) => {
                let completion_tokens = content.chars().count() as u32;
                Ok(CompletionResponse {
                    content: Some(content),
                    finish_reason: FinishReason::Stop,
                    usage: Some(TokenUsage {
                        prompt_tokens: 1,
                        completion_tokens,
                        total_tokens: 1 + completion_tokens,
                    }),
                })
            }
            MockStepKind::Error(message) => Err(AiError::Llm(message)),
        }
    }
}
