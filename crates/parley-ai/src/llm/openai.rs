//! OpenAI-compatible LLM provider
//!
//! Talks to any endpoint implementing `POST {base_url}/chat/completions`.
//! Failures are surfaced once; callers decide whether to try again.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::error::{AiError, Result};
use crate::http_client::build_http_client;
use crate::llm::client::{
    CompletionRequest, CompletionResponse, ContentPart, FinishReason, LlmClient, Message,
    MessageContent, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const MAX_ERROR_BODY: usize = 512;

/// OpenAI client
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create a new OpenAI client
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(None),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set custom base URL (for API-compatible services)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bound the whole request (connect + response) by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_http_client(Some(timeout));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn to_wire_message(message: &Message) -> OpenAIMessage {
        let content = match &message.content {
            MessageContent::Text(text) => OpenAIContent::Text(text.clone()),
            MessageContent::Parts(parts) => OpenAIContent::Parts(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text(text) => OpenAIContentPart::Text { text: text.clone() },
                        ContentPart::ImageUrl(url) => OpenAIContentPart::ImageUrl {
                            image_url: OpenAIImageUrl {
                                url: url.clone(),
                                detail: "auto",
                            },
                        },
                    })
                    .collect(),
            ),
        };

        OpenAIMessage {
            role: message.role.as_str(),
            content,
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: OpenAIContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Serialize)]
struct OpenAIImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

async fn response_to_error(response: Response, provider: &str) -> AiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    // Keep provider error bodies short in logs.
    let message = if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... [truncated]", &body[..cut])
    } else {
        body
    };

    AiError::Api {
        provider: provider.to_string(),
        status,
        message,
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = OpenAIRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(Self::to_wire_message).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        tracing::debug!(
            model = %self.model,
            messages = body.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_error(response, "OpenAI").await);
        }

        let data: OpenAIResponse = response.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AiError::Llm("No response from OpenAI".to_string()))?;

        let usage = data.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(CompletionResponse {
            content: choice.message.content,
            finish_reason: FinishReason::from_openai(choice.finish_reason.as_deref()),
            usage,
        })
    }
}
