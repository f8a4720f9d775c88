//! Provider-agnostic language-model seam.
//!
//! Pipelines only see this trait, so tests can script model output without a network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::result::AiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chat-completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl CompletionRequest {
    /// The common system-prompt + single user message shape.
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            max_tokens: 1024,
            temperature: 0.7,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A completion call with the provider's web-search tool enabled.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub model: String,
    pub system: String,
    pub input: String,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Chat completion in JSON mode, parsed into a JSON value.
    async fn complete_json(&self, request: CompletionRequest) -> Result<JsonValue, AiError>;

    /// Plain chat completion returning the assistant text.
    async fn complete_text(&self, request: CompletionRequest) -> Result<String, AiError>;

    /// Completion with web search; returns the model's output text.
    async fn search_web(&self, request: SearchRequest) -> Result<String, AiError>;
}
