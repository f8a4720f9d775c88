//! OpenAI-compatible HTTP client (chat completions + responses API with web search).

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, instrument};

use crate::config::OpenAiConfig;
use crate::model::{CompletionRequest, LanguageModel, SearchRequest};
use crate::result::AiError;

pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AiError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { http, config })
    }

    async fn post(&self, path: &str, body: &JsonValue) -> Result<JsonValue, AiError> {
        if self.config.api_key.is_empty() {
            return Err(AiError::Provider("OPENAI_API_KEY is not configured".to_string()));
        }

        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AiError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Provider(format!("{path} returned {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| AiError::MalformedOutput(format!("{path} body was not JSON: {e}")))
    }
}

fn chat_body(request: &CompletionRequest, json_mode: bool) -> JsonValue {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    });
    if json_mode {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

/// `choices[0].message.content` of a chat-completion response.
pub fn message_content(response: &JsonValue) -> Result<&str, AiError> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| AiError::MalformedOutput("completion had no message content".to_string()))
}

/// Concatenated text of a responses-API result.
///
/// Prefers a top-level `output_text` when the server provides one; otherwise joins every
/// `output_text` content part of the `output` items.
pub fn response_output_text(response: &JsonValue) -> String {
    if let Some(text) = response.get("output_text").and_then(JsonValue::as_str) {
        return text.to_string();
    }

    let mut parts = Vec::new();
    for item in response["output"].as_array().into_iter().flatten() {
        for content in item["content"].as_array().into_iter().flatten() {
            if content["type"] == "output_text" {
                if let Some(text) = content["text"].as_str() {
                    parts.push(text);
                }
            }
        }
    }
    parts.join("\n")
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    #[instrument(skip(self, request), fields(model = %request.model), err)]
    async fn complete_json(&self, request: CompletionRequest) -> Result<JsonValue, AiError> {
        let response = self.post("chat/completions", &chat_body(&request, true)).await?;
        let content = message_content(&response)?;
        debug!(chars = content.len(), "received JSON completion");
        serde_json::from_str(content)
            .map_err(|e| AiError::MalformedOutput(format!("completion was not valid JSON: {e}")))
    }

    #[instrument(skip(self, request), fields(model = %request.model), err)]
    async fn complete_text(&self, request: CompletionRequest) -> Result<String, AiError> {
        let response = self.post("chat/completions", &chat_body(&request, false)).await?;
        Ok(message_content(&response)?.trim().to_string())
    }

    #[instrument(skip(self, request), fields(model = %request.model), err)]
    async fn search_web(&self, request: SearchRequest) -> Result<String, AiError> {
        let body = json!({
            "model": request.model,
            "input": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.input },
            ],
            "tools": [{ "type": "web_search_preview", "search_context_size": "medium" }],
            "tool_choice": { "type": "web_search_preview" },
        });
        let response = self.post("responses", &body).await?;
        let text = response_output_text(&response);
        if text.trim().is_empty() {
            return Err(AiError::MalformedOutput("web search returned no text".to_string()));
        }
        Ok(text)
    }
}
