//! Mentor chat: a single counselor reply given recent conversation history.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::model::{ChatMessage, ChatRole, CompletionRequest, LanguageModel};

pub const MENTOR_SYSTEM_PROMPT: &str = "You are a helpful college counselor and mentor. \
Provide personalized advice to help students with their college planning and applications.";

pub const FALLBACK_REPLY: &str =
    "I'm here to help you with your college journey! What would you like to know?";

/// Turns of history forwarded to the model.
pub const HISTORY_WINDOW: usize = 10;

#[async_trait]
pub trait MentorChat: Send + Sync {
    /// Never fails: provider problems produce a fallback reply.
    async fn reply(&self, message: &str, history: &[ChatMessage]) -> String;
}

pub struct OpenAiMentor {
    model: Arc<dyn LanguageModel>,
    model_name: String,
}

impl OpenAiMentor {
    pub fn new(model: Arc<dyn LanguageModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
        }
    }

    fn request(&self, message: &str, history: &[ChatMessage]) -> CompletionRequest {
        let recent = &history[history.len().saturating_sub(HISTORY_WINDOW)..];
        let mut messages = Vec::with_capacity(recent.len() + 2);
        messages.push(ChatMessage::system(MENTOR_SYSTEM_PROMPT));
        // Clients cannot inject their own system turns.
        messages.extend(recent.iter().filter(|m| m.role != ChatRole::System).cloned());
        messages.push(ChatMessage::user(message));

        CompletionRequest {
            model: self.model_name.clone(),
            messages,
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

#[async_trait]
impl MentorChat for OpenAiMentor {
    async fn reply(&self, message: &str, history: &[ChatMessage]) -> String {
        match self.model.complete_text(self.request(message, history)).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => FALLBACK_REPLY.to_string(),
            Err(e) => {
                warn!(error = %e, "mentor reply failed; using fallback");
                FALLBACK_REPLY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scripted::ScriptedModel;
    use crate::result::AiError;

    #[tokio::test]
    async fn only_the_last_ten_turns_are_sent() {
        let model = Arc::new(ScriptedModel::new());
        model.push_text(Ok("Start with your intended major.".into()));
        let mentor = OpenAiMentor::new(model.clone(), "gpt-4o");

        let history: Vec<ChatMessage> = (0..14)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{i}"))
                } else {
                    ChatMessage::assistant(format!("a{i}"))
                }
            })
            .collect();

        let reply = mentor.reply("Where do I begin?", &history).await;
        assert_eq!(reply, "Start with your intended major.");

        let completions = model.completions.lock().unwrap();
        let sent = &completions[0].messages;
        assert_eq!(sent.len(), 12);
        assert_eq!(sent[0].role, ChatRole::System);
        assert_eq!(sent[1].content, "q4");
        assert_eq!(sent[11].content, "Where do I begin?");
        assert_eq!(completions[0].max_tokens, 500);
    }

    #[tokio::test]
    async fn provider_errors_become_the_fallback_reply() {
        let model = Arc::new(ScriptedModel::new());
        model.push_text(Err(AiError::Provider("timeout".into())));
        let mentor = OpenAiMentor::new(model, "gpt-4o");

        assert_eq!(mentor.reply("hello", &[]).await, FALLBACK_REPLY);
    }
}
