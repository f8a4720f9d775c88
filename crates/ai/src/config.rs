//! Provider connection settings and per-step model choices.

use std::time::Duration;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Connection settings for an OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Which model each pipeline step talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    /// First-pass college recommendations (JSON mode).
    pub recommendation: String,
    /// Web-search pass that resolves opportunity links.
    pub link_search: String,
    /// Reformats free-text search output into a JSON list.
    pub format: String,
    /// Student profile sections (JSON mode).
    pub profile: String,
    /// Mentor chat replies.
    pub mentor: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            recommendation: "gpt-4o-mini".to_string(),
            link_search: "gpt-4.1".to_string(),
            format: "gpt-3.5-turbo".to_string(),
            profile: "gpt-4o".to_string(),
            mentor: "gpt-4o".to_string(),
        }
    }
}
