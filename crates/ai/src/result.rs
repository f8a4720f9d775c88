use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::profile::ProfileSection;
use crate::recommendation::CollegeRecommendation;

/// Payload produced by a generation pipeline.
///
/// One variant per known result shape. Job records carry exactly one of these once
/// completed; the store checks the variant against the job kind before writing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum GenerationResult {
    Recommendations {
        recommendations: Vec<CollegeRecommendation>,
    },
    Profile {
        student_profile: Vec<ProfileSection>,
    },
}

impl GenerationResult {
    pub fn shape(&self) -> &'static str {
        match self {
            GenerationResult::Recommendations { .. } => "recommendations",
            GenerationResult::Profile { .. } => "profile",
        }
    }

    /// Number of top-level items (recommendations or profile sections).
    pub fn item_count(&self) -> usize {
        match self {
            GenerationResult::Recommendations { recommendations } => recommendations.len(),
            GenerationResult::Profile { student_profile } => student_profile.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    /// The payload as the plain list clients expect (no shape tag).
    pub fn items_json(&self) -> JsonValue {
        let items = match self {
            GenerationResult::Recommendations { recommendations } => {
                serde_json::to_value(recommendations)
            }
            GenerationResult::Profile { student_profile } => serde_json::to_value(student_profile),
        };
        items.unwrap_or(JsonValue::Array(Vec::new()))
    }
}

/// Provenance of a generation (where the context came from, which model, when).
///
/// Known keys are typed; anything else a pipeline wants to record goes in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl GenerationMetadata {
    pub fn from_user_responses() -> Self {
        Self {
            context_source: Some("user_responses".to_string()),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_prompt_version(mut self, version: impl Into<String>) -> Self {
        self.prompt_version = Some(version.into());
        self
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn with_generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Overlay `other` on top of `self`: fields set in `other` win, unset ones are kept.
    pub fn merged_with(mut self, other: GenerationMetadata) -> Self {
        if other.context_source.is_some() {
            self.context_source = other.context_source;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.prompt_version.is_some() {
            self.prompt_version = other.prompt_version;
        }
        if other.started_at.is_some() {
            self.started_at = other.started_at;
        }
        if other.generated_at.is_some() {
            self.generated_at = other.generated_at;
        }
        self.extra.extend(other.extra);
        self
    }
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("could not load user context: {0}")]
    Context(String),

    #[error("provider request failed: {0}")]
    Provider(String),

    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error("model returned no usable items: {0}")]
    EmptyResult(String),

    #[error("internal error: {0}")]
    Internal(String),
}
