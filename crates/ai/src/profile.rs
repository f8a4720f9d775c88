//! Student-profile sections and the pipeline that writes them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use counsel_core::UserId;

use crate::config::ModelSelection;
use crate::context::{build_context, ResponseSource};
use crate::model::{CompletionRequest, LanguageModel};
use crate::pipeline::{GenerationOutput, GenerationPipeline};
use crate::prompts::PromptSet;
use crate::result::{AiError, GenerationMetadata, GenerationResult};

pub const PROFILE_PROMPT_VERSION: &str = "v1";

fn default_section_type() -> String {
    "paragraph".to_string()
}

/// One titled block of the generated profile. `content` is free-form (text or a list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSection {
    #[serde(default)]
    pub section_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default = "default_section_type")]
    pub section_type: String,
    #[serde(default)]
    pub content: JsonValue,
}

impl ProfileSection {
    /// Shown when the user has not answered any onboarding form yet.
    pub fn no_data() -> Self {
        Self {
            section_id: "no_data".to_string(),
            title: "Complete Your Profile".to_string(),
            section_type: default_section_type(),
            content: json!("No profile data available."),
        }
    }
}

pub fn parse_profile(value: &JsonValue) -> Result<Vec<ProfileSection>, AiError> {
    let items = value
        .get("student_profile")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| AiError::MalformedOutput("missing \"student_profile\" array".to_string()))?;

    let sections = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            ProfileSection::deserialize(item)
                .map_err(|e| AiError::MalformedOutput(format!("profile section {i}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if sections.is_empty() {
        return Err(AiError::EmptyResult("profile had no sections".to_string()));
    }
    Ok(sections)
}

pub struct ProfilePipeline {
    model: Arc<dyn LanguageModel>,
    responses: Arc<dyn ResponseSource>,
    prompts: Arc<PromptSet>,
    models: ModelSelection,
}

impl ProfilePipeline {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        responses: Arc<dyn ResponseSource>,
        prompts: Arc<PromptSet>,
        models: ModelSelection,
    ) -> Self {
        Self {
            model,
            responses,
            prompts,
            models,
        }
    }
}

#[async_trait]
impl GenerationPipeline for ProfilePipeline {
    async fn generate(&self, user_id: &UserId) -> Result<GenerationOutput, AiError> {
        let responses = self.responses.responses_for(user_id).await?;
        let metadata = GenerationMetadata::from_user_responses()
            .with_prompt_version(PROFILE_PROMPT_VERSION);

        let Some(context) = build_context(&responses) else {
            debug!(%user_id, "no stored responses; returning placeholder profile");
            return Ok(GenerationOutput {
                result: GenerationResult::Profile {
                    student_profile: vec![ProfileSection::no_data()],
                },
                metadata: metadata
                    .with_generated_at(Utc::now())
                    .with_extra("placeholder", json!(true)),
            });
        };

        let request = CompletionRequest::new(&self.models.profile, &self.prompts.profile, context)
            .max_tokens(10_000)
            .temperature(0.7);
        let student_profile = parse_profile(&self.model.complete_json(request).await?)?;

        Ok(GenerationOutput {
            result: GenerationResult::Profile { student_profile },
            metadata: metadata
                .with_model(&self.models.profile)
                .with_generated_at(Utc::now()),
        })
    }
}
