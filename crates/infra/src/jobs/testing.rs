//! Pipeline doubles shared by the job tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use counsel_ai::{
    AiError, CollegeRecommendation, GenerationMetadata, GenerationOutput, GenerationPipeline,
    GenerationResult, ProfileSection,
};
use counsel_core::UserId;

enum Behavior {
    Succeed(GenerationOutput),
    Fail(Mutex<Option<AiError>>),
    Panic,
}

pub struct ScriptedPipeline {
    behavior: Behavior,
    gate: Option<Arc<Notify>>,
}

impl ScriptedPipeline {
    pub fn succeeding(output: GenerationOutput) -> Self {
        Self {
            behavior: Behavior::Succeed(output),
            gate: None,
        }
    }

    pub fn failing(error: AiError) -> Self {
        Self {
            behavior: Behavior::Fail(Mutex::new(Some(error))),
            gate: None,
        }
    }

    pub fn panicking() -> Self {
        Self {
            behavior: Behavior::Panic,
            gate: None,
        }
    }

    /// Succeeds only after the returned `Notify` is signalled.
    pub fn gated(output: GenerationOutput) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let pipeline = Self {
            behavior: Behavior::Succeed(output),
            gate: Some(gate.clone()),
        };
        (pipeline, gate)
    }
}

#[async_trait]
impl GenerationPipeline for ScriptedPipeline {
    async fn generate(&self, _user_id: &UserId) -> Result<GenerationOutput, AiError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.behavior {
            Behavior::Succeed(output) => Ok(output.clone()),
            Behavior::Fail(error) => Err(error
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| AiError::Internal("already failed once".into()))),
            Behavior::Panic => panic!("pipeline exploded"),
        }
    }
}

pub fn profile_output() -> GenerationOutput {
    GenerationOutput {
        result: GenerationResult::Profile {
            student_profile: vec![ProfileSection {
                section_id: "academics".into(),
                title: "Academics".into(),
                section_type: "paragraph".into(),
                content: json!("Strong in STEM"),
            }],
        },
        metadata: GenerationMetadata::default()
            .with_model("gpt-4o")
            .with_prompt_version("v1"),
    }
}

pub fn recommendations_output() -> GenerationOutput {
    let recommendation: CollegeRecommendation =
        serde_json::from_value(json!({"type": "Reach", "name": "MIT", "fit_score": "88"}))
            .unwrap();
    GenerationOutput {
        result: GenerationResult::Recommendations {
            recommendations: vec![recommendation],
        },
        metadata: GenerationMetadata::default().with_prompt_version("v1.0"),
    }
}
