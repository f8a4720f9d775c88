use async_trait::async_trait;

use counsel_core::UserId;

use crate::result::{AiError, GenerationMetadata, GenerationResult};

/// What a pipeline hands back on success.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub result: GenerationResult,
    pub metadata: GenerationMetadata,
}

/// A multi-step generation call-out for one user.
///
/// Implementations gather whatever context they need, talk to the provider and return a
/// typed result. They do not retry and do not write job state; an `Err` is recorded as a
/// failed job by the caller.
#[async_trait]
pub trait GenerationPipeline: Send + Sync + 'static {
    async fn generate(&self, user_id: &UserId) -> Result<GenerationOutput, AiError>;
}
