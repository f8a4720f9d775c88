//! `counsel-ai`
//!
//! **Responsibility:** the boundary to the language-model provider.
//!
//! This crate knows how to turn a user's stored answers into a prompt context, how to
//! call the provider, and how to parse what comes back into typed results. It never
//! touches job records: callers (the job runner in `infra`) decide what to do with a
//! result or an error.

pub mod config;
pub mod context;
pub mod mentor;
pub mod model;
pub mod openai;
pub mod pipeline;
pub mod profile;
pub mod prompts;
pub mod recommendation;
pub mod result;

pub use config::{ModelSelection, OpenAiConfig};
pub use context::{build_context, AnswerEntry, FormResponse, ResponseSource};
pub use mentor::{MentorChat, OpenAiMentor};
pub use model::{ChatMessage, ChatRole, CompletionRequest, LanguageModel, SearchRequest};
pub use openai::OpenAiClient;
pub use pipeline::{GenerationOutput, GenerationPipeline};
pub use profile::{ProfilePipeline, ProfileSection};
pub use prompts::PromptSet;
pub use recommendation::{CollegeRecommendation, RecommendationPipeline};
pub use result::{AiError, GenerationMetadata, GenerationResult};
