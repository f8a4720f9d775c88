use std::sync::Arc;

use anyhow::Context;

use counsel_ai::{
    GenerationPipeline, LanguageModel, MentorChat, OpenAiClient, OpenAiMentor, ProfilePipeline,
    PromptSet, RecommendationPipeline, ResponseSource,
};
use counsel_infra::{
    config::{AppConfig, GenerationConfig},
    db,
    jobs::{
        GenerationJobStore, GenerationRunner, InMemoryGenerationJobStore, JobKind,
        PostgresGenerationJobStore, StatusResolver, TaskSpawner, TokioTaskSpawner,
    },
    responses::{InMemoryResponseStore, PostgresResponseStore, ResponseStore, StoreResponseSource},
    users::{InMemoryUserStore, PostgresUserStore, UserStore},
};

/// Start/status/history operations for one job kind.
pub struct GenerationService {
    pub runner: GenerationRunner,
    pub status: StatusResolver,
}

impl GenerationService {
    fn new(
        kind: JobKind,
        store: Arc<dyn GenerationJobStore>,
        pipeline: Arc<dyn GenerationPipeline>,
        spawner: Arc<dyn TaskSpawner>,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            runner: GenerationRunner::new(kind, store.clone(), pipeline, spawner, generation.grace_period),
            status: StatusResolver::new(kind, store, generation.deadlock_threshold),
        }
    }
}

/// Everything the services are assembled from. Tests swap in scripted pipelines here.
pub struct ServiceParts {
    pub jobs: Arc<dyn GenerationJobStore>,
    pub responses: Arc<dyn ResponseStore>,
    pub users: Arc<dyn UserStore>,
    pub recommendation_pipeline: Arc<dyn GenerationPipeline>,
    pub profile_pipeline: Arc<dyn GenerationPipeline>,
    pub mentor: Arc<dyn MentorChat>,
    pub generation: GenerationConfig,
}

pub struct AppServices {
    pub recommendations: GenerationService,
    pub profiles: GenerationService,
    pub responses: Arc<dyn ResponseStore>,
    pub users: Arc<dyn UserStore>,
    pub mentor: Arc<dyn MentorChat>,
    pub spawner: Arc<TokioTaskSpawner>,
}

impl AppServices {
    pub fn from_parts(parts: ServiceParts) -> Self {
        let spawner = Arc::new(TokioTaskSpawner::new());
        Self {
            recommendations: GenerationService::new(
                JobKind::Recommendations,
                parts.jobs.clone(),
                parts.recommendation_pipeline,
                spawner.clone(),
                parts.generation,
            ),
            profiles: GenerationService::new(
                JobKind::Profile,
                parts.jobs,
                parts.profile_pipeline,
                spawner.clone(),
                parts.generation,
            ),
            responses: parts.responses,
            users: parts.users,
            mentor: parts.mentor,
            spawner,
        }
    }
}

/// Wire stores, provider client and pipelines from configuration.
///
/// `USE_PERSISTENT_STORES=true` selects Postgres for every store; otherwise everything is
/// in memory and lost on restart.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let Stores { jobs, responses, users } = build_stores(config).await?;

    if config.openai.api_key.is_empty() {
        tracing::warn!("OPENAI_API_KEY not set; generations will fail and chat will use fallback replies");
    }
    let model: Arc<dyn LanguageModel> = Arc::new(OpenAiClient::new(config.openai.clone())?);
    let prompts = Arc::new(PromptSet::load(&config.prompts_dir));
    let source: Arc<dyn ResponseSource> = Arc::new(StoreResponseSource::new(responses.clone()));

    Ok(AppServices::from_parts(ServiceParts {
        jobs,
        responses,
        users,
        recommendation_pipeline: Arc::new(RecommendationPipeline::new(
            model.clone(),
            source.clone(),
            prompts.clone(),
            config.models.clone(),
        )),
        profile_pipeline: Arc::new(ProfilePipeline::new(
            model.clone(),
            source,
            prompts,
            config.models.clone(),
        )),
        mentor: Arc::new(OpenAiMentor::new(model, config.models.mentor.clone())),
        generation: config.generation,
    }))
}

struct Stores {
    jobs: Arc<dyn GenerationJobStore>,
    responses: Arc<dyn ResponseStore>,
    users: Arc<dyn UserStore>,
}

async fn build_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if !config.use_persistent_stores {
        tracing::warn!("USE_PERSISTENT_STORES is off; jobs, responses and users live in memory");
        return Ok(Stores {
            jobs: InMemoryGenerationJobStore::arc(),
            responses: InMemoryResponseStore::arc(),
            users: InMemoryUserStore::arc(),
        });
    }

    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required for persistent stores")?;
    let pool = db::connect(url, 10).await.context("failed to connect to Postgres")?;
    db::ensure_schema(&pool).await.context("failed to create schema")?;
    tracing::info!("using Postgres stores");

    Ok(Stores {
        jobs: Arc::new(PostgresGenerationJobStore::new(pool.clone())),
        responses: Arc::new(PostgresResponseStore::new(pool.clone())),
        users: Arc::new(PostgresUserStore::new(pool)),
    })
}
