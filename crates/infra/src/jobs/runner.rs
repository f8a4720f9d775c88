//! Starting generations and running them in the background.

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn, Instrument};

use counsel_ai::{GenerationMetadata, GenerationPipeline};
use counsel_core::{JobId, UserId};

use super::spawner::TaskSpawner;
use super::store::{GenerationJobStore, JobStoreError};
use super::types::{GenerationJob, JobFilter, JobKind, JobStatus, JobUpdate};

/// What `start_generation` reports back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct StartOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    /// `created_at` of a new job, or the heartbeat of a reused one.
    pub at: DateTime<Utc>,
    /// True when an in-flight job inside the grace window was returned instead.
    pub reused: bool,
}

pub struct GenerationRunner {
    kind: JobKind,
    store: Arc<dyn GenerationJobStore>,
    pipeline: Arc<dyn GenerationPipeline>,
    spawner: Arc<dyn TaskSpawner>,
    grace_period: chrono::Duration,
}

impl GenerationRunner {
    pub fn new(
        kind: JobKind,
        store: Arc<dyn GenerationJobStore>,
        pipeline: Arc<dyn GenerationPipeline>,
        spawner: Arc<dyn TaskSpawner>,
        grace_period: std::time::Duration,
    ) -> Self {
        Self {
            kind,
            store,
            pipeline,
            spawner,
            grace_period: chrono::Duration::from_std(grace_period)
                .unwrap_or(chrono::Duration::seconds(30)),
        }
    }

    /// Create a `generating` job and launch its pipeline, or return the job already in
    /// flight if its heartbeat is within the grace window.
    pub async fn start_generation(&self, user_id: &UserId) -> Result<StartOutcome, JobStoreError> {
        let now = Utc::now();

        let in_flight = self
            .store
            .find_many(
                &JobFilter::for_user(user_id.clone(), self.kind)
                    .with_status(JobStatus::Generating)
                    .updated_after(now - self.grace_period),
            )
            .await?
            .into_iter()
            .max_by_key(GenerationJob::recency_key);

        if let Some(job) = in_flight {
            info!(%user_id, job_id = %job.id, kind = %self.kind, "generation already in progress");
            return Ok(StartOutcome {
                job_id: job.id,
                status: job.status,
                at: job.updated_at,
                reused: true,
            });
        }

        let job = self
            .store
            .create(GenerationJob::new_generating(user_id.clone(), self.kind, now))
            .await?;
        info!(%user_id, job_id = %job.id, kind = %self.kind, "generation started");

        let task = run_generation(
            self.store.clone(),
            self.pipeline.clone(),
            self.kind,
            job.id,
            user_id.clone(),
            job.metadata.clone(),
        );
        let span = tracing::info_span!("generation", job_id = %job.id, user_id = %user_id, kind = %self.kind);
        self.spawner.spawn(job.id, Box::pin(task.instrument(span)));

        Ok(StartOutcome {
            job_id: job.id,
            status: job.status,
            at: job.created_at,
            reused: false,
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Body of the background task. Never returns an error: every outcome ends up in the store
/// (or in the log, if the store itself is failing).
async fn run_generation(
    store: Arc<dyn GenerationJobStore>,
    pipeline: Arc<dyn GenerationPipeline>,
    kind: JobKind,
    job_id: JobId,
    user_id: UserId,
    started: GenerationMetadata,
) {
    match store.update_fields(job_id, JobUpdate::heartbeat(Utc::now())).await {
        Ok(true) => {}
        Ok(false) => {
            warn!("job left generating before the task started; skipping");
            return;
        }
        Err(e) => warn!(error = %e, "heartbeat failed; continuing"),
    }

    // Nested task: a panic inside the pipeline surfaces as a JoinError here.
    let outcome = tokio::spawn({
        let user_id = user_id.clone();
        async move { pipeline.generate(&user_id).await }.in_current_span()
    })
    .await;

    let update = match outcome {
        Ok(Ok(output)) if output.result.is_empty() => {
            JobUpdate::fail("Generation produced no results", Utc::now())
        }
        Ok(Ok(output)) if !kind.accepts(&output.result) => JobUpdate::fail(
            format!("Generation produced a {} result for a {kind} job", output.result.shape()),
            Utc::now(),
        ),
        Ok(Ok(output)) => {
            info!(items = output.result.item_count(), "generation succeeded");
            JobUpdate::complete(output.result, started.merged_with(output.metadata), Utc::now())
        }
        Ok(Err(e)) => {
            error!(error = %e, "generation failed");
            JobUpdate::fail(e.to_string(), Utc::now())
        }
        Err(join) if join.is_panic() => {
            let message = panic_message(join.into_panic());
            error!(panic = %message, "generation panicked");
            JobUpdate::fail(format!("Generation task panicked: {message}"), Utc::now())
        }
        Err(join) => {
            error!(error = %join, "generation task cancelled");
            JobUpdate::fail("Generation task was cancelled", Utc::now())
        }
    };

    let completed = update.status == Some(JobStatus::Completed);
    match store.update_fields(job_id, update).await {
        Ok(true) => info!(completed, "job finished"),
        Ok(false) => warn!(completed, "job already finished or timed out; outcome discarded"),
        Err(JobStoreError::InvalidRecord(reason)) => {
            error!(%reason, "result rejected by store; marking job failed");
            let fallback = JobUpdate::fail(format!("Invalid generation result: {reason}"), Utc::now());
            if let Err(e) = store.update_fields(job_id, fallback).await {
                error!(error = %e, "could not record failure");
            }
        }
        Err(e) => error!(error = %e, "could not record job outcome"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::spawner::TokioTaskSpawner;
    use crate::jobs::store::InMemoryGenerationJobStore;
    use crate::jobs::testing::{profile_output, ScriptedPipeline};
    use counsel_ai::AiError;

    struct Harness {
        store: Arc<InMemoryGenerationJobStore>,
        spawner: Arc<TokioTaskSpawner>,
        runner: GenerationRunner,
    }

    fn harness(pipeline: ScriptedPipeline) -> Harness {
        let store = InMemoryGenerationJobStore::arc();
        let spawner = Arc::new(TokioTaskSpawner::new());
        let runner = GenerationRunner::new(
            JobKind::Profile,
            store.clone(),
            Arc::new(pipeline),
            spawner.clone(),
            std::time::Duration::from_secs(30),
        );
        Harness {
            store,
            spawner,
            runner,
        }
    }

    fn user() -> UserId {
        UserId::parse("u1").unwrap()
    }

    async fn stored(store: &InMemoryGenerationJobStore, id: JobId) -> GenerationJob {
        store
            .find_many(&JobFilter::default())
            .await
            .unwrap()
            .into_iter()
            .find(|j| j.id == id)
            .unwrap()
    }

    #[tokio::test]
    async fn successful_pipeline_completes_the_job() {
        let h = harness(ScriptedPipeline::succeeding(profile_output()));
        let started = h.runner.start_generation(&user()).await.unwrap();
        assert_eq!(started.status, JobStatus::Generating);
        assert!(!started.reused);

        h.spawner.wait(started.job_id).await;
        let job = stored(&h.store, started.job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.result.is_some());
        assert!(job.error.is_none());
        assert_eq!(job.metadata.context_source.as_deref(), Some("user_responses"));
        assert!(job.metadata.started_at.is_some());
        assert_eq!(job.metadata.prompt_version.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn pipeline_errors_fail_the_job() {
        let h = harness(ScriptedPipeline::failing(AiError::Provider("429 Too Many Requests".into())));
        let started = h.runner.start_generation(&user()).await.unwrap();
        h.spawner.wait(started.job_id).await;

        let job = stored(&h.store, started.job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().is_some_and(|e| e.contains("429")));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn pipeline_panics_fail_the_job() {
        let h = harness(ScriptedPipeline::panicking());
        let started = h.runner.start_generation(&user()).await.unwrap();
        h.spawner.wait(started.job_id).await;

        let job = stored(&h.store, started.job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().is_some_and(|e| e.contains("panicked")));
    }

    #[tokio::test]
    async fn wrong_result_shape_fails_the_job() {
        let h = harness(ScriptedPipeline::succeeding(crate::jobs::testing::recommendations_output()));
        let started = h.runner.start_generation(&user()).await.unwrap();
        h.spawner.wait(started.job_id).await;

        let job = stored(&h.store, started.job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn requests_inside_the_grace_window_reuse_the_job() {
        let (pipeline, gate) = ScriptedPipeline::gated(profile_output());
        let h = harness(pipeline);

        let first = h.runner.start_generation(&user()).await.unwrap();
        let second = h.runner.start_generation(&user()).await.unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert!(second.reused);
        assert_eq!(h.store.find_many(&JobFilter::default()).await.unwrap().len(), 1);

        gate.notify_one();
        h.spawner.wait(first.job_id).await;

        // Terminal jobs are never reused.
        let third = h.runner.start_generation(&user()).await.unwrap();
        assert_ne!(third.job_id, first.job_id);
        assert!(!third.reused);
    }

    #[tokio::test]
    async fn stale_generating_jobs_are_not_reused() {
        let h = harness(ScriptedPipeline::succeeding(profile_output()));
        let old = Utc::now() - chrono::Duration::seconds(31);
        let stale = h
            .store
            .create(GenerationJob::new_generating(user(), JobKind::Profile, old))
            .await
            .unwrap();

        let started = h.runner.start_generation(&user()).await.unwrap();
        assert_ne!(started.job_id, stale.id);
        h.spawner.wait(started.job_id).await;
    }

    #[tokio::test]
    async fn other_kinds_and_users_do_not_count_as_in_flight() {
        let h = harness(ScriptedPipeline::succeeding(profile_output()));
        let now = Utc::now();
        for job in [
            GenerationJob::new_generating(user(), JobKind::Recommendations, now),
            GenerationJob::new_generating(UserId::parse("u2").unwrap(), JobKind::Profile, now),
        ] {
            h.store.create(job).await.unwrap();
        }

        let started = h.runner.start_generation(&user()).await.unwrap();
        assert!(!started.reused);
        h.spawner.wait(started.job_id).await;
    }

    #[tokio::test]
    async fn late_completion_after_timeout_is_discarded() {
        let (pipeline, gate) = ScriptedPipeline::gated(profile_output());
        let h = harness(pipeline);
        let started = h.runner.start_generation(&user()).await.unwrap();

        // Let the heartbeat land, then time the job out from the outside.
        tokio::task::yield_now().await;
        let timed_out = JobUpdate::fail("Generation timed out after 180 seconds", Utc::now());
        assert!(h.store.update_fields(started.job_id, timed_out).await.unwrap());

        gate.notify_one();
        h.spawner.wait(started.job_id).await;

        let job = stored(&h.store, started.job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert_eq!(job.error.as_deref(), Some("Generation timed out after 180 seconds"));
    }

    /// Records the name of the span the pipeline body runs under.
    struct SpanRecorder(std::sync::Mutex<Option<String>>);

    #[async_trait::async_trait]
    impl GenerationPipeline for SpanRecorder {
        async fn generate(&self, _user_id: &UserId) -> Result<counsel_ai::GenerationOutput, AiError> {
            let name = tracing::Span::current().metadata().map(|m| m.name().to_string());
            *self.0.lock().unwrap() = name;
            Ok(profile_output())
        }
    }

    #[tokio::test]
    async fn pipeline_runs_inside_the_job_span() {
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry());
        let recorder = Arc::new(SpanRecorder(std::sync::Mutex::new(None)));
        let store = InMemoryGenerationJobStore::arc();
        let spawner = Arc::new(TokioTaskSpawner::new());
        let runner = GenerationRunner::new(
            JobKind::Profile,
            store,
            recorder.clone(),
            spawner.clone(),
            std::time::Duration::from_secs(30),
        );

        let started = runner.start_generation(&user()).await.unwrap();
        spawner.wait(started.job_id).await;
        assert_eq!(recorder.0.lock().unwrap().as_deref(), Some("generation"));
    }
}
