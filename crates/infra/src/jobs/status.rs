//! Externally visible status of a user's generations, with lazy deadlock detection.
//!
//! There is no sweeper. A job whose task died (process restart, lost task) stays
//! `generating` in the store until someone polls it; the poll notices the stale heartbeat
//! and flips it to `failed` with a guarded write, so concurrent pollers flip it once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use counsel_core::UserId;

use super::store::{GenerationJobStore, JobStoreError};
use super::types::{GenerationJob, JobFilter, JobKind, JobStatus, JobUpdate};

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationStatus {
    NotFound,
    Found(GenerationJob),
}

impl GenerationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            GenerationStatus::NotFound => "not_found",
            GenerationStatus::Found(job) => job.status.as_str(),
        }
    }
}

pub fn timeout_message(threshold: Duration) -> String {
    format!("Generation timed out after {} seconds", threshold.as_secs())
}

/// The most recent job: max `updated_at`, then `created_at`, then id.
pub fn latest(jobs: impl IntoIterator<Item = GenerationJob>) -> Option<GenerationJob> {
    jobs.into_iter().max_by_key(GenerationJob::recency_key)
}

pub struct StatusResolver {
    kind: JobKind,
    store: Arc<dyn GenerationJobStore>,
    deadlock_threshold: Duration,
}

impl StatusResolver {
    pub fn new(kind: JobKind, store: Arc<dyn GenerationJobStore>, deadlock_threshold: Duration) -> Self {
        Self {
            kind,
            store,
            deadlock_threshold,
        }
    }

    fn filter(&self, user_id: &UserId) -> JobFilter {
        JobFilter::for_user(user_id.clone(), self.kind)
    }

    fn is_stale(&self, job: &GenerationJob) -> bool {
        let age = Utc::now() - job.updated_at;
        job.status == JobStatus::Generating
            && age.to_std().is_ok_and(|age| age > self.deadlock_threshold)
    }

    pub async fn get_status(&self, user_id: &UserId) -> Result<GenerationStatus, JobStoreError> {
        let Some(job) = latest(self.store.find_many(&self.filter(user_id)).await?) else {
            return Ok(GenerationStatus::NotFound);
        };

        if !self.is_stale(&job) {
            return Ok(GenerationStatus::Found(job));
        }

        let update = JobUpdate::fail(timeout_message(self.deadlock_threshold), Utc::now());
        if self.store.update_fields(job.id, update.clone()).await? {
            warn!(%user_id, job_id = %job.id, kind = %self.kind, "generation timed out");
            return Ok(GenerationStatus::Found(job.patched(&update)));
        }

        // Someone else (the task or another poller) finished it first; report what they wrote.
        info!(%user_id, job_id = %job.id, "timeout raced with another writer; re-reading");
        let reread = latest(self.store.find_many(&self.filter(user_id)).await?);
        Ok(reread.map_or(GenerationStatus::NotFound, GenerationStatus::Found))
    }

    pub async fn latest_completed(&self, user_id: &UserId) -> Result<Option<GenerationJob>, JobStoreError> {
        let filter = self.filter(user_id).with_status(JobStatus::Completed);
        Ok(latest(self.store.find_many(&filter).await?))
    }

    /// Jobs newest first (by `created_at`), paginated.
    pub async fn history(
        &self,
        user_id: &UserId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<GenerationJob>, JobStoreError> {
        let mut jobs = self.store.find_many(&self.filter(user_id)).await?;
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(jobs.into_iter().skip(skip).take(limit).collect())
    }

    pub async fn delete_all(&self, user_id: &UserId) -> Result<u64, JobStoreError> {
        let deleted = self.store.delete_many(&self.filter(user_id)).await?;
        info!(%user_id, kind = %self.kind, deleted, "deleted generation jobs");
        Ok(deleted)
    }
}
