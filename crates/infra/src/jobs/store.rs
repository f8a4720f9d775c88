//! Job record storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use counsel_core::JobId;

use super::types::{GenerationJob, JobFilter, JobStatus, JobUpdate};

/// Persistence for generation jobs.
///
/// Single-record operations are atomic. `update_fields` with `only_if_generating` set is
/// a compare-and-set on the status, which is what keeps terminal records immutable.
#[async_trait]
pub trait GenerationJobStore: Send + Sync {
    async fn create(&self, job: GenerationJob) -> Result<GenerationJob, JobStoreError>;

    /// Every job matching `filter`, in no particular order.
    async fn find_many(&self, filter: &JobFilter) -> Result<Vec<GenerationJob>, JobStoreError>;

    /// Apply `update` to job `id`. Returns whether a record matched (id and guard).
    async fn update_fields(&self, id: JobId, update: JobUpdate) -> Result<bool, JobStoreError>;

    async fn delete_many(&self, filter: &JobFilter) -> Result<u64, JobStoreError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid job record: {0}")]
    InvalidRecord(String),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryGenerationJobStore {
    jobs: RwLock<HashMap<JobId, GenerationJob>>,
}

impl InMemoryGenerationJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned<T>(_: T) -> JobStoreError {
    JobStoreError::Unavailable("job store lock poisoned".to_string())
}

#[async_trait]
impl GenerationJobStore for InMemoryGenerationJobStore {
    async fn create(&self, job: GenerationJob) -> Result<GenerationJob, JobStoreError> {
        job.check_invariants().map_err(JobStoreError::InvalidRecord)?;

        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_many(&self, filter: &JobFilter) -> Result<Vec<GenerationJob>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.values().filter(|j| filter.matches(j)).cloned().collect())
    }

    async fn update_fields(&self, id: JobId, update: JobUpdate) -> Result<bool, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let Some(current) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if update.only_if_generating && current.status != JobStatus::Generating {
            return Ok(false);
        }

        let next = current.patched(&update);
        next.check_invariants().map_err(JobStoreError::InvalidRecord)?;
        *current = next;
        Ok(true)
    }

    async fn delete_many(&self, filter: &JobFilter) -> Result<u64, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let before = jobs.len();
        jobs.retain(|_, j| !filter.matches(j));
        Ok((before - jobs.len()) as u64)
    }
}

#[async_trait]
impl<S: GenerationJobStore + ?Sized> GenerationJobStore for Arc<S> {
    async fn create(&self, job: GenerationJob) -> Result<GenerationJob, JobStoreError> {
        (**self).create(job).await
    }

    async fn find_many(&self, filter: &JobFilter) -> Result<Vec<GenerationJob>, JobStoreError> {
        (**self).find_many(filter).await
    }

    async fn update_fields(&self, id: JobId, update: JobUpdate) -> Result<bool, JobStoreError> {
        (**self).update_fields(id, update).await
    }

    async fn delete_many(&self, filter: &JobFilter) -> Result<u64, JobStoreError> {
        (**self).delete_many(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobKind;
    use chrono::Utc;
    use counsel_ai::{GenerationMetadata, GenerationResult, ProfileSection};
    use counsel_core::UserId;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn profile() -> GenerationResult {
        GenerationResult::Profile {
            student_profile: vec![ProfileSection::no_data()],
        }
    }

    #[tokio::test]
    async fn create_then_find_round_trips_as_generating() {
        let store = InMemoryGenerationJobStore::new();
        let job = GenerationJob::new_generating(user("u1"), JobKind::Profile, Utc::now());
        store.create(job.clone()).await.unwrap();

        let found = store
            .find_many(&JobFilter::for_user(user("u1"), JobKind::Profile))
            .await
            .unwrap();
        assert_eq!(found, vec![job.clone()]);
        assert_eq!(found[0].status, JobStatus::Generating);

        assert!(matches!(
            store.create(job).await,
            Err(JobStoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn terminal_jobs_reject_guarded_writes() {
        let store = InMemoryGenerationJobStore::new();
        let job = store
            .create(GenerationJob::new_generating(user("u1"), JobKind::Profile, Utc::now()))
            .await
            .unwrap();

        assert!(store.update_fields(job.id, JobUpdate::fail("boom", Utc::now())).await.unwrap());
        let late = JobUpdate::complete(profile(), GenerationMetadata::default(), Utc::now());
        assert!(!store.update_fields(job.id, late).await.unwrap());

        let stored = store.find_many(&JobFilter::default()).await.unwrap();
        assert_eq!(stored[0].status, JobStatus::Failed);
        assert_eq!(stored[0].error.as_deref(), Some("boom"));
        assert!(stored[0].result.is_none());
    }

    #[tokio::test]
    async fn mismatched_result_shape_is_rejected_and_not_written() {
        let store = InMemoryGenerationJobStore::new();
        let job = store
            .create(GenerationJob::new_generating(
                user("u1"),
                JobKind::Recommendations,
                Utc::now(),
            ))
            .await
            .unwrap();

        let update = JobUpdate::complete(profile(), GenerationMetadata::default(), Utc::now());
        assert!(matches!(
            store.update_fields(job.id, update).await,
            Err(JobStoreError::InvalidRecord(_))
        ));
        let stored = store.find_many(&JobFilter::default()).await.unwrap();
        assert_eq!(stored[0].status, JobStatus::Generating);
    }

    #[tokio::test]
    async fn unknown_ids_do_not_match() {
        let store = InMemoryGenerationJobStore::new();
        let matched = store
            .update_fields(JobId::new(), JobUpdate::heartbeat(Utc::now()))
            .await
            .unwrap();
        assert!(!matched);
    }

    #[tokio::test]
    async fn delete_many_is_scoped_by_filter() {
        let store = InMemoryGenerationJobStore::new();
        let now = Utc::now();
        for (u, kind) in [
            ("u1", JobKind::Profile),
            ("u1", JobKind::Profile),
            ("u1", JobKind::Recommendations),
            ("u2", JobKind::Profile),
        ] {
            store
                .create(GenerationJob::new_generating(user(u), kind, now))
                .await
                .unwrap();
        }

        let deleted = store
            .delete_many(&JobFilter::for_user(user("u1"), JobKind::Profile))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.find_many(&JobFilter::default()).await.unwrap().len(), 2);
    }
}
