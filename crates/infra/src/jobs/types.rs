//! Generation job records and the patches/filters the store understands.

use core::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use counsel_ai::{GenerationMetadata, GenerationResult};
use counsel_core::{JobId, UserId};

/// What a job generates. Status and latest-selection are scoped per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Recommendations,
    Profile,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Recommendations => "recommendations",
            JobKind::Profile => "profile",
        }
    }

    /// Whether `result` has the shape this kind of job produces.
    pub fn accepts(&self, result: &GenerationResult) -> bool {
        matches!(
            (self, result),
            (JobKind::Recommendations, GenerationResult::Recommendations { .. })
                | (JobKind::Profile, GenerationResult::Profile { .. })
        )
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recommendations" => Ok(JobKind::Recommendations),
            "profile" => Ok(JobKind::Profile),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Generating,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Generating => "generating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generating" => Ok(JobStatus::Generating),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// `at` at the precision the stores keep (microseconds, as Postgres `TIMESTAMPTZ`).
pub fn store_timestamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// One generation attempt for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub user_id: UserId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub result: Option<GenerationResult>,
    pub error: Option<String>,
    pub metadata: GenerationMetadata,
    pub created_at: DateTime<Utc>,
    /// Heartbeat; bumped when the task starts and on the terminal write.
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new_generating(user_id: UserId, kind: JobKind, now: DateTime<Utc>) -> Self {
        let now = store_timestamp(now);
        Self {
            id: JobId::new(),
            user_id,
            kind,
            status: JobStatus::Generating,
            result: None,
            error: None,
            metadata: GenerationMetadata::from_user_responses().with_started_at(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Ordering key for "latest": `updated_at`, then `created_at`, then id.
    pub fn recency_key(&self) -> (DateTime<Utc>, DateTime<Utc>, JobId) {
        (self.updated_at, self.created_at, self.id)
    }

    /// Check the record-level invariants (payload consistent with status and kind).
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.updated_at < self.created_at {
            return Err(format!("job {}: updated_at precedes created_at", self.id));
        }
        match (self.status, &self.result, &self.error) {
            (JobStatus::Generating, None, None) => Ok(()),
            (JobStatus::Completed, Some(result), None) if self.kind.accepts(result) => Ok(()),
            (JobStatus::Completed, Some(result), None) => Err(format!(
                "job {}: {} result stored on a {} job",
                self.id,
                result.shape(),
                self.kind
            )),
            (JobStatus::Failed, None, Some(_)) => Ok(()),
            (status, result, error) => Err(format!(
                "job {}: status {status} with result={} error={}",
                self.id,
                result.is_some(),
                error.is_some()
            )),
        }
    }

    /// The record after applying `update`, without checking its guard.
    pub fn patched(&self, update: &JobUpdate) -> Self {
        let mut next = self.clone();
        if let Some(status) = update.status {
            next.status = status;
        }
        if let Some(result) = &update.result {
            next.result = Some(result.clone());
        }
        if let Some(error) = &update.error {
            next.error = Some(error.clone());
        }
        if let Some(metadata) = &update.metadata {
            next.metadata = metadata.clone();
        }
        next.updated_at = update.updated_at;
        next
    }
}

/// Partial update. Unset fields are left alone; `updated_at` is always written.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub result: Option<GenerationResult>,
    pub error: Option<String>,
    pub metadata: Option<GenerationMetadata>,
    pub updated_at: DateTime<Utc>,
    /// Only apply while the stored status is still `generating`.
    pub only_if_generating: bool,
}

impl JobUpdate {
    pub fn heartbeat(at: DateTime<Utc>) -> Self {
        Self {
            status: None,
            result: None,
            error: None,
            metadata: None,
            updated_at: store_timestamp(at),
            only_if_generating: true,
        }
    }

    pub fn complete(result: GenerationResult, metadata: GenerationMetadata, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result: Some(result),
            metadata: Some(metadata),
            ..Self::heartbeat(at)
        }
    }

    pub fn fail(error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::heartbeat(at)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub user_id: Option<UserId>,
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    pub updated_after: Option<DateTime<Utc>>,
}

impl JobFilter {
    pub fn for_user(user_id: UserId, kind: JobKind) -> Self {
        Self {
            user_id: Some(user_id),
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn updated_after(mut self, at: DateTime<Utc>) -> Self {
        self.updated_after = Some(at);
        self
    }

    pub fn matches(&self, job: &GenerationJob) -> bool {
        self.user_id.as_ref().is_none_or(|u| &job.user_id == u)
            && self.kind.is_none_or(|k| job.kind == k)
            && self.status.is_none_or(|s| job.status == s)
            && self.updated_after.is_none_or(|at| job.updated_at >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use counsel_ai::ProfileSection;
    use serde_json::json;

    fn profile_result() -> GenerationResult {
        GenerationResult::Profile {
            student_profile: vec![ProfileSection::no_data()],
        }
    }

    fn user() -> UserId {
        UserId::parse("u1").unwrap()
    }

    #[test]
    fn new_jobs_start_generating_with_provenance() {
        let now = Utc::now();
        let job = GenerationJob::new_generating(user(), JobKind::Profile, now);
        assert_eq!(job.status, JobStatus::Generating);
        assert_eq!(job.created_at, job.updated_at);
        assert_eq!(job.metadata.started_at, Some(store_timestamp(now)));
        assert_eq!(job.metadata.context_source.as_deref(), Some("user_responses"));
        assert!(job.check_invariants().is_ok());
    }

    #[test]
    fn result_shape_must_match_kind() {
        let now = Utc::now();
        let job = GenerationJob::new_generating(user(), JobKind::Recommendations, now);
        let completed = job.patched(&JobUpdate::complete(
            profile_result(),
            GenerationMetadata::default(),
            now,
        ));
        assert!(completed.check_invariants().is_err());

        let job = GenerationJob::new_generating(user(), JobKind::Profile, now);
        let completed = job.patched(&JobUpdate::complete(
            profile_result(),
            GenerationMetadata::default(),
            now,
        ));
        assert!(completed.check_invariants().is_ok());
    }

    #[test]
    fn heartbeat_only_moves_updated_at() {
        let now = Utc::now();
        let job = GenerationJob::new_generating(user(), JobKind::Profile, now);
        let later = now + chrono::Duration::seconds(5);
        let beat = job.patched(&JobUpdate::heartbeat(later));
        assert_eq!(beat.status, JobStatus::Generating);
        assert_eq!(beat.updated_at, store_timestamp(later));
        assert_eq!(beat.metadata, job.metadata);
    }

    #[test]
    fn timestamps_are_kept_at_microsecond_precision() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 21).unwrap()
            + chrono::Duration::nanoseconds(400_256_212);
        let job = GenerationJob::new_generating(user(), JobKind::Profile, at);
        assert_eq!(job.created_at.timestamp_subsec_nanos(), 400_256_000);
        assert_eq!(job.metadata.started_at, Some(job.created_at));

        let failed = JobUpdate::fail("boom", at + chrono::Duration::nanoseconds(999));
        assert_eq!(failed.updated_at.timestamp_subsec_nanos(), 400_257_000);
    }

    #[test]
    fn filter_matches_on_every_set_field() {
        let now = Utc::now();
        let job = GenerationJob::new_generating(user(), JobKind::Profile, now);

        assert!(JobFilter::default().matches(&job));
        assert!(JobFilter::for_user(user(), JobKind::Profile).matches(&job));
        assert!(!JobFilter::for_user(user(), JobKind::Recommendations).matches(&job));
        assert!(!JobFilter::for_user(user(), JobKind::Profile)
            .with_status(JobStatus::Completed)
            .matches(&job));
        assert!(!JobFilter::default()
            .updated_after(now + chrono::Duration::seconds(1))
            .matches(&job));
    }

    #[test]
    fn kind_and_status_use_snake_case_names() {
        assert_eq!(serde_json::to_value(JobKind::Recommendations).unwrap(), json!("recommendations"));
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("done".parse::<JobStatus>().is_err());
    }
}
