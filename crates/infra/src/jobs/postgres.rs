//! Postgres-backed job store.
//!
//! Result and metadata are JSONB columns. Every patch is a single
//! `UPDATE ... WHERE id = $1 [AND status = 'generating']`, so the guard is evaluated by the
//! database and concurrent writers cannot both win a terminal transition.
//!
//! ## Error Mapping
//!
//! | SQLx Error | JobStoreError |
//! |------------|---------------|
//! | Database (unique / check violation) | `InvalidRecord` |
//! | Decode / ColumnDecode | `InvalidRecord` |
//! | PoolClosed, I/O, other database errors | `Unavailable` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{instrument, Span};
use uuid::Uuid;

use counsel_ai::{GenerationMetadata, GenerationResult};
use counsel_core::{JobId, UserId};

use super::store::{GenerationJobStore, JobStoreError};
use super::types::{GenerationJob, JobFilter, JobKind, JobUpdate};
use crate::db::{classify_sqlx_error, is_unique_violation, SqlxFailure};

#[derive(Debug, Clone)]
pub struct PostgresGenerationJobStore {
    pool: PgPool,
}

impl PostgresGenerationJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn kind_of(&self, id: JobId) -> Result<Option<String>, JobStoreError> {
        sqlx::query_scalar::<_, String>("SELECT kind FROM generation_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("kind_of", e))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match classify_sqlx_error(operation, err) {
        SqlxFailure::Unavailable(msg) => JobStoreError::Unavailable(msg),
        SqlxFailure::Invalid(msg) => JobStoreError::InvalidRecord(msg),
    }
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<serde_json::Value, JobStoreError> {
    serde_json::to_value(value)
        .map_err(|e| JobStoreError::InvalidRecord(format!("failed to encode {what}: {e}")))
}

fn result_kind(result: &GenerationResult) -> JobKind {
    match result {
        GenerationResult::Recommendations { .. } => JobKind::Recommendations,
        GenerationResult::Profile { .. } => JobKind::Profile,
    }
}

fn job_from_row(row: &PgRow) -> Result<GenerationJob, JobStoreError> {
    let invalid = |e: String| JobStoreError::InvalidRecord(e);

    let id: Uuid = row.try_get("id").map_err(|e| invalid(e.to_string()))?;
    let user_id: String = row.try_get("user_id").map_err(|e| invalid(e.to_string()))?;
    let kind: String = row.try_get("kind").map_err(|e| invalid(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| invalid(e.to_string()))?;
    let result: Option<serde_json::Value> = row.try_get("result").map_err(|e| invalid(e.to_string()))?;
    let error: Option<String> = row.try_get("error").map_err(|e| invalid(e.to_string()))?;
    let metadata: serde_json::Value = row.try_get("metadata").map_err(|e| invalid(e.to_string()))?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(|e| invalid(e.to_string()))?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(|e| invalid(e.to_string()))?;

    let job = GenerationJob {
        id: JobId::from_uuid(id),
        user_id: UserId::parse(&user_id).map_err(|e| invalid(format!("job {id}: {e}")))?,
        kind: kind.parse().map_err(invalid)?,
        status: status.parse().map_err(invalid)?,
        result: result
            .map(serde_json::from_value::<GenerationResult>)
            .transpose()
            .map_err(|e| invalid(format!("job {id}: result: {e}")))?,
        error,
        metadata: serde_json::from_value::<GenerationMetadata>(metadata)
            .map_err(|e| invalid(format!("job {id}: metadata: {e}")))?,
        created_at,
        updated_at,
    };
    job.check_invariants().map_err(invalid)?;
    Ok(job)
}

#[async_trait]
impl GenerationJobStore for PostgresGenerationJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, user_id = %job.user_id, kind = %job.kind), err)]
    async fn create(&self, job: GenerationJob) -> Result<GenerationJob, JobStoreError> {
        job.check_invariants().map_err(JobStoreError::InvalidRecord)?;
        let result = job.result.as_ref().map(|r| to_json(r, "result")).transpose()?;
        let metadata = to_json(&job.metadata, "metadata")?;

        let row = sqlx::query(
            r#"
            INSERT INTO generation_jobs (
                id, user_id, kind, status, result, error, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, user_id, kind, status, result, error, metadata, created_at, updated_at
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.user_id.as_str())
        .bind(job.kind.as_str())
        .bind(job.status.as_str())
        .bind(result)
        .bind(&job.error)
        .bind(metadata)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("create", e)
            }
        })?;

        // Hand back what the database kept, not what was sent.
        job_from_row(&row)
    }

    #[instrument(skip(self), fields(row_count = tracing::field::Empty), err)]
    async fn find_many(&self, filter: &JobFilter) -> Result<Vec<GenerationJob>, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, kind, status, result, error, metadata, created_at, updated_at
            FROM generation_jobs
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR updated_at >= $4)
            "#,
        )
        .bind(filter.user_id.as_ref().map(UserId::as_str))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.updated_after)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_many", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self, update), fields(job_id = %id, guarded = update.only_if_generating), err)]
    async fn update_fields(&self, id: JobId, update: JobUpdate) -> Result<bool, JobStoreError> {
        let required_kind = update.result.as_ref().map(result_kind);
        let result = update.result.as_ref().map(|r| to_json(r, "result")).transpose()?;
        let metadata = update.metadata.as_ref().map(|m| to_json(m, "metadata")).transpose()?;

        let outcome = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = COALESCE($2, status),
                result = COALESCE($3, result),
                error = COALESCE($4, error),
                metadata = COALESCE($5, metadata),
                updated_at = $6
            WHERE id = $1
              AND ($7 = FALSE OR status = 'generating')
              AND ($8::text IS NULL OR kind = $8)
            "#,
        )
        .bind(id.as_uuid())
        .bind(update.status.map(|s| s.as_str()))
        .bind(result)
        .bind(&update.error)
        .bind(metadata)
        .bind(update.updated_at)
        .bind(update.only_if_generating)
        .bind(required_kind.map(|k| k.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_fields", e))?;

        if outcome.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish "guard did not match" from "wrong result shape for this job".
        if let Some(required) = required_kind {
            if let Some(stored) = self.kind_of(id).await? {
                if stored != required.as_str() {
                    return Err(JobStoreError::InvalidRecord(format!(
                        "job {id}: {required} result stored on a {stored} job"
                    )));
                }
            }
        }
        Ok(false)
    }

    #[instrument(skip(self), err)]
    async fn delete_many(&self, filter: &JobFilter) -> Result<u64, JobStoreError> {
        let outcome = sqlx::query(
            r#"
            DELETE FROM generation_jobs
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR updated_at >= $4)
            "#,
        )
        .bind(filter.user_id.as_ref().map(UserId::as_str))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.updated_after)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_many", e))?;

        Ok(outcome.rows_affected())
    }
}
