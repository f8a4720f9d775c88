//! Postgres-backed response store (`form_responses` table).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use counsel_ai::{AnswerEntry, FormResponse};
use counsel_core::UserId;

use super::{validate_form_id, ResponseStore, ResponseStoreError, ResponseUpsert};
use crate::db::{classify_sqlx_error, is_unique_violation, SqlxFailure};

#[derive(Debug, Clone)]
pub struct PostgresResponseStore {
    pool: PgPool,
}

impl PostgresResponseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ResponseStoreError {
    match classify_sqlx_error(operation, err) {
        SqlxFailure::Unavailable(msg) => ResponseStoreError::Unavailable(msg),
        SqlxFailure::Invalid(msg) => ResponseStoreError::Invalid(msg),
    }
}

fn response_from_row(row: &PgRow) -> Result<FormResponse, ResponseStoreError> {
    let invalid = |e: String| ResponseStoreError::Invalid(e);

    let user_id: String = row.try_get("user_id").map_err(|e| invalid(e.to_string()))?;
    let responses: serde_json::Value = row.try_get("responses").map_err(|e| invalid(e.to_string()))?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(|e| invalid(e.to_string()))?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(|e| invalid(e.to_string()))?;

    Ok(FormResponse {
        response_id: row.try_get("response_id").map_err(|e| invalid(e.to_string()))?,
        user_id: UserId::parse(&user_id).map_err(|e| invalid(e.to_string()))?,
        form_id: row.try_get("form_id").map_err(|e| invalid(e.to_string()))?,
        responses: serde_json::from_value::<Vec<AnswerEntry>>(responses)
            .map_err(|e| invalid(format!("responses: {e}")))?,
        created_at,
        updated_at,
    })
}

const COLUMNS: &str = "response_id, user_id, form_id, responses, created_at, updated_at";

#[async_trait]
impl ResponseStore for PostgresResponseStore {
    #[instrument(skip(self, upsert), fields(user_id = %upsert.user_id, form_id = %upsert.form_id), err)]
    async fn upsert(&self, upsert: ResponseUpsert) -> Result<FormResponse, ResponseStoreError> {
        let form_id = validate_form_id(&upsert.form_id)?;
        let responses = serde_json::to_value(&upsert.responses)
            .map_err(|e| ResponseStoreError::Invalid(format!("failed to encode responses: {e}")))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO form_responses ({COLUMNS})
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (user_id, form_id)
            DO UPDATE SET
                responses = EXCLUDED.responses,
                updated_at = NOW()
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7().to_string())
        .bind(upsert.user_id.as_str())
        .bind(&form_id)
        .bind(responses)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert", e))?;

        response_from_row(&row)
    }

    #[instrument(skip(self, new), fields(user_id = %new.user_id, form_id = %new.form_id), err)]
    async fn create(&self, new: ResponseUpsert) -> Result<FormResponse, ResponseStoreError> {
        let form_id = validate_form_id(&new.form_id)?;
        let responses = serde_json::to_value(&new.responses)
            .map_err(|e| ResponseStoreError::Invalid(format!("failed to encode responses: {e}")))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO form_responses ({COLUMNS})
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7().to_string())
        .bind(new.user_id.as_str())
        .bind(&form_id)
        .bind(responses)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ResponseStoreError::AlreadyExists {
                    user_id: new.user_id.clone(),
                    form_id: form_id.clone(),
                }
            } else {
                map_sqlx_error("create", e)
            }
        })?;

        response_from_row(&row)
    }

    #[instrument(skip(self, responses), err)]
    async fn update(
        &self,
        user_id: &UserId,
        form_id: &str,
        responses: Vec<AnswerEntry>,
    ) -> Result<Option<FormResponse>, ResponseStoreError> {
        let responses = serde_json::to_value(&responses)
            .map_err(|e| ResponseStoreError::Invalid(format!("failed to encode responses: {e}")))?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE form_responses
            SET responses = $3, updated_at = NOW()
            WHERE user_id = $1 AND form_id = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(user_id.as_str())
        .bind(form_id.trim())
        .bind(responses)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        row.as_ref().map(response_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FormResponse>, ResponseStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM form_responses WHERE user_id = $1 ORDER BY created_at, form_id"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_for_user", e))?;

        rows.iter().map(response_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn get(&self, user_id: &UserId, form_id: &str) -> Result<Option<FormResponse>, ResponseStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM form_responses WHERE user_id = $1 AND form_id = $2"
        ))
        .bind(user_id.as_str())
        .bind(form_id.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(response_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, user_id: &UserId, form_id: &str) -> Result<bool, ResponseStoreError> {
        let outcome = sqlx::query("DELETE FROM form_responses WHERE user_id = $1 AND form_id = $2")
            .bind(user_id.as_str())
            .bind(form_id.trim())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        Ok(outcome.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn delete_for_user(&self, user_id: &UserId) -> Result<u64, ResponseStoreError> {
        let outcome = sqlx::query("DELETE FROM form_responses WHERE user_id = $1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_for_user", e))?;

        Ok(outcome.rows_affected())
    }
}
