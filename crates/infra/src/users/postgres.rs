//! Postgres-backed user store (`users` table).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{instrument, Span};

use counsel_core::UserId;

use super::{validate_new, validate_patch, NewUser, User, UserPatch, UserRole, UserStore, UserStoreError};
use crate::db::{classify_sqlx_error, is_unique_violation, SqlxFailure};

#[derive(Debug, Clone)]
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> UserStoreError {
    match classify_sqlx_error(operation, err) {
        SqlxFailure::Unavailable(msg) => UserStoreError::Unavailable(msg),
        SqlxFailure::Invalid(msg) => UserStoreError::Invalid(msg),
    }
}

fn user_from_row(row: &PgRow) -> Result<User, UserStoreError> {
    let invalid = |e: String| UserStoreError::Invalid(e);

    let user_id: String = row.try_get("user_id").map_err(|e| invalid(e.to_string()))?;
    let role: String = row.try_get("role").map_err(|e| invalid(e.to_string()))?;

    Ok(User {
        user_id: UserId::parse(&user_id).map_err(|e| invalid(e.to_string()))?,
        email: row.try_get("email").map_err(|e| invalid(e.to_string()))?,
        name: row.try_get("name").map_err(|e| invalid(e.to_string()))?,
        role: role.parse().map_err(invalid)?,
        grade: row.try_get("grade").map_err(|e| invalid(e.to_string()))?,
        counselor_id: row.try_get("counselor_id").map_err(|e| invalid(e.to_string()))?,
        parent_id: row.try_get("parent_id").map_err(|e| invalid(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(|e| invalid(e.to_string()))?,
        last_login: row.try_get("last_login").map_err(|e| invalid(e.to_string()))?,
    })
}

const COLUMNS: &str = "user_id, email, name, role, grade, counselor_id, parent_id, created_at, last_login";

#[async_trait]
impl UserStore for PostgresUserStore {
    #[instrument(skip(self, new), fields(user_id = %new.user_id, role = %new.role), err)]
    async fn create(&self, new: NewUser) -> Result<User, UserStoreError> {
        validate_new(&new)?;
        let user = User::register(new, Utc::now());

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(user.user_id.as_str())
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(&user.grade)
        .bind(&user.counselor_id)
        .bind(&user.parent_id)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                UserStoreError::AlreadyExists(user.user_id.clone())
            } else {
                map_sqlx_error("create", e)
            }
        })?;

        user_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, user_id: &UserId) -> Result<Option<User>, UserStoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM users WHERE user_id = $1"))
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self, patch), err)]
    async fn update(&self, user_id: &UserId, patch: UserPatch) -> Result<Option<User>, UserStoreError> {
        validate_patch(&patch)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET email = COALESCE($2, email),
                name = COALESCE($3, name),
                role = COALESCE($4, role),
                grade = COALESCE($5, grade),
                counselor_id = COALESCE($6, counselor_id),
                parent_id = COALESCE($7, parent_id)
            WHERE user_id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(user_id.as_str())
        .bind(patch.email.as_deref().map(str::trim))
        .bind(patch.name.as_deref().map(str::trim))
        .bind(patch.role.map(|r| r.as_str()))
        .bind(&patch.grade)
        .bind(&patch.counselor_id)
        .bind(&patch.parent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn record_login(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<bool, UserStoreError> {
        let outcome = sqlx::query("UPDATE users SET last_login = $2 WHERE user_id = $1")
            .bind(user_id.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_login", e))?;

        Ok(outcome.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, user_id: &UserId) -> Result<bool, UserStoreError> {
        let outcome = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        Ok(outcome.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(row_count = tracing::field::Empty), err)]
    async fn list_by_role(&self, role: UserRole) -> Result<Vec<User>, UserStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM users WHERE role = $1 ORDER BY created_at, user_id"
        ))
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_role", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(user_from_row).collect()
    }
}
