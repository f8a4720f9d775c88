//! Database adapters: connection pool and schema bootstrap.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

const SCHEMA: [&str; 2] = [
    include_str!("../migrations/0001_init.sql"),
    include_str!("../migrations/0002_users.sql"),
];

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Create tables and indexes if they do not exist yet. Safe to run on every start.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for script in SCHEMA {
        sqlx::raw_sql(script).execute(pool).await?;
    }
    info!("database schema ready");
    Ok(())
}

/// Map a sqlx error onto a store's "unavailable" / "invalid record" pair.
pub(crate) fn classify_sqlx_error(operation: &str, err: sqlx::Error) -> SqlxFailure {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique / check violations: the row itself is wrong
                Some("23505") | Some("23514") => SqlxFailure::Invalid(msg),
                _ => SqlxFailure::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            SqlxFailure::Invalid(format!("undecodable row in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            SqlxFailure::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => SqlxFailure::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Check if an error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

pub(crate) enum SqlxFailure {
    Unavailable(String),
    Invalid(String),
}
