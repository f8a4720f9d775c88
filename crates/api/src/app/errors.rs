use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use counsel_core::UserId;
use counsel_infra::jobs::JobStoreError;
use counsel_infra::responses::ResponseStoreError;
use counsel_infra::users::UserStoreError;

pub fn job_store_error_to_response(err: JobStoreError) -> axum::response::Response {
    tracing::error!(error = %err, "job store operation failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
}

pub fn response_store_error_to_response(err: ResponseStoreError) -> axum::response::Response {
    match err {
        ResponseStoreError::Invalid(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        err @ ResponseStoreError::AlreadyExists { .. } => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        ResponseStoreError::Unavailable(msg) => {
            tracing::error!(error = %msg, "response store unavailable");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn user_store_error_to_response(err: UserStoreError) -> axum::response::Response {
    match err {
        UserStoreError::Invalid(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        UserStoreError::AlreadyExists(_) => {
            json_error(StatusCode::BAD_REQUEST, "user_exists", "User already exists")
        }
        UserStoreError::Unavailable(msg) => {
            tracing::error!(error = %msg, "user store unavailable");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_user_id(raw: &str) -> Result<UserId, axum::response::Response> {
    UserId::parse(raw).map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}
