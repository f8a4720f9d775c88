//! Handler bodies shared by the recommendation and profile routes.
//!
//! Both kinds expose the same lifecycle; only the field names differ.

use axum::{http::StatusCode, response::IntoResponse, Json};

use counsel_infra::jobs::GenerationStatus;

use crate::app::dto::{self, GenerationFields};
use crate::app::errors;
use crate::app::services::GenerationService;

pub async fn start(service: &GenerationService, fields: GenerationFields, user_id: &str) -> axum::response::Response {
    let user_id = match errors::parse_user_id(user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match service.runner.start_generation(&user_id).await {
        Ok(outcome) => (StatusCode::OK, Json(dto::start_to_json(fields, &outcome))).into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn status(service: &GenerationService, fields: GenerationFields, user_id: &str) -> axum::response::Response {
    let user_id = match errors::parse_user_id(user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match service.status.get_status(&user_id).await {
        Ok(GenerationStatus::Found(job)) => Json(dto::status_to_json(fields, &job)).into_response(),
        Ok(GenerationStatus::NotFound) => Json(dto::not_found_to_json(fields)).into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn latest_completed(
    service: &GenerationService,
    fields: GenerationFields,
    user_id: &str,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match service.status.latest_completed(&user_id).await {
        Ok(Some(job)) => Json(dto::completed_to_json(fields, &job)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("No completed {} generation found", fields.noun.to_lowercase()),
        ),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn history(
    service: &GenerationService,
    fields: GenerationFields,
    user_id: &str,
    query: dto::HistoryQuery,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match service.status.history(&user_id, query.skip, query.limit).await {
        Ok(jobs) => Json(
            jobs.iter()
                .map(|job| dto::history_item_to_json(fields, job))
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn delete_all(service: &GenerationService, fields: GenerationFields, user_id: &str) -> axum::response::Response {
    let user_id = match errors::parse_user_id(user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match service.status.delete_all(&user_id).await {
        Ok(deleted) => Json(serde_json::json!({
            "message": format!("Deleted {deleted} {} records", fields.noun.to_lowercase()),
            "deleted_count": deleted,
        }))
        .into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}
