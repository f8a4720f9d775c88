use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use serde::Deserialize;

use counsel_ai::AnswerEntry;
use counsel_infra::responses::ResponseUpsert;

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create))
        .route("/upsert", post(upsert))
        .route("/user/:user_id", get(list_for_user))
        .route("/:user_id/:form_id", get(get_one).put(update).delete(delete_one))
}

pub async fn upsert(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<ResponseUpsert>,
) -> axum::response::Response {
    match services.responses.upsert(body).await {
        Ok(saved) => {
            tracing::info!(user_id = %saved.user_id, form_id = %saved.form_id, "form response saved");
            (StatusCode::OK, Json(dto::response_to_json(&saved))).into_response()
        }
        Err(e) => errors::response_store_error_to_response(e),
    }
}

/// Strict create; 409 if the user already answered this form.
pub async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<ResponseUpsert>,
) -> axum::response::Response {
    match services.responses.create(body).await {
        Ok(saved) => {
            tracing::info!(user_id = %saved.user_id, form_id = %saved.form_id, "form response created");
            (StatusCode::CREATED, Json(dto::response_to_json(&saved))).into_response()
        }
        Err(e) => errors::response_store_error_to_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AnswersBody {
    #[serde(default)]
    pub responses: Vec<AnswerEntry>,
}

pub async fn update(
    Extension(services): Extension<Arc<AppServices>>,
    Path((user_id, form_id)): Path<(String, String)>,
    Json(body): Json<AnswersBody>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.responses.update(&user_id, &form_id, body.responses).await {
        Ok(Some(saved)) => Json(dto::response_to_json(&saved)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "Response not found"),
        Err(e) => errors::response_store_error_to_response(e),
    }
}

pub async fn list_for_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.responses.list_for_user(&user_id).await {
        Ok(found) => Json(found.iter().map(dto::response_to_json).collect::<Vec<_>>()).into_response(),
        Err(e) => errors::response_store_error_to_response(e),
    }
}

pub async fn get_one(
    Extension(services): Extension<Arc<AppServices>>,
    Path((user_id, form_id)): Path<(String, String)>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.responses.get(&user_id, &form_id).await {
        Ok(Some(found)) => Json(dto::response_to_json(&found)).into_response(),
        Ok(None) => Json(dto::empty_response_shell(&user_id, &form_id)).into_response(),
        Err(e) => errors::response_store_error_to_response(e),
    }
}

pub async fn delete_one(
    Extension(services): Extension<Arc<AppServices>>,
    Path((user_id, form_id)): Path<(String, String)>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.responses.delete(&user_id, &form_id).await {
        Ok(true) => Json(serde_json::json!({
            "message": "Response deleted",
            "user_id": user_id.as_str(),
            "form_id": form_id,
        }))
        .into_response(),
        Ok(false) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "Response not found"),
        Err(e) => errors::response_store_error_to_response(e),
    }
}
