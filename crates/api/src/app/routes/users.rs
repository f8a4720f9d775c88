use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use counsel_infra::users::{self, NewUser, UserPatch, UserRole};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create))
        .route("/role/:role", get(list_by_role))
        .route("/:user_id", get(get_one).put(update).delete(delete_one))
        .route("/:user_id/login", post(record_login))
}

fn user_not_found() -> axum::response::Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", "User not found")
}

pub async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewUser>,
) -> axum::response::Response {
    match services.users.create(body).await {
        Ok(user) => {
            tracing::info!(user_id = %user.user_id, role = %user.role, "user registered");
            (StatusCode::CREATED, Json(user)).into_response()
        }
        Err(e) => errors::user_store_error_to_response(e),
    }
}

pub async fn get_one(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.users.get(&user_id).await {
        Ok(Some(user)) => Json(user).into_response(),
        Ok(None) => user_not_found(),
        Err(e) => errors::user_store_error_to_response(e),
    }
}

pub async fn update(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
    Json(patch): Json<UserPatch>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.users.update(&user_id, patch).await {
        Ok(Some(user)) => Json(user).into_response(),
        Ok(None) => user_not_found(),
        Err(e) => errors::user_store_error_to_response(e),
    }
}

pub async fn record_login(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.users.record_login(&user_id, Utc::now()).await {
        Ok(true) => Json(json!({ "message": "Last login updated successfully" })).into_response(),
        Ok(false) => user_not_found(),
        Err(e) => errors::user_store_error_to_response(e),
    }
}

/// Removes the user and every form response they saved.
pub async fn delete_one(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match users::delete_user(services.users.as_ref(), services.responses.as_ref(), &user_id).await {
        Ok(true) => Json(json!({ "message": "User and associated data deleted successfully" })).into_response(),
        Ok(false) => user_not_found(),
        Err(e) => errors::user_store_error_to_response(e),
    }
}

pub async fn list_by_role(
    Extension(services): Extension<Arc<AppServices>>,
    Path(role): Path<String>,
) -> axum::response::Response {
    let role: UserRole = match role.parse() {
        Ok(role) => role,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_role", msg),
    };

    match services.users.list_by_role(role).await {
        Ok(found) => Json(found).into_response(),
        Err(e) => errors::user_store_error_to_response(e),
    }
}
