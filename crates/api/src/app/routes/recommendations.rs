use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{get, post},
    Router,
};

use crate::app::dto::RECOMMENDATION_FIELDS;
use crate::app::routes::generation;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/generate/:user_id", post(generate))
        .route("/:user_id/status", get(status))
        .route("/:user_id", get(latest).delete(delete_all))
}

pub async fn generate(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    generation::start(&services.recommendations, RECOMMENDATION_FIELDS, &user_id).await
}

pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    generation::status(&services.recommendations, RECOMMENDATION_FIELDS, &user_id).await
}

pub async fn latest(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    generation::latest_completed(&services.recommendations, RECOMMENDATION_FIELDS, &user_id).await
}

pub async fn delete_all(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    generation::delete_all(&services.recommendations, RECOMMENDATION_FIELDS, &user_id).await
}
