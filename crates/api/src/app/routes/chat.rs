use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

/// Mentor chat. Provider failures surface as the canned fallback reply, never as an error.
pub async fn chat(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ChatRequest>,
) -> axum::response::Response {
    if body.message.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "message must not be empty");
    }

    let reply = services.mentor.reply(&body.message, &body.history).await;
    Json(dto::ChatReply { reply }).into_response()
}
