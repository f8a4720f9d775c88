use axum::{
    routing::{get, post},
    Router,
};

pub mod chat;
pub mod generation;
pub mod profiles;
pub mod recommendations;
pub mod responses;
pub mod system;
pub mod users;

/// Router for every endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/chat", post(chat::chat))
        .nest("/recommendations", recommendations::router())
        .nest("/profile-generations", profiles::router())
        .nest("/responses", responses::router())
        .nest("/users", users::router())
}
