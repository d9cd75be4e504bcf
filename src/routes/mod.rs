use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    middleware::request_id::{make_span_with_request_id, request_id_middleware},
    services::Recommender,
};

pub mod jokes;
pub mod ratings;
pub mod users;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub recommender: Recommender,
}

impl AppState {
    pub fn new(recommender: Recommender) -> Self {
        Self { recommender }
    }
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
                .layer(CorsLayer::permissive()),
        )
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/session/:auth_id", get(users::session))
        .route("/jokes/next", post(jokes::next))
        .route("/jokes/submissions", post(jokes::submit))
        .route("/ratings", post(ratings::rate))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
