use axum::{extract::State, Extension, Json};
use serde::Deserialize;

use crate::{
    middleware::request_id::RequestId,
    models::{JokeId, Rating, UserId},
    routes::AppState,
    services::stage,
};

#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub user_id: UserId,
    pub joke_id: JokeId,
    pub value: f64,
}

/// Handler for recording a rating
///
/// Responds with the stored rating, or `null` if it was rejected or the
/// history write did not go through.
pub async fn rate(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<RateRequest>,
) -> Json<Option<Rating>> {
    let rating = stage::rate_joke(
        &state.recommender,
        request.user_id,
        request.joke_id,
        request.value,
    )
    .await;

    if rating.is_none() {
        tracing::warn!(
            %request_id,
            user_id = request.user_id,
            joke_id = request.joke_id,
            "Rating not confirmed"
        );
    }
    Json(rating)
}
