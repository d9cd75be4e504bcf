use axum::{extract::State, Extension, Json};
use serde::Deserialize;

use crate::{
    middleware::request_id::RequestId,
    models::{JokeId, JokeSubmission, Recommendation, UserId},
    routes::AppState,
    services::stage,
};

#[derive(Debug, Deserialize)]
pub struct NextJokeRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub last5_joke_ids: Vec<JokeId>,
}

#[derive(Debug, Deserialize)]
pub struct SubmissionRequest {
    pub joke_text: String,
}

/// Handler for the next-joke endpoint; `null` when nothing can be shown
pub async fn next(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<NextJokeRequest>,
) -> Json<Option<Recommendation>> {
    let pick = stage::get_joke(&state.recommender, request.user_id, &request.last5_joke_ids).await;

    if let Some(pick) = &pick {
        tracing::debug!(
            %request_id,
            user_id = request.user_id,
            joke_id = pick.joke_id,
            "Serving joke"
        );
    }
    Json(pick)
}

pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmissionRequest>,
) -> Json<Option<JokeSubmission>> {
    Json(stage::submit_joke(&state.recommender, &request.joke_text).await)
}
