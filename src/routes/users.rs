use axum::{
    extract::{Path, State},
    Extension, Json,
};
use uuid::Uuid;

use crate::{
    middleware::request_id::RequestId,
    models::UserDetails,
    routes::AppState,
    services::stage,
};

/// Resolves a signed-in session to the user's id and rolling history
pub async fn session(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(auth_id): Path<Uuid>,
) -> Json<Option<UserDetails>> {
    let details = stage::get_user_details(&state.recommender, auth_id).await;
    if details.is_none() {
        tracing::debug!(%request_id, %auth_id, "No user for session");
    }
    Json(details)
}
