use tracing::instrument;

use crate::{
    config::RecommenderSettings,
    error::{AppError, AppResult},
    models::{JokeId, ProfileUpdate, Rating, RatingValue, UserId},
    services::providers::{bounded, RatingStore},
};

/// Records a rating, then appends the joke to the user's rolling history
///
/// The history write is a compare-and-swap on the profile version. A
/// concurrent submission for the same user makes it retry from a fresh read,
/// up to `settings.profile_update_attempts` times.
///
/// If the insert succeeds but the history cannot be written, the rating fact
/// stays recorded and a `Persistence` error is returned.
#[instrument(skip(store, settings, value), fields(value = %value))]
pub async fn record_rating(
    store: &dyn RatingStore,
    settings: &RecommenderSettings,
    user_id: UserId,
    joke_id: JokeId,
    value: RatingValue,
) -> AppResult<Rating> {
    let limit = settings.call_timeout;

    // The rating fact goes in first; it is the source of truth for exclusion
    let rating = bounded(
        limit,
        "insert_rating",
        AppError::Persistence,
        store.insert_rating(user_id, joke_id, value),
    )
    .await?;

    if let Err(e) = append_to_history(store, settings, user_id, joke_id).await {
        tracing::error!(
            rating_id = rating.id,
            error = %e,
            "Rating recorded but rolling history not updated"
        );
        return Err(AppError::Persistence(format!(
            "Rating {} recorded but history update failed: {}",
            rating.id, e
        )));
    }

    tracing::info!(rating_id = rating.id, "Rating recorded");

    Ok(rating)
}

async fn append_to_history(
    store: &dyn RatingStore,
    settings: &RecommenderSettings,
    user_id: UserId,
    joke_id: JokeId,
) -> AppResult<()> {
    let limit = settings.call_timeout;

    for attempt in 1..=settings.profile_update_attempts {
        // Re-read on every attempt so a retry builds on the winner's history
        let profile = bounded(
            limit,
            "get_profile",
            AppError::Persistence,
            store.get_profile(user_id),
        )
        .await?;
        let history = profile.history_after(joke_id);

        let outcome = bounded(
            limit,
            "update_profile",
            AppError::Persistence,
            store.update_profile(user_id, &history, profile.version),
        )
        .await?;

        match outcome {
            ProfileUpdate::Applied => return Ok(()),
            ProfileUpdate::Conflict => {
                tracing::debug!(attempt, version = profile.version, "Concurrent history write, retrying");
            }
        }
    }

    Err(AppError::Persistence(format!(
        "History for user {} kept changing after {} attempts",
        user_id, settings.profile_update_attempts
    )))
}
