use std::collections::HashSet;
use std::time::Duration;

use crate::{
    error::{AppError, AppResult},
    models::{JokeId, Recommendation, RecommendationSource},
    services::providers::{bounded, SimilarityOracle},
};

/// Users with fewer rating facts than this get a random unseen joke
pub const COLD_START_THRESHOLD: usize = 5;

/// Fixed score marking a pick as cold-start rather than scored
pub const COLD_START_SCORE: f64 = 1.0;

/// Picks a random joke outside the user's full rated set
///
/// Excluded ids are sent sorted so identical requests hit the store the same
/// way. Returns `NoCandidates` once the user has rated the whole catalogue, and
/// `Oracle` if the oracle hands back a joke it was told to exclude.
pub async fn pick_unseen(
    oracle: &dyn SimilarityOracle,
    rated: &HashSet<JokeId>,
    call_timeout: Duration,
) -> AppResult<Recommendation> {
    let mut excluded: Vec<JokeId> = rated.iter().copied().collect();
    excluded.sort_unstable();

    let joke = bounded(
        call_timeout,
        "random_joke_excluding",
        AppError::Oracle,
        oracle.random_joke_excluding(&excluded),
    )
    .await?
    .ok_or_else(|| AppError::NoCandidates("Every joke has already been rated".to_string()))?;

    if rated.contains(&joke.id) {
        return Err(AppError::Oracle(format!(
            "Random pick {} is in the excluded set",
            joke.id
        )));
    }

    tracing::debug!(joke_id = joke.id, excluded = excluded.len(), "Cold-start pick");

    Ok(Recommendation {
        joke_id: joke.id,
        joke_text: joke.text,
        final_score: COLD_START_SCORE,
        source: RecommendationSource::ColdStart,
    })
}
