//! Operations the stage page calls
//!
//! Every failure is logged here and collapsed to `None`. Callers treat an
//! absent result as a normal outcome and pick their own retry policy.

use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{JokeId, JokeSubmission, Rating, RatingValue, Recommendation, UserDetails, UserId},
    services::{providers::bounded, recommendations::Recommender},
};

/// Logs a failed operation at a level matching how unexpected it is
fn absent<T>(operation: &'static str, result: AppResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e @ (AppError::NoCandidates(_) | AppError::InvalidInput(_))) => {
            tracing::info!(operation, kind = e.kind(), error = %e, "Returning no result");
            None
        }
        Err(e) => {
            tracing::error!(operation, kind = e.kind(), error = %e, "Returning no result");
            None
        }
    }
}

/// Resolves the signed-in session to its user id and rolling history
pub async fn get_user_details(recommender: &Recommender, auth_id: Uuid) -> Option<UserDetails> {
    let result = bounded(
        recommender.settings().call_timeout,
        "profile_by_auth_id",
        AppError::Persistence,
        recommender.store().profile_by_auth_id(auth_id),
    )
    .await
    .map(|profile| UserDetails::from(&profile));

    absent("get_user_details", result)
}

/// Next joke for the user, or `None` when nothing can be recommended
pub async fn get_joke(
    recommender: &Recommender,
    user_id: UserId,
    last5_joke_ids: &[JokeId],
) -> Option<Recommendation> {
    absent("get_joke", recommender.recommend(user_id, last5_joke_ids).await)
}

/// Records a rating; `None` means the rating was not confirmed
pub async fn rate_joke(
    recommender: &Recommender,
    user_id: UserId,
    joke_id: JokeId,
    value: f64,
) -> Option<Rating> {
    let result = match RatingValue::new(value) {
        Ok(value) => recommender.rate(user_id, joke_id, value).await,
        Err(e) => Err(e),
    };

    absent("rate_joke", result)
}

/// Queues a user-written joke for moderation
pub async fn submit_joke(recommender: &Recommender, joke_text: &str) -> Option<JokeSubmission> {
    let result = match JokeSubmission::new(joke_text) {
        Ok(submission) => {
            bounded(
                recommender.settings().call_timeout,
                "submit_joke",
                AppError::Persistence,
                recommender.store().submit_joke(&submission),
            )
            .await
        }
        Err(e) => Err(e),
    };

    absent("submit_joke", result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecommenderSettings;
    use crate::services::providers::{MemoryStore, RatingStore};
    use std::sync::Arc;

    async fn stage() -> (Recommender, MemoryStore) {
        let store = MemoryStore::new(5, 20);
        for id in 1..=8 {
            store.add_joke(id, &format!("joke {}", id)).await;
        }
        let recommender = Recommender::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            RecommenderSettings::default(),
        );
        (recommender, store)
    }

    #[tokio::test]
    async fn test_user_details_idempotent_between_ratings() {
        let (recommender, store) = stage().await;
        let auth_id = store.add_user(1).await;
        rate_joke(&recommender, 1, 2, 4.0).await.unwrap();

        let first = get_user_details(&recommender, auth_id).await.unwrap();
        let second = get_user_details(&recommender, auth_id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.last5_joke_ids, vec![2]);
    }

    #[tokio::test]
    async fn test_unknown_session_is_absent() {
        let (recommender, _store) = stage().await;
        assert!(get_user_details(&recommender, Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_rating_is_absent_and_not_written() {
        let (recommender, store) = stage().await;
        store.add_user(1).await;

        assert!(rate_joke(&recommender, 1, 2, 9.0).await.is_none());
        assert!(recommender.store().ratings_by_user(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cold_start_joke_is_unseen() {
        let (recommender, store) = stage().await;
        store.add_user(1).await;
        for joke_id in 1..=4 {
            rate_joke(&recommender, 1, joke_id, 3.0).await.unwrap();
        }

        for _ in 0..10 {
            let pick = get_joke(&recommender, 1, &[1, 2, 3, 4]).await.unwrap();
            assert!(pick.joke_id > 4);
            assert_eq!(pick.final_score, 1.0);
        }
    }

    #[tokio::test]
    async fn test_get_joke_absent_when_everything_rated() {
        let store = MemoryStore::default();
        for id in 1..=3 {
            store.add_joke(id, &format!("joke {}", id)).await;
        }
        store.add_user(1).await;
        for id in 1..=3 {
            store
                .insert_rating(1, id, RatingValue::new(2.0).unwrap())
                .await
                .unwrap();
        }
        let recommender = Recommender::new(
            Arc::new(store.clone()),
            Arc::new(store),
            RecommenderSettings::default(),
        );

        assert!(get_joke(&recommender, 1, &[1, 2, 3]).await.is_none());
    }

    #[tokio::test]
    async fn test_submit_joke_queues_trimmed_text() {
        let (recommender, store) = stage().await;

        let stored = submit_joke(&recommender, "  Knock knock.  ").await.unwrap();
        assert_eq!(stored.joke_text, "Knock knock.");
        assert!(submit_joke(&recommender, "   ").await.is_none());

        assert_eq!(store.submissions().await, vec![stored]);
    }
}
