//! External collaborators of the recommendation core
//!
//! The core never talks to a database directly. It reads similarity edges
//! through a [`SimilarityOracle`] and ratings/profiles through a
//! [`RatingStore`]. Both are pluggable: Postgres (with a Redis read-through
//! cache on the oracle side) for deployments, and an in-memory backend for
//! local runs and tests.

use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        Joke, JokeId, JokeSubmission, Profile, ProfileUpdate, Rating, RatingValue, SimilarJoke,
        SimilarUser, UserId,
    },
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgRatingStore, PgSimilarityOracle};

/// Read-only source of precomputed similarity
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SimilarityOracle: Send + Sync {
    /// Jokes similar to `joke_id`, each with a similarity in [0, 1]
    async fn similar_jokes(&self, joke_id: JokeId) -> AppResult<Vec<SimilarJoke>>;

    /// The oracle's top-K neighbors of `user_id`; K is the oracle's choice
    async fn top_similar_users(&self, user_id: UserId) -> AppResult<Vec<SimilarUser>>;

    /// One joke drawn at random from those not in `excluded`
    async fn random_joke_excluding(&self, excluded: &[JokeId]) -> AppResult<Option<Joke>>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// Source of truth for rating facts and rolling histories
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RatingStore: Send + Sync {
    async fn insert_rating(
        &self,
        user_id: UserId,
        joke_id: JokeId,
        value: RatingValue,
    ) -> AppResult<Rating>;

    /// Every rating fact the user has, duplicates included
    async fn ratings_by_user(&self, user_id: UserId) -> AppResult<Vec<Rating>>;

    /// Every rating fact of the given users, fetched in one batch
    async fn ratings_by_users(&self, user_ids: &[UserId]) -> AppResult<Vec<Rating>>;

    async fn get_profile(&self, user_id: UserId) -> AppResult<Profile>;

    /// Resolves the identity-provider id carried by a session
    async fn profile_by_auth_id(&self, auth_id: Uuid) -> AppResult<Profile>;

    /// Writes the rolling history only if the stored version still equals
    /// `expected_version`; a successful write bumps the version.
    async fn update_profile(
        &self,
        user_id: UserId,
        last5_joke_ids: &[JokeId],
        expected_version: i64,
    ) -> AppResult<ProfileUpdate>;

    async fn joke_text_by_ids(&self, ids: &[JokeId]) -> AppResult<Vec<Joke>>;

    /// Queues a user-written joke for moderation
    async fn submit_joke(&self, submission: &JokeSubmission) -> AppResult<JokeSubmission>;

    /// Store name for logging
    fn name(&self) -> &'static str;
}

/// Runs one external call under `limit`, reporting expiry through `on_timeout`
///
/// Pass `AppError::Oracle` for similarity lookups and `AppError::Persistence`
/// for store calls so a timeout surfaces as the same kind as a failure.
pub async fn bounded<T, F>(
    limit: Duration,
    call: &'static str,
    on_timeout: fn(String) -> AppError,
    future: F,
) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(call, timeout_ms = limit.as_millis() as u64, "External call timed out");
            Err(on_timeout(format!(
                "{} timed out after {}ms",
                call,
                limit.as_millis()
            )))
        }
    }
}
