//! Postgres-backed collaborators
//!
//! Rating facts, profiles and the moderation queue live in ordinary tables.
//! Similarity edges are precomputed by an offline job into `joke_similarity`
//! and `user_similarity`; lookups against them are read through Redis.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{
    cached,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::{
        Joke, JokeId, JokeSubmission, Profile, ProfileUpdate, Rating, RatingValue, SimilarJoke,
        SimilarUser, UserId,
    },
    services::providers::{RatingStore, SimilarityOracle},
};

#[derive(FromRow)]
struct RatingRow {
    id: i64,
    user_id: i64,
    joke_id: i64,
    rating: f64,
    created_at: DateTime<Utc>,
}

impl From<RatingRow> for Rating {
    fn from(row: RatingRow) -> Self {
        Rating {
            id: row.id,
            user_id: row.user_id,
            joke_id: row.joke_id,
            value: row.rating,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ProfileRow {
    user_id: i64,
    auth_id: Uuid,
    last5_joke_ids: Vec<i64>,
    version: i64,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            user_id: row.user_id,
            auth_id: row.auth_id,
            last5_joke_ids: row.last5_joke_ids,
            version: row.version,
        }
    }
}

#[derive(FromRow)]
struct JokeRow {
    id: i64,
    joke_text: String,
}

impl From<JokeRow> for Joke {
    fn from(row: JokeRow) -> Self {
        Joke {
            id: row.id,
            text: row.joke_text,
        }
    }
}

#[derive(FromRow)]
struct SimilarJokeRow {
    id: i64,
    joke_text: String,
    similarity: f64,
}

#[derive(FromRow)]
struct SimilarUserRow {
    other_user_id: i64,
    similarity_score: f64,
}

const PROFILE_COLUMNS: &str = "user_id, auth_id, last5_joke_ids, version";

/// Ratings, profiles and submissions in Postgres
#[derive(Clone)]
pub struct PgRatingStore {
    pool: PgPool,
}

impl PgRatingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RatingStore for PgRatingStore {
    async fn insert_rating(
        &self,
        user_id: UserId,
        joke_id: JokeId,
        value: RatingValue,
    ) -> AppResult<Rating> {
        let row: RatingRow = sqlx::query_as(
            r#"
            INSERT INTO ratings (user_id, joke_id, rating)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, joke_id, rating, created_at
            "#,
        )
        .bind(user_id)
        .bind(joke_id)
        .bind(value.get())
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::persistence)?;

        Ok(row.into())
    }

    async fn ratings_by_user(&self, user_id: UserId) -> AppResult<Vec<Rating>> {
        let rows: Vec<RatingRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, joke_id, rating, created_at
            FROM ratings
            WHERE user_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::persistence)?;

        Ok(rows.into_iter().map(Rating::from).collect())
    }

    async fn ratings_by_users(&self, user_ids: &[UserId]) -> AppResult<Vec<Rating>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<RatingRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, joke_id, rating, created_at
            FROM ratings
            WHERE user_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::persistence)?;

        Ok(rows.into_iter().map(Rating::from).collect())
    }

    async fn get_profile(&self, user_id: UserId) -> AppResult<Profile> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {} FROM profiles WHERE user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::persistence)?;

        row.map(Profile::from)
            .ok_or_else(|| AppError::Persistence(format!("No profile for user {}", user_id)))
    }

    async fn profile_by_auth_id(&self, auth_id: Uuid) -> AppResult<Profile> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {} FROM profiles WHERE auth_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(auth_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::persistence)?;

        row.map(Profile::from)
            .ok_or_else(|| AppError::Persistence(format!("No profile for session {}", auth_id)))
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        last5_joke_ids: &[JokeId],
        expected_version: i64,
    ) -> AppResult<ProfileUpdate> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET last5_joke_ids = $2, version = version + 1
            WHERE user_id = $1 AND version = $3
            "#,
        )
        .bind(user_id)
        .bind(last5_joke_ids)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(AppError::persistence)?;

        if result.rows_affected() == 1 {
            Ok(ProfileUpdate::Applied)
        } else {
            Ok(ProfileUpdate::Conflict)
        }
    }

    async fn joke_text_by_ids(&self, ids: &[JokeId]) -> AppResult<Vec<Joke>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<JokeRow> =
            sqlx::query_as("SELECT id, joke_text FROM jokes WHERE id = ANY($1) ORDER BY id")
                .bind(ids)
                .fetch_all(&self.pool)
                .await
                .map_err(AppError::persistence)?;

        Ok(rows.into_iter().map(Joke::from).collect())
    }

    async fn submit_joke(&self, submission: &JokeSubmission) -> AppResult<JokeSubmission> {
        let joke_text: String =
            sqlx::query_scalar("INSERT INTO new_jokes (joke_text) VALUES ($1) RETURNING joke_text")
                .bind(&submission.joke_text)
                .fetch_one(&self.pool)
                .await
                .map_err(AppError::persistence)?;

        Ok(JokeSubmission { joke_text })
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

/// Similarity lookups over the precomputed edge tables
#[derive(Clone)]
pub struct PgSimilarityOracle {
    pool: PgPool,
    cache: Cache,
    cache_ttl: u64,
    neighbor_limit: i64,
    similar_jokes_limit: i64,
}

impl PgSimilarityOracle {
    pub fn new(
        pool: PgPool,
        cache: Cache,
        cache_ttl: u64,
        neighbor_limit: i64,
        similar_jokes_limit: i64,
    ) -> Self {
        Self {
            pool,
            cache,
            cache_ttl,
            neighbor_limit,
            similar_jokes_limit,
        }
    }

    /// Similar jokes read through Redis; a cache miss falls back to Postgres
    async fn cached_similar_jokes(&self, joke_id: JokeId) -> AppResult<Vec<SimilarJoke>> {
        let key = CacheKey::SimilarJokes {
            joke_id,
            limit: self.similar_jokes_limit,
        };
        cached!(self.cache, key, self.cache_ttl, self.query_similar_jokes(joke_id))
    }

    async fn cached_similar_users(&self, user_id: UserId) -> AppResult<Vec<SimilarUser>> {
        let key = CacheKey::SimilarUsers {
            user_id,
            limit: self.neighbor_limit,
        };
        cached!(self.cache, key, self.cache_ttl, self.query_similar_users(user_id))
    }

    async fn query_similar_jokes(&self, joke_id: JokeId) -> AppResult<Vec<SimilarJoke>> {
        let rows: Vec<SimilarJokeRow> = sqlx::query_as(
            r#"
            SELECT j.id, j.joke_text, s.similarity
            FROM joke_similarity s
            JOIN jokes j ON j.id = s.joke_b
            WHERE s.joke_a = $1
            ORDER BY s.similarity DESC, j.id
            LIMIT $2
            "#,
        )
        .bind(joke_id)
        .bind(self.similar_jokes_limit)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::oracle)?;

        tracing::debug!(joke_id, edges = rows.len(), "Loaded similar jokes");

        Ok(rows
            .into_iter()
            .map(|row| SimilarJoke {
                id: row.id,
                text: row.joke_text,
                similarity: row.similarity,
            })
            .collect())
    }

    async fn query_similar_users(&self, user_id: UserId) -> AppResult<Vec<SimilarUser>> {
        let rows: Vec<SimilarUserRow> = sqlx::query_as(
            r#"
            SELECT user_b AS other_user_id, similarity_score
            FROM user_similarity
            WHERE user_a = $1
            ORDER BY similarity_score DESC, user_b
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(self.neighbor_limit)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::oracle)?;

        Ok(rows
            .into_iter()
            .map(|row| SimilarUser {
                other_user_id: row.other_user_id,
                similarity_score: row.similarity_score,
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl SimilarityOracle for PgSimilarityOracle {
    async fn similar_jokes(&self, joke_id: JokeId) -> AppResult<Vec<SimilarJoke>> {
        self.cached_similar_jokes(joke_id)
            .await
            .map_err(AppError::cache_as_oracle)
    }

    async fn top_similar_users(&self, user_id: UserId) -> AppResult<Vec<SimilarUser>> {
        self.cached_similar_users(user_id)
            .await
            .map_err(AppError::cache_as_oracle)
    }

    async fn random_joke_excluding(&self, excluded: &[JokeId]) -> AppResult<Option<Joke>> {
        let row: Option<JokeRow> = sqlx::query_as(
            r#"
            SELECT id, joke_text
            FROM jokes
            WHERE NOT (id = ANY($1))
            ORDER BY random()
            LIMIT 1
            "#,
        )
        .bind(excluded)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::oracle)?;

        Ok(row.map(Joke::from))
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
