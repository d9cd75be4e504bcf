use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::instrument;

use crate::{
    config::RecommenderSettings,
    error::{AppError, AppResult},
    models::{JokeId, Rating, RatingValue, Recommendation, UserId, HISTORY_CAPACITY},
    services::{
        candidates, cold_start, fusion, interactions,
        providers::{bounded, RatingStore, SimilarityOracle},
    },
};

/// Picks the next joke for a user and records the ratings they give
///
/// Holds no per-user state; everything shared lives behind the store.
#[derive(Clone)]
pub struct Recommender {
    store: Arc<dyn RatingStore>,
    oracle: Arc<dyn SimilarityOracle>,
    settings: RecommenderSettings,
}

impl Recommender {
    pub fn new(
        store: Arc<dyn RatingStore>,
        oracle: Arc<dyn SimilarityOracle>,
        settings: RecommenderSettings,
    ) -> Self {
        tracing::info!(
            store = store.name(),
            oracle = oracle.name(),
            timeout_ms = settings.call_timeout.as_millis() as u64,
            "Recommender ready"
        );
        Self {
            store,
            oracle,
            settings,
        }
    }

    pub fn store(&self) -> &dyn RatingStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &RecommenderSettings {
        &self.settings
    }

    /// Recommends one joke the user has never rated
    ///
    /// `history` is the caller's copy of the rolling history. It may disagree
    /// with the rating facts if a history write was lost; exclusion always
    /// uses the full rated set. Only its last `HISTORY_CAPACITY` entries are
    /// looked up, so an oversized list costs no more than a full history.
    #[instrument(skip(self, history), fields(history_len = history.len()))]
    pub async fn recommend(&self, user_id: UserId, history: &[JokeId]) -> AppResult<Recommendation> {
        let start = Instant::now();
        let limit = self.settings.call_timeout;

        let ratings = bounded(
            limit,
            "ratings_by_user",
            AppError::Persistence,
            self.store.ratings_by_user(user_id),
        )
        .await?;
        let rated: HashSet<JokeId> = ratings.iter().map(|r| r.joke_id).collect();

        // Duplicate facts count toward the threshold
        if ratings.len() < cold_start::COLD_START_THRESHOLD {
            tracing::debug!(ratings = ratings.len(), "Below cold-start threshold");
            return cold_start::pick_unseen(self.oracle.as_ref(), &rated, limit).await;
        }

        // At most HISTORY_CAPACITY item lookups, newest entries only
        let recent = &history[history.len().saturating_sub(HISTORY_CAPACITY)..];
        if recent.len() < history.len() {
            tracing::debug!(
                supplied = history.len(),
                kept = recent.len(),
                "Trimmed history to its newest entries"
            );
        }

        let (items, neighbors) = tokio::try_join!(
            candidates::item_based_pool(Arc::clone(&self.oracle), recent, &rated, limit),
            candidates::user_based_pool(self.oracle.as_ref(), self.store.as_ref(), user_id, limit),
        )?;

        // An empty neighbor list switches to the unscaled similarity ranking
        let recommendation = if neighbors.has_neighbors() {
            self.select_fused(&items, &neighbors, &rated).await?
        } else {
            tracing::debug!("No neighbors, ranking on item similarity alone");
            fusion::select_by_similarity(&items, &rated).ok_or_else(|| {
                AppError::NoCandidates("No unseen joke is similar to recent ratings".to_string())
            })?
        };

        tracing::info!(
            joke_id = recommendation.joke_id,
            final_score = recommendation.final_score,
            source = ?recommendation.source,
            item_candidates = items.len(),
            neighbor_candidates = neighbors.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Recommendation selected"
        );

        Ok(recommendation)
    }

    async fn select_fused(
        &self,
        items: &candidates::ItemPool,
        neighbors: &candidates::UserPool,
        rated: &HashSet<JokeId>,
    ) -> AppResult<Recommendation> {
        let mut scored = fusion::score_candidates(items, neighbors, rated);
        if scored.is_empty() {
            return Err(AppError::NoCandidates(
                "Every candidate has already been rated".to_string(),
            ));
        }

        // User-only candidates arrive without text; fetch it in one batch
        let missing = fusion::missing_text(&scored);
        if !missing.is_empty() {
            let jokes = bounded(
                self.settings.call_timeout,
                "joke_text_by_ids",
                AppError::Persistence,
                self.store.joke_text_by_ids(&missing),
            )
            .await?;
            scored = fusion::attach_text(scored, jokes);
        }

        fusion::select_best(scored)
            .ok_or_else(|| AppError::NoCandidates("No candidate has joke text".to_string()))
    }

    /// Records a rating and updates the rolling history
    pub async fn rate(&self, user_id: UserId, joke_id: JokeId, value: RatingValue) -> AppResult<Rating> {
        interactions::record_rating(self.store.as_ref(), &self.settings, user_id, joke_id, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Joke, RecommendationSource, SimilarJoke, SimilarUser};
    use crate::services::providers::{MockRatingStore, MockSimilarityOracle};
    use chrono::Utc;

    fn rating(user_id: UserId, joke_id: JokeId, value: f64) -> Rating {
        Rating {
            id: 0,
            user_id,
            joke_id,
            value,
            created_at: Utc::now(),
        }
    }

    fn edge(id: JokeId, similarity: f64) -> SimilarJoke {
        SimilarJoke {
            id,
            text: format!("joke {}", id),
            similarity,
        }
    }

    fn recommender(store: MockRatingStore, oracle: MockSimilarityOracle) -> Recommender {
        Recommender::new(Arc::new(store), Arc::new(oracle), RecommenderSettings::default())
    }

    fn oracle_named() -> MockSimilarityOracle {
        let mut oracle = MockSimilarityOracle::new();
        oracle.expect_name().return_const("mock");
        oracle
    }

    fn store_with_ratings(ratings: Vec<Rating>) -> MockRatingStore {
        let mut store = MockRatingStore::new();
        store.expect_name().return_const("mock");
        store
            .expect_ratings_by_user()
            .returning(move |_| Ok(ratings.clone()));
        store
    }

    fn five_ratings() -> Vec<Rating> {
        (10..=14).map(|joke_id| rating(1, joke_id, 3.0)).collect()
    }

    #[tokio::test]
    async fn test_cold_start_below_threshold() {
        let store = store_with_ratings(vec![rating(1, 10, 4.0), rating(1, 11, 2.0)]);
        let mut oracle = oracle_named();
        oracle.expect_similar_jokes().never();
        oracle.expect_top_similar_users().never();
        oracle
            .expect_random_joke_excluding()
            .withf(|excluded| excluded.to_vec() == vec![10, 11])
            .returning(|_| {
                Ok(Some(Joke {
                    id: 3,
                    text: "Why do cows wear bells? Their horns don't work.".to_string(),
                }))
            });

        let pick = recommender(store, oracle).recommend(1, &[10, 11]).await.unwrap();

        assert_eq!(pick.joke_id, 3);
        assert_eq!(pick.final_score, 1.0);
        assert_eq!(pick.source, RecommendationSource::ColdStart);
    }

    #[tokio::test]
    async fn test_duplicate_ratings_count_toward_threshold() {
        let store = store_with_ratings((0..5).map(|_| rating(1, 10, 4.0)).collect());
        let mut oracle = oracle_named();
        oracle.expect_random_joke_excluding().never();
        oracle
            .expect_similar_jokes()
            .returning(|_| Ok(vec![edge(20, 0.5)]));
        oracle.expect_top_similar_users().returning(|_| Ok(vec![]));

        let pick = recommender(store, oracle).recommend(1, &[10]).await.unwrap();

        assert_eq!(pick.joke_id, 20);
        assert_eq!(pick.source, RecommendationSource::SimilarityOnly);
    }

    #[tokio::test]
    async fn test_end_to_end_fused_selection() {
        let mut store = store_with_ratings(five_ratings());
        store
            .expect_ratings_by_users()
            .withf(|ids| ids.to_vec() == vec![99])
            .returning(|_| Ok(vec![rating(99, 20, 5.0), rating(99, 12, 5.0)]));
        store.expect_joke_text_by_ids().never();

        let mut oracle = oracle_named();
        oracle.expect_similar_jokes().returning(|joke_id| match joke_id {
            10 => Ok(vec![edge(20, 0.9)]),
            12 => Ok(vec![edge(20, 0.7), edge(21, 0.2)]),
            _ => Ok(vec![]),
        });
        oracle.expect_top_similar_users().returning(|_| {
            Ok(vec![SimilarUser {
                other_user_id: 99,
                similarity_score: 0.5,
            }])
        });

        let pick = recommender(store, oracle)
            .recommend(1, &[10, 11, 12, 13, 14])
            .await
            .unwrap();

        assert_eq!(pick.joke_id, 20);
        assert_eq!(pick.joke_text, "joke 20");
        assert!((pick.final_score - 4.76).abs() < 1e-9);
        assert_eq!(pick.source, RecommendationSource::Fused);
    }

    #[tokio::test]
    async fn test_neighbor_only_candidate_text_is_fetched() {
        let mut store = store_with_ratings(five_ratings());
        store
            .expect_ratings_by_users()
            .returning(|_| Ok(vec![rating(99, 40, 5.0)]));
        store
            .expect_joke_text_by_ids()
            .withf(|ids| ids.to_vec() == vec![40])
            .times(1)
            .returning(|_| {
                Ok(vec![Joke {
                    id: 40,
                    text: "I'm on a seafood diet. I see food and I eat it.".to_string(),
                }])
            });

        let mut oracle = oracle_named();
        oracle
            .expect_similar_jokes()
            .returning(|_| Ok(vec![edge(21, 0.1)]));
        oracle.expect_top_similar_users().returning(|_| {
            Ok(vec![SimilarUser {
                other_user_id: 99,
                similarity_score: 0.9,
            }])
        });

        let pick = recommender(store, oracle).recommend(1, &[10]).await.unwrap();

        // 0.7 * 5 + 0.3 * 1 beats 0.3 * 1.4
        assert_eq!(pick.joke_id, 40);
        assert!((pick.final_score - 3.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_never_recommends_rated_joke() {
        let mut store = store_with_ratings(five_ratings());
        store
            .expect_ratings_by_users()
            .returning(|_| Ok(vec![rating(99, 10, 5.0), rating(99, 14, 5.0)]));

        let mut oracle = oracle_named();
        oracle
            .expect_similar_jokes()
            .returning(|_| Ok(vec![edge(11, 1.0), edge(13, 1.0)]));
        oracle.expect_top_similar_users().returning(|_| {
            Ok(vec![SimilarUser {
                other_user_id: 99,
                similarity_score: 1.0,
            }])
        });

        let result = recommender(store, oracle).recommend(1, &[10, 11]).await;

        assert!(matches!(result, Err(AppError::NoCandidates(_))));
    }

    #[tokio::test]
    async fn test_oracle_failure_aborts_request() {
        let mut store = store_with_ratings(five_ratings());
        store.expect_ratings_by_users().returning(|_| Ok(vec![]));

        let mut oracle = oracle_named();
        oracle
            .expect_similar_jokes()
            .returning(|_| Err(AppError::Oracle("connection reset".to_string())));
        oracle.expect_top_similar_users().returning(|_| Ok(vec![]));

        let result = recommender(store, oracle).recommend(1, &[10]).await;

        assert!(matches!(result, Err(AppError::Oracle(_))));
    }

    #[tokio::test]
    async fn test_oversized_history_looks_up_newest_five() {
        let store = store_with_ratings(five_ratings());
        let mut oracle = oracle_named();
        oracle
            .expect_similar_jokes()
            .withf(|joke_id| (1195..1200).contains(joke_id))
            .times(HISTORY_CAPACITY)
            .returning(|joke_id| Ok(vec![edge(joke_id + 1000, 0.5)]));
        oracle.expect_top_similar_users().returning(|_| Ok(vec![]));

        let history: Vec<JokeId> = (1000..1200).collect();
        let pick = recommender(store, oracle).recommend(1, &history).await.unwrap();

        assert_eq!(pick.joke_id, 2195);
    }

    #[tokio::test]
    async fn test_no_neighbors_returns_raw_similarity() {
        let store = store_with_ratings(five_ratings());
        let mut oracle = oracle_named();
        oracle.expect_similar_jokes().returning(|joke_id| match joke_id {
            10 => Ok(vec![edge(30, 0.4), edge(31, 0.5)]),
            _ => Ok(vec![edge(30, 0.8)]),
        });
        oracle.expect_top_similar_users().returning(|_| Ok(vec![]));

        let pick = recommender(store, oracle).recommend(1, &[10, 11]).await.unwrap();

        assert_eq!(pick.joke_id, 30);
        assert!((pick.final_score - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_history_with_neighbors_still_recommends() {
        let mut store = store_with_ratings(five_ratings());
        store
            .expect_ratings_by_users()
            .returning(|_| Ok(vec![rating(99, 50, 4.0)]));
        store.expect_joke_text_by_ids().returning(|_| {
            Ok(vec![Joke {
                id: 50,
                text: "Time flies like an arrow. Fruit flies like a banana.".to_string(),
            }])
        });

        let mut oracle = oracle_named();
        oracle.expect_similar_jokes().never();
        oracle.expect_top_similar_users().returning(|_| {
            Ok(vec![SimilarUser {
                other_user_id: 99,
                similarity_score: 0.3,
            }])
        });

        let pick = recommender(store, oracle).recommend(1, &[]).await.unwrap();

        assert_eq!(pick.joke_id, 50);
        assert!((pick.final_score - 3.1).abs() < 1e-9);
    }
}
