//! Candidate generation from two independent signal sources.
//!
//! The item-based pool starts from the user's rolling history and asks the
//! oracle which jokes resemble each of them. The user-based pool starts from
//! the user's nearest neighbors and looks at what they rated. Both pools keep
//! candidates in the order they were first encountered so that later tie
//! breaks are deterministic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::instrument;

use crate::{
    error::{AppError, AppResult},
    models::{JokeId, Rating, SimilarJoke, SimilarUser, UserId},
    services::providers::{bounded, RatingStore, SimilarityOracle},
};

/// Accumulated item similarity for one candidate joke
#[derive(Debug, Clone, PartialEq)]
pub struct ItemEvidence {
    pub joke_id: JokeId,
    pub text: String,
    pub similarity_sum: f64,
    pub hits: u32,
}

impl ItemEvidence {
    pub fn average_similarity(&self) -> f64 {
        self.similarity_sum / f64::from(self.hits)
    }
}

/// Candidates surfaced by similarity to recently rated jokes
#[derive(Debug, Default, Clone)]
pub struct ItemPool {
    entries: Vec<ItemEvidence>,
    index: HashMap<JokeId, usize>,
}

impl ItemPool {
    /// Folds similar-joke lists into per-candidate sums and counts
    ///
    /// Any candidate the user already rated is dropped before it is counted.
    pub fn aggregate<I>(lists: I, rated: &HashSet<JokeId>) -> Self
    where
        I: IntoIterator<Item = Vec<SimilarJoke>>,
    {
        let mut pool = Self::default();
        for edge in lists.into_iter().flatten() {
            if rated.contains(&edge.id) {
                continue;
            }
            match pool.index.get(&edge.id) {
                Some(&slot) => {
                    let entry = &mut pool.entries[slot];
                    entry.similarity_sum += edge.similarity;
                    entry.hits += 1;
                }
                None => {
                    pool.index.insert(edge.id, pool.entries.len());
                    pool.entries.push(ItemEvidence {
                        joke_id: edge.id,
                        text: edge.text,
                        similarity_sum: edge.similarity,
                        hits: 1,
                    });
                }
            }
        }
        pool
    }

    pub fn get(&self, joke_id: JokeId) -> Option<&ItemEvidence> {
        self.index.get(&joke_id).map(|&slot| &self.entries[slot])
    }

    /// Entries in first-encountered order
    pub fn iter(&self) -> impl Iterator<Item = &ItemEvidence> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Neighbor-weighted rating evidence for one candidate joke
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborEvidence {
    pub joke_id: JokeId,
    pub weighted_sum: f64,
    pub total_weight: f64,
}

impl NeighborEvidence {
    pub fn weighted_rating(&self) -> f64 {
        self.weighted_sum / self.total_weight
    }
}

/// Candidates surfaced by what similar users rated
#[derive(Debug, Default, Clone)]
pub struct UserPool {
    neighbor_count: usize,
    entries: Vec<NeighborEvidence>,
    index: HashMap<JokeId, usize>,
}

impl UserPool {
    /// Pool for a user the oracle found no neighbors for
    pub fn without_neighbors() -> Self {
        Self::default()
    }

    /// Weighs each neighbor rating by that neighbor's similarity
    ///
    /// Only strictly positive, finite similarity scores carry weight; ratings
    /// by any other user are ignored.
    pub fn aggregate(neighbors: &[SimilarUser], ratings: &[Rating]) -> Self {
        let weights = neighbor_weights(neighbors);
        let mut pool = Self {
            neighbor_count: neighbors.len(),
            ..Self::default()
        };

        for rating in ratings {
            let Some(&weight) = weights.get(&rating.user_id) else {
                continue;
            };
            match pool.index.get(&rating.joke_id) {
                Some(&slot) => {
                    let entry = &mut pool.entries[slot];
                    entry.weighted_sum += weight * rating.value;
                    entry.total_weight += weight;
                }
                None => {
                    pool.index.insert(rating.joke_id, pool.entries.len());
                    pool.entries.push(NeighborEvidence {
                        joke_id: rating.joke_id,
                        weighted_sum: weight * rating.value,
                        total_weight: weight,
                    });
                }
            }
        }
        pool
    }

    /// Whether the oracle returned any neighbor at all, usable or not
    pub fn has_neighbors(&self) -> bool {
        self.neighbor_count > 0
    }

    pub fn get(&self, joke_id: JokeId) -> Option<&NeighborEvidence> {
        self.index.get(&joke_id).map(|&slot| &self.entries[slot])
    }

    /// Entries in first-encountered order
    pub fn iter(&self) -> impl Iterator<Item = &NeighborEvidence> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Usable neighbor weights; the first score listed for a neighbor wins
fn neighbor_weights(neighbors: &[SimilarUser]) -> HashMap<UserId, f64> {
    let mut weights = HashMap::new();
    for neighbor in neighbors {
        if neighbor.similarity_score.is_finite() && neighbor.similarity_score > 0.0 {
            weights
                .entry(neighbor.other_user_id)
                .or_insert(neighbor.similarity_score);
        }
    }
    weights
}

/// Rejects similarity lists the oracle should never produce
fn check_edges(source: JokeId, edges: &[SimilarJoke]) -> AppResult<()> {
    match edges
        .iter()
        .find(|e| !e.similarity.is_finite() || !(0.0..=1.0).contains(&e.similarity))
    {
        Some(bad) => Err(AppError::Oracle(format!(
            "Similarity {} between jokes {} and {} is outside [0, 1]",
            bad.similarity, source, bad.id
        ))),
        None => Ok(()),
    }
}

/// Builds the item-based pool, one concurrent oracle lookup per history entry
///
/// Lookups run on a `JoinSet`, so dropping this future (for instance when the
/// user-based pool fails first under `try_join!`) aborts every lookup still
/// in flight. Any failed or malformed lookup fails the whole pool and aborts
/// the rest.
#[instrument(skip(oracle, history, rated), fields(history_len = history.len()))]
pub async fn item_based_pool(
    oracle: Arc<dyn SimilarityOracle>,
    history: &[JokeId],
    rated: &HashSet<JokeId>,
    call_timeout: Duration,
) -> AppResult<ItemPool> {
    let mut lookups = JoinSet::new();
    for (slot, &joke_id) in history.iter().enumerate() {
        let oracle = Arc::clone(&oracle);
        lookups.spawn(async move {
            let edges = bounded(
                call_timeout,
                "similar_jokes",
                AppError::Oracle,
                oracle.similar_jokes(joke_id),
            )
            .await?;
            check_edges(joke_id, &edges)?;
            Ok::<_, AppError>((slot, edges))
        });
    }

    // Lookups finish in any order; slot them back into history order so
    // "first encountered" stays deterministic.
    let mut lists: Vec<Vec<SimilarJoke>> = vec![Vec::new(); history.len()];
    while let Some(joined) = lookups.join_next().await {
        let (slot, edges) = joined
            .map_err(|e| AppError::Internal(format!("Lookup task failed: {}", e)))??;
        lists[slot] = edges;
    }

    let pool = ItemPool::aggregate(lists, rated);

    tracing::debug!(candidates = pool.len(), "Item-based pool built");

    Ok(pool)
}

/// Builds the user-based pool from the oracle's neighbors and one batch
/// fetch of their ratings
#[instrument(skip(oracle, store))]
pub async fn user_based_pool(
    oracle: &dyn SimilarityOracle,
    store: &dyn RatingStore,
    user_id: UserId,
    call_timeout: Duration,
) -> AppResult<UserPool> {
    let neighbors = bounded(
        call_timeout,
        "top_similar_users",
        AppError::Oracle,
        oracle.top_similar_users(user_id),
    )
    .await?;

    if neighbors.is_empty() {
        tracing::debug!("No similar users");
        return Ok(UserPool::without_neighbors());
    }

    let mut usable: Vec<UserId> = neighbor_weights(&neighbors).into_keys().collect();
    if usable.is_empty() {
        tracing::debug!(neighbors = neighbors.len(), "No neighbor has positive similarity");
        return Ok(UserPool::aggregate(&neighbors, &[]));
    }
    usable.sort_unstable();

    let ratings = bounded(
        call_timeout,
        "ratings_by_users",
        AppError::Persistence,
        store.ratings_by_users(&usable),
    )
    .await?;

    let pool = UserPool::aggregate(&neighbors, &ratings);

    tracing::debug!(
        neighbors = neighbors.len(),
        usable_neighbors = usable.len(),
        candidates = pool.len(),
        "User-based pool built"
    );

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Joke;
    use crate::services::providers::{MockRatingStore, MockSimilarityOracle};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn edge(id: JokeId, similarity: f64) -> SimilarJoke {
        SimilarJoke {
            id,
            text: format!("joke {}", id),
            similarity,
        }
    }

    fn neighbor(other_user_id: UserId, similarity_score: f64) -> SimilarUser {
        SimilarUser {
            other_user_id,
            similarity_score,
        }
    }

    fn rating(user_id: UserId, joke_id: JokeId, value: f64) -> Rating {
        Rating {
            id: 0,
            user_id,
            joke_id,
            value,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_item_pool_averages_repeated_candidate() {
        let pool = ItemPool::aggregate(vec![vec![edge(20, 0.4)], vec![edge(20, 0.8)]], &HashSet::new());

        let evidence = pool.get(20).unwrap();
        assert_eq!(evidence.hits, 2);
        assert!((evidence.average_similarity() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_item_pool_drops_rated_candidates() {
        let rated: HashSet<JokeId> = [11, 30].into_iter().collect();
        let pool = ItemPool::aggregate(
            vec![vec![edge(11, 0.9), edge(21, 0.5)], vec![edge(30, 0.7)]],
            &rated,
        );

        assert_eq!(pool.len(), 1);
        assert!(pool.get(11).is_none());
        assert!(pool.get(30).is_none());
    }

    #[test]
    fn test_item_pool_keeps_first_encountered_order() {
        let pool = ItemPool::aggregate(
            vec![vec![edge(5, 0.1), edge(3, 0.2)], vec![edge(9, 0.3), edge(5, 0.4)]],
            &HashSet::new(),
        );
        let order: Vec<JokeId> = pool.iter().map(|e| e.joke_id).collect();
        assert_eq!(order, vec![5, 3, 9]);
    }

    #[test]
    fn test_user_pool_weights_ratings_by_similarity() {
        let neighbors = vec![neighbor(1, 0.5), neighbor(2, 1.5)];
        let ratings = vec![rating(1, 20, 5.0), rating(2, 20, 1.0)];

        let pool = UserPool::aggregate(&neighbors, &ratings);

        // (0.5 * 5 + 1.5 * 1) / 2.0
        let evidence = pool.get(20).unwrap();
        assert!((evidence.weighted_rating() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_user_pool_ignores_non_positive_neighbors() {
        let neighbors = vec![neighbor(1, 0.0), neighbor(2, -0.4), neighbor(3, f64::NAN)];
        let ratings = vec![rating(1, 20, 5.0), rating(2, 21, 5.0), rating(3, 22, 5.0)];

        let pool = UserPool::aggregate(&neighbors, &ratings);

        assert!(pool.is_empty());
        assert!(pool.has_neighbors());
    }

    #[test]
    fn test_user_pool_ignores_ratings_from_strangers() {
        let pool = UserPool::aggregate(&[neighbor(1, 0.8)], &[rating(77, 20, 5.0)]);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_item_based_pool_fans_out_per_history_entry() {
        let mut oracle = MockSimilarityOracle::new();
        oracle
            .expect_similar_jokes()
            .times(3)
            .returning(|joke_id| match joke_id {
                10 => Ok(vec![edge(20, 0.9)]),
                12 => Ok(vec![edge(20, 0.7), edge(13, 0.3)]),
                _ => Ok(vec![]),
            });

        let rated: HashSet<JokeId> = [10, 11, 12, 13].into_iter().collect();
        let pool = item_based_pool(Arc::new(oracle), &[10, 11, 12], &rated, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(pool.len(), 1);
        assert!((pool.get(20).unwrap().average_similarity() - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_item_based_pool_fails_on_any_lookup_error() {
        let mut oracle = MockSimilarityOracle::new();
        oracle.expect_similar_jokes().returning(|joke_id| {
            if joke_id == 2 {
                Err(AppError::Oracle("similarity table unavailable".to_string()))
            } else {
                Ok(vec![edge(50, 0.5)])
            }
        });

        let result =
            item_based_pool(Arc::new(oracle), &[1, 2, 3], &HashSet::new(), Duration::from_secs(1)).await;

        assert!(matches!(result, Err(AppError::Oracle(_))));
    }

    #[tokio::test]
    async fn test_item_based_pool_rejects_malformed_similarity() {
        let mut oracle = MockSimilarityOracle::new();
        oracle
            .expect_similar_jokes()
            .returning(|_| Ok(vec![edge(50, 1.7)]));

        let result =
            item_based_pool(Arc::new(oracle), &[1], &HashSet::new(), Duration::from_secs(1)).await;

        assert!(matches!(result, Err(AppError::Oracle(_))));
    }

    /// Oracle whose lookups take a while and record when they complete
    struct SlowOracle {
        delay: Duration,
        completed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl SimilarityOracle for SlowOracle {
        async fn similar_jokes(&self, joke_id: JokeId) -> AppResult<Vec<SimilarJoke>> {
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(vec![edge(joke_id + 100, 0.5)])
        }

        async fn top_similar_users(&self, _user_id: UserId) -> AppResult<Vec<SimilarUser>> {
            Ok(vec![])
        }

        async fn random_joke_excluding(&self, _excluded: &[JokeId]) -> AppResult<Option<Joke>> {
            Ok(None)
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_dropping_item_pool_aborts_lookups() {
        let completed = Arc::new(AtomicUsize::new(0));
        let oracle = Arc::new(SlowOracle {
            delay: Duration::from_millis(150),
            completed: Arc::clone(&completed),
        });

        // Give up on the pool well before any lookup can finish
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            item_based_pool(oracle, &[1, 2, 3], &HashSet::new(), Duration::from_secs(5)),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_item_based_pool_keeps_history_order_across_completion_order() {
        let mut oracle = MockSimilarityOracle::new();
        oracle.expect_similar_jokes().returning(|joke_id| match joke_id {
            1 => Ok(vec![edge(40, 0.2)]),
            _ => Ok(vec![edge(41, 0.9), edge(40, 0.4)]),
        });

        let pool = item_based_pool(Arc::new(oracle), &[1, 2], &HashSet::new(), Duration::from_secs(1))
            .await
            .unwrap();

        let order: Vec<JokeId> = pool.iter().map(|e| e.joke_id).collect();
        assert_eq!(order, vec![40, 41]);
    }

    #[tokio::test]
    async fn test_user_based_pool_skips_fetch_without_neighbors() {
        let mut oracle = MockSimilarityOracle::new();
        oracle.expect_top_similar_users().returning(|_| Ok(vec![]));
        let mut store = MockRatingStore::new();
        store.expect_ratings_by_users().never();

        let pool = user_based_pool(&oracle, &store, 1, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(!pool.has_neighbors());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_user_based_pool_fetches_only_usable_neighbors() {
        let mut oracle = MockSimilarityOracle::new();
        oracle
            .expect_top_similar_users()
            .returning(|_| Ok(vec![neighbor(99, 0.5), neighbor(98, -0.2)]));
        let mut store = MockRatingStore::new();
        store
            .expect_ratings_by_users()
            .withf(|ids| ids.to_vec() == vec![99])
            .times(1)
            .returning(|_| Ok(vec![rating(99, 20, 5.0)]));

        let pool = user_based_pool(&oracle, &store, 1, Duration::from_secs(1))
            .await
            .unwrap();

        assert!((pool.get(20).unwrap().weighted_rating() - 5.0).abs() < 1e-9);
    }
}
