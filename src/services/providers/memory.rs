//! In-memory collaborators for local runs and tests
//!
//! One [`MemoryStore`] plays both roles: it holds the catalogue, rating facts
//! and profiles, and it answers similarity lookups from edges seeded with
//! [`MemoryStore::link_jokes`] and [`MemoryStore::link_users`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        Joke, JokeId, JokeSubmission, Profile, ProfileUpdate, Rating, RatingValue, SimilarJoke,
        SimilarUser, UserId,
    },
    services::providers::{RatingStore, SimilarityOracle},
};

#[derive(Default)]
struct MemoryState {
    jokes: BTreeMap<JokeId, String>,
    ratings: Vec<Rating>,
    profiles: BTreeMap<UserId, Profile>,
    joke_edges: HashMap<JokeId, Vec<(JokeId, f64)>>,
    user_edges: HashMap<UserId, Vec<SimilarUser>>,
    submissions: Vec<JokeSubmission>,
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    neighbor_limit: usize,
    similar_jokes_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(5, 20)
    }
}

impl MemoryStore {
    pub fn new(neighbor_limit: usize, similar_jokes_limit: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            neighbor_limit,
            similar_jokes_limit,
        }
    }

    /// A handful of jokes so the stage has something to show with no database
    pub async fn with_demo_catalogue(neighbor_limit: usize, similar_jokes_limit: usize) -> Self {
        let store = Self::new(neighbor_limit, similar_jokes_limit);
        let jokes = [
            "Have you heard about that fire at the circus? It was in tents.",
            "I told my wife she was drawing her eyebrows too high. She looked surprised.",
            "Why don't skeletons fight each other? They don't have the guts.",
            "I'm reading a book about anti-gravity. It's impossible to put down.",
            "What do you call fake spaghetti? An impasta.",
            "Why did the scarecrow win an award? He was outstanding in his field.",
            "I used to play piano by ear, but now I use my hands.",
        ];
        for (offset, text) in jokes.iter().enumerate() {
            store.add_joke(offset as JokeId + 1, text).await;
        }
        store.link_jokes(1, 3, 0.6).await;
        store.link_jokes(4, 7, 0.8).await;
        store.link_jokes(5, 6, 0.4).await;
        store
    }

    pub async fn add_joke(&self, id: JokeId, text: &str) {
        self.state.write().await.jokes.insert(id, text.to_string());
    }

    /// Creates a profile for `user_id` and returns its session id
    pub async fn add_user(&self, user_id: UserId) -> Uuid {
        let auth_id = Uuid::new_v4();
        self.state
            .write()
            .await
            .profiles
            .insert(user_id, Profile::new(user_id, auth_id));
        auth_id
    }

    /// Records a symmetric item-item edge
    pub async fn link_jokes(&self, a: JokeId, b: JokeId, similarity: f64) {
        let mut state = self.state.write().await;
        state.joke_edges.entry(a).or_default().push((b, similarity));
        state.joke_edges.entry(b).or_default().push((a, similarity));
    }

    /// Records a symmetric user-user edge
    pub async fn link_users(&self, a: UserId, b: UserId, similarity_score: f64) {
        let mut state = self.state.write().await;
        state.user_edges.entry(a).or_default().push(SimilarUser {
            other_user_id: b,
            similarity_score,
        });
        state.user_edges.entry(b).or_default().push(SimilarUser {
            other_user_id: a,
            similarity_score,
        });
    }

    /// Moderation queue contents, oldest first
    pub async fn submissions(&self) -> Vec<JokeSubmission> {
        self.state.read().await.submissions.clone()
    }
}

#[async_trait::async_trait]
impl RatingStore for MemoryStore {
    async fn insert_rating(
        &self,
        user_id: UserId,
        joke_id: JokeId,
        value: RatingValue,
    ) -> AppResult<Rating> {
        let mut state = self.state.write().await;
        if !state.profiles.contains_key(&user_id) {
            return Err(AppError::Persistence(format!("Unknown user {}", user_id)));
        }
        if !state.jokes.contains_key(&joke_id) {
            return Err(AppError::Persistence(format!("Unknown joke {}", joke_id)));
        }

        let rating = Rating {
            id: state.ratings.len() as i64 + 1,
            user_id,
            joke_id,
            value: value.get(),
            created_at: Utc::now(),
        };
        state.ratings.push(rating.clone());
        Ok(rating)
    }

    async fn ratings_by_user(&self, user_id: UserId) -> AppResult<Vec<Rating>> {
        let state = self.state.read().await;
        Ok(state
            .ratings
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn ratings_by_users(&self, user_ids: &[UserId]) -> AppResult<Vec<Rating>> {
        let wanted: HashSet<UserId> = user_ids.iter().copied().collect();
        let state = self.state.read().await;
        Ok(state
            .ratings
            .iter()
            .filter(|r| wanted.contains(&r.user_id))
            .cloned()
            .collect())
    }

    async fn get_profile(&self, user_id: UserId) -> AppResult<Profile> {
        self.state
            .read()
            .await
            .profiles
            .get(&user_id)
            .cloned()
            .ok_or_else(|| AppError::Persistence(format!("No profile for user {}", user_id)))
    }

    async fn profile_by_auth_id(&self, auth_id: Uuid) -> AppResult<Profile> {
        self.state
            .read()
            .await
            .profiles
            .values()
            .find(|p| p.auth_id == auth_id)
            .cloned()
            .ok_or_else(|| AppError::Persistence(format!("No profile for session {}", auth_id)))
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        last5_joke_ids: &[JokeId],
        expected_version: i64,
    ) -> AppResult<ProfileUpdate> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| AppError::Persistence(format!("No profile for user {}", user_id)))?;

        if profile.version != expected_version {
            return Ok(ProfileUpdate::Conflict);
        }
        profile.last5_joke_ids = last5_joke_ids.to_vec();
        profile.version += 1;
        Ok(ProfileUpdate::Applied)
    }

    async fn joke_text_by_ids(&self, ids: &[JokeId]) -> AppResult<Vec<Joke>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                state.jokes.get(id).map(|text| Joke {
                    id: *id,
                    text: text.clone(),
                })
            })
            .collect())
    }

    async fn submit_joke(&self, submission: &JokeSubmission) -> AppResult<JokeSubmission> {
        self.state.write().await.submissions.push(submission.clone());
        Ok(submission.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait::async_trait]
impl SimilarityOracle for MemoryStore {
    async fn similar_jokes(&self, joke_id: JokeId) -> AppResult<Vec<SimilarJoke>> {
        let state = self.state.read().await;
        let mut edges: Vec<SimilarJoke> = state
            .joke_edges
            .get(&joke_id)
            .into_iter()
            .flatten()
            .filter_map(|(other, similarity)| {
                state.jokes.get(other).map(|text| SimilarJoke {
                    id: *other,
                    text: text.clone(),
                    similarity: *similarity,
                })
            })
            .collect();

        edges.sort_by(|a, b| b.similarity.total_cmp(&a.similarity).then(a.id.cmp(&b.id)));
        edges.truncate(self.similar_jokes_limit);
        Ok(edges)
    }

    async fn top_similar_users(&self, user_id: UserId) -> AppResult<Vec<SimilarUser>> {
        let state = self.state.read().await;
        let mut neighbors = state.user_edges.get(&user_id).cloned().unwrap_or_default();

        neighbors.sort_by(|a, b| {
            b.similarity_score
                .total_cmp(&a.similarity_score)
                .then(a.other_user_id.cmp(&b.other_user_id))
        });
        neighbors.truncate(self.neighbor_limit);
        Ok(neighbors)
    }

    async fn random_joke_excluding(&self, excluded: &[JokeId]) -> AppResult<Option<Joke>> {
        let excluded: HashSet<JokeId> = excluded.iter().copied().collect();
        let state = self.state.read().await;
        let eligible: Vec<(&JokeId, &String)> = state
            .jokes
            .iter()
            .filter(|(id, _)| !excluded.contains(*id))
            .collect();

        Ok(eligible
            .choose(&mut rand::thread_rng())
            .map(|(id, text)| Joke {
                id: **id,
                text: (*text).clone(),
            }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
