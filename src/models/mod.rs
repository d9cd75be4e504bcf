use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::error::{AppError, AppResult};

mod profile;

pub use profile::{Profile, ProfileUpdate, HISTORY_CAPACITY};

/// Numeric identifier of a rating user
pub type UserId = i64;

/// Numeric identifier of a joke
pub type JokeId = i64;

/// A joke from the catalogue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Joke {
    pub id: JokeId,
    pub text: String,
}

/// Value a user gave a joke, on the star widget's fractional scale
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
#[serde(try_from = "f64", into = "f64")]
pub struct RatingValue(f64);

impl RatingValue {
    pub const MIN: f64 = 0.5;
    pub const MAX: f64 = 5.0;

    pub fn new(value: f64) -> AppResult<Self> {
        if !value.is_finite() || !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(AppError::InvalidInput(format!(
                "Rating must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for RatingValue {
    type Error = AppError;

    fn try_from(value: f64) -> AppResult<Self> {
        Self::new(value)
    }
}

impl From<RatingValue> for f64 {
    fn from(value: RatingValue) -> Self {
        value.0
    }
}

impl Display for RatingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A recorded rating fact. Never mutated once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub id: i64,
    pub user_id: UserId,
    pub joke_id: JokeId,
    pub value: f64,
    pub created_at: DateTime<Utc>,
}

/// One item-item edge handed back by the similarity oracle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarJoke {
    pub id: JokeId,
    pub text: String,
    pub similarity: f64,
}

/// One user-user edge handed back by the similarity oracle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarUser {
    pub other_user_id: UserId,
    pub similarity_score: f64,
}

/// Which branch produced a recommendation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    /// Random unseen joke for a user with too little history
    ColdStart,
    /// Fused neighbor rating and item similarity
    Fused,
    /// No neighbors at all; ranked on raw item similarity
    SimilarityOnly,
}

/// The single joke picked for a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub joke_id: JokeId,
    pub joke_text: String,
    pub final_score: f64,
    pub source: RecommendationSource,
}

/// What the stage page needs to know about the signed-in user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserDetails {
    pub user_id: UserId,
    pub last5_joke_ids: Vec<JokeId>,
}

impl From<&Profile> for UserDetails {
    fn from(profile: &Profile) -> Self {
        Self {
            user_id: profile.user_id,
            last5_joke_ids: profile.last5_joke_ids.clone(),
        }
    }
}

/// A user-written joke waiting for moderation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JokeSubmission {
    pub joke_text: String,
}

impl JokeSubmission {
    pub const MAX_LEN: usize = 1000;

    /// Trims the text and rejects empty or oversized submissions
    pub fn new(text: &str) -> AppResult<Self> {
        let joke_text = text.trim();
        if joke_text.is_empty() {
            return Err(AppError::InvalidInput("Joke text is empty".to_string()));
        }
        if joke_text.chars().count() > Self::MAX_LEN {
            return Err(AppError::InvalidInput(format!(
                "Joke text exceeds {} characters",
                Self::MAX_LEN
            )));
        }
        Ok(Self {
            joke_text: joke_text.to_string(),
        })
    }
}
