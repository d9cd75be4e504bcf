//! Score fusion and selection over the two candidate pools.

use std::collections::{HashMap, HashSet};

use crate::{
    models::{Joke, JokeId, Recommendation, RecommendationSource},
    services::candidates::{ItemEvidence, ItemPool, UserPool},
};

/// Share of the final score taken by the neighbor-weighted rating
pub const NEIGHBOR_WEIGHT: f64 = 0.7;

/// Share of the final score taken by the scaled item similarity
pub const SIMILARITY_WEIGHT: f64 = 0.3;

/// Maps a [0, 1] similarity onto the 1..=5 rating scale
pub fn scale_similarity(average_similarity: f64) -> f64 {
    1.0 + 4.0 * average_similarity
}

pub fn fused_score(neighbor_rating: f64, average_similarity: f64) -> f64 {
    NEIGHBOR_WEIGHT * neighbor_rating + SIMILARITY_WEIGHT * scale_similarity(average_similarity)
}

/// A candidate with both signals resolved and its fused score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub joke_id: JokeId,
    /// `None` when only the user-based pool knows this joke
    pub text: Option<String>,
    pub average_similarity: f64,
    pub neighbor_rating: f64,
    pub final_score: f64,
}

/// Scores the union of both pools, minus everything the user already rated
///
/// Missing signals default to 0. Item-based candidates come first in their
/// encounter order, then user-only candidates in theirs.
pub fn score_candidates(
    items: &ItemPool,
    neighbors: &UserPool,
    rated: &HashSet<JokeId>,
) -> Vec<ScoredCandidate> {
    let item_ids = items.iter().map(|e| e.joke_id);
    let neighbor_ids = neighbors
        .iter()
        .map(|e| e.joke_id)
        .filter(|id| items.get(*id).is_none());

    item_ids
        .chain(neighbor_ids)
        .filter(|id| !rated.contains(id))
        .map(|joke_id| {
            let item = items.get(joke_id);
            let average_similarity = item.map_or(0.0, |e| e.average_similarity());
            let neighbor_rating = neighbors.get(joke_id).map_or(0.0, |e| e.weighted_rating());
            ScoredCandidate {
                joke_id,
                text: item.map(|e| e.text.clone()),
                average_similarity,
                neighbor_rating,
                final_score: fused_score(neighbor_rating, average_similarity),
            }
        })
        .collect()
}

/// Ids of candidates still lacking text, in candidate order
pub fn missing_text(candidates: &[ScoredCandidate]) -> Vec<JokeId> {
    candidates
        .iter()
        .filter(|c| c.text.is_none())
        .map(|c| c.joke_id)
        .collect()
}

/// Fills in text from a batch lookup; candidates still without text are dropped
pub fn attach_text(candidates: Vec<ScoredCandidate>, jokes: Vec<Joke>) -> Vec<ScoredCandidate> {
    let mut texts: HashMap<JokeId, String> = jokes.into_iter().map(|j| (j.id, j.text)).collect();

    candidates
        .into_iter()
        .filter_map(|mut candidate| {
            if candidate.text.is_none() {
                candidate.text = texts.remove(&candidate.joke_id);
            }
            if candidate.text.is_none() {
                tracing::warn!(joke_id = candidate.joke_id, "Dropping candidate with no joke text");
                return None;
            }
            Some(candidate)
        })
        .collect()
}

/// Highest final score wins; on a tie the earlier candidate is kept
///
/// Candidates without text are never chosen. Callers run [`attach_text`]
/// first so that case does not arise.
pub fn select_best(candidates: Vec<ScoredCandidate>) -> Option<Recommendation> {
    let mut best: Option<ScoredCandidate> = None;
    for candidate in candidates {
        let better = match &best {
            Some(current) => candidate.final_score > current.final_score,
            None => true,
        };
        if better {
            best = Some(candidate);
        }
    }

    best.and_then(|c| {
        c.text.map(|joke_text| Recommendation {
            joke_id: c.joke_id,
            joke_text,
            final_score: c.final_score,
            source: RecommendationSource::Fused,
        })
    })
}

/// Selection used when the oracle found no neighbors at all
///
/// Ranks on raw average similarity and reports that raw value as the final
/// score, not the 1..=5 scaled one.
pub fn select_by_similarity(items: &ItemPool, rated: &HashSet<JokeId>) -> Option<Recommendation> {
    let mut best: Option<(&ItemEvidence, f64)> = None;
    for evidence in items.iter().filter(|e| !rated.contains(&e.joke_id)) {
        let average = evidence.average_similarity();
        if best.map_or(true, |(_, top)| average > top) {
            best = Some((evidence, average));
        }
    }

    best.map(|(evidence, average)| Recommendation {
        joke_id: evidence.joke_id,
        joke_text: evidence.text.clone(),
        final_score: average,
        source: RecommendationSource::SimilarityOnly,
    })
}
