use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JokeId, UserId};

/// Length of the rolling history of recently rated jokes
pub const HISTORY_CAPACITY: usize = 5;

/// Per-user mutable state kept next to the rating facts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub user_id: UserId,
    /// Identity-provider id the session carries
    pub auth_id: Uuid,
    /// Most recent last, never longer than [`HISTORY_CAPACITY`]
    pub last5_joke_ids: Vec<JokeId>,
    /// Bumped by the store on every successful history write
    pub version: i64,
}

/// Outcome of a compare-and-swap history write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileUpdate {
    Applied,
    /// Another writer got there first; the stored version moved on
    Conflict,
}

impl Profile {
    pub fn new(user_id: UserId, auth_id: Uuid) -> Self {
        Self {
            user_id,
            auth_id,
            last5_joke_ids: Vec::new(),
            version: 0,
        }
    }

    /// Rolling history after rating `joke_id`, without touching `self`
    ///
    /// Appends at the back and evicts from the front (strict FIFO).
    pub fn history_after(&self, joke_id: JokeId) -> Vec<JokeId> {
        let mut history = self.last5_joke_ids.clone();
        history.push(joke_id);
        if history.len() > HISTORY_CAPACITY {
            let overflow = history.len() - HISTORY_CAPACITY;
            history.drain(..overflow);
        }
        history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_profile_is_empty() {
        let profile = Profile::new(7, Uuid::new_v4());
        assert!(profile.last5_joke_ids.is_empty());
        assert_eq!(profile.version, 0);
    }

    #[test]
    fn test_history_appends_most_recent_last() {
        let mut profile = Profile::new(1, Uuid::new_v4());
        profile.last5_joke_ids = vec![1, 2];
        assert_eq!(profile.history_after(3), vec![1, 2, 3]);
    }

    #[test]
    fn test_history_evicts_oldest_when_full() {
        let mut profile = Profile::new(1, Uuid::new_v4());
        profile.last5_joke_ids = vec![1, 2, 3, 4, 5];
        assert_eq!(profile.history_after(6), vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_six_ratings_keep_last_five() {
        let mut profile = Profile::new(1, Uuid::new_v4());
        for joke_id in 1..=6 {
            profile.last5_joke_ids = profile.history_after(joke_id);
            assert!(profile.last5_joke_ids.len() <= HISTORY_CAPACITY);
        }
        assert_eq!(profile.last5_joke_ids, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_oversized_stored_history_is_trimmed() {
        let mut profile = Profile::new(1, Uuid::new_v4());
        profile.last5_joke_ids = vec![1, 2, 3, 4, 5, 6, 7];
        assert_eq!(profile.history_after(8), vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_repeated_joke_is_not_deduplicated() {
        let mut profile = Profile::new(1, Uuid::new_v4());
        profile.last5_joke_ids = vec![4];
        assert_eq!(profile.history_after(4), vec![4, 4]);
    }
}
