//! Two-captain score confirmation
//!
//! A match result is accepted only when both captains submit the same score
//! within the confirmation window. The first submission stays pending until
//! the window runs out, the same captain replaces it, or the other captain
//! answers.

use crate::error::{MatchmakingError, Result};
use crate::types::{MatchId, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default time the other captain has to confirm
pub const DEFAULT_SCORE_WINDOW: Duration = Duration::from_secs(30);

/// Rounds won by each team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub team1: u8,
    pub team2: u8,
}

impl FromStr for Score {
    type Err = MatchmakingError;

    /// Accepts `13-9` or `13:9`, one or two digits per side
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || MatchmakingError::InvalidScore {
            reason: format!("'{}' is not a score like 13-9", s.trim()),
        };

        let (left, right) = s.split_once(|c: char| c == '-' || c == ':').ok_or_else(invalid)?;
        let parse_side = |part: &str| -> std::result::Result<u8, MatchmakingError> {
            let part = part.trim();
            if part.is_empty() || part.len() > 2 || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };

        Ok(Score {
            team1: parse_side(left)?,
            team2: parse_side(right)?,
        })
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.team1, self.team2)
    }
}

/// Result of one captain's submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreSubmission {
    /// First submission, waiting for the other captain
    Pending { score: Score },
    /// The same captain replaced their pending score; the window restarted
    Updated { score: Score },
    /// Both captains agree
    Confirmed { score: Score },
    /// The other captain disagreed; their score is now the pending one
    Mismatch { previous: Score, score: Score },
}

struct PendingScore {
    by: PlayerId,
    score: Score,
    generation: u64,
    expiry: JoinHandle<()>,
}

struct LedgerState {
    pending: HashMap<MatchId, PendingScore>,
    next_generation: u64,
}

/// Pending score submissions keyed by match
#[derive(Clone)]
pub struct ScoreLedger {
    state: Arc<Mutex<LedgerState>>,
    window: Duration,
}

impl ScoreLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                pending: HashMap::new(),
                next_generation: 1,
            })),
            window,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire score ledger lock".to_string(),
            }
            .into()
        })
    }

    /// Submit `raw` for `match_id` on behalf of `player_id`.
    ///
    /// `captains` are the two players allowed to report the result.
    pub fn submit(
        &self,
        match_id: MatchId,
        player_id: &str,
        captains: [&str; 2],
        raw: &str,
    ) -> Result<ScoreSubmission> {
        if !captains.contains(&player_id) {
            return Err(MatchmakingError::NotEligible {
                player_id: player_id.to_string(),
                reason: "only captains can submit the score".to_string(),
            }
            .into());
        }

        let score: Score = raw.parse()?;
        let mut state = self.lock()?;

        let outcome = match state.pending.remove(&match_id) {
            None => ScoreSubmission::Pending { score },
            Some(existing) => {
                existing.expiry.abort();
                if existing.by == player_id {
                    ScoreSubmission::Updated { score }
                } else if existing.score == score {
                    info!("Match {}: score {} confirmed", match_id, score);
                    return Ok(ScoreSubmission::Confirmed { score });
                } else {
                    ScoreSubmission::Mismatch {
                        previous: existing.score,
                        score,
                    }
                }
            }
        };

        let generation = state.next_generation;
        state.next_generation += 1;
        let expiry = self.spawn_expiry(match_id, generation);
        state.pending.insert(
            match_id,
            PendingScore {
                by: player_id.to_string(),
                score,
                generation,
                expiry,
            },
        );

        debug!(
            "Match {}: {} submitted {} ({:?})",
            match_id, player_id, score, outcome
        );
        Ok(outcome)
    }

    fn spawn_expiry(&self, match_id: MatchId, generation: u64) -> JoinHandle<()> {
        let state = self.state.clone();
        let window = self.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Ok(mut state) = state.lock() {
                let current = state.pending.get(&match_id).map(|p| p.generation);
                if current == Some(generation) {
                    state.pending.remove(&match_id);
                    info!("Pending score for match {} expired", match_id);
                }
            }
        })
    }

    /// The pending submission for a match, if any
    pub fn pending(&self, match_id: MatchId) -> Result<Option<(PlayerId, Score)>> {
        Ok(self
            .lock()?
            .pending
            .get(&match_id)
            .map(|p| (p.by.clone(), p.score)))
    }

    /// Drop every pending submission and its timer
    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock()?;
        for (_, pending) in state.pending.drain() {
            pending.expiry.abort();
        }
        Ok(())
    }
}

impl Default for ScoreLedger {
    fn default() -> Self {
        Self::new(DEFAULT_SCORE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::matchmaking_error;
    use uuid::Uuid;

    const CAPTAINS: [&str; 2] = ["cap1", "cap2"];

    #[test]
    fn test_score_parsing() {
        assert_eq!(
            "13-9".parse::<Score>().unwrap(),
            Score { team1: 13, team2: 9 }
        );
        assert_eq!(
            " 7 : 13 ".parse::<Score>().unwrap(),
            Score { team1: 7, team2: 13 }
        );
        assert!("130-9".parse::<Score>().is_err());
        assert!("13 9".parse::<Score>().is_err());
        assert!("a-b".parse::<Score>().is_err());
        assert!("-9".parse::<Score>().is_err());
        assert_eq!(Score { team1: 13, team2: 11 }.to_string(), "13-11");
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_scores_confirm() {
        let ledger = ScoreLedger::default();
        let match_id = Uuid::new_v4();

        assert_eq!(
            ledger.submit(match_id, "cap1", CAPTAINS, "13-9").unwrap(),
            ScoreSubmission::Pending {
                score: Score { team1: 13, team2: 9 }
            }
        );
        assert!(matches!(
            ledger.submit(match_id, "cap2", CAPTAINS, "13:9").unwrap(),
            ScoreSubmission::Confirmed { .. }
        ));
        assert!(ledger.pending(match_id).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_captain_overwrites() {
        let ledger = ScoreLedger::default();
        let match_id = Uuid::new_v4();

        ledger.submit(match_id, "cap1", CAPTAINS, "13-9").unwrap();
        assert!(matches!(
            ledger.submit(match_id, "cap1", CAPTAINS, "13-10").unwrap(),
            ScoreSubmission::Updated { .. }
        ));
        assert_eq!(
            ledger.pending(match_id).unwrap(),
            Some(("cap1".to_string(), Score { team1: 13, team2: 10 }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatch_replaces_pending() {
        let ledger = ScoreLedger::default();
        let match_id = Uuid::new_v4();

        ledger.submit(match_id, "cap1", CAPTAINS, "13-9").unwrap();
        let result = ledger.submit(match_id, "cap2", CAPTAINS, "9-13").unwrap();
        assert_eq!(
            result,
            ScoreSubmission::Mismatch {
                previous: Score { team1: 13, team2: 9 },
                score: Score { team1: 9, team2: 13 },
            }
        );
        assert_eq!(ledger.pending(match_id).unwrap().unwrap().0, "cap2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_expires_after_window() {
        let ledger = ScoreLedger::default();
        let match_id = Uuid::new_v4();

        ledger.submit(match_id, "cap1", CAPTAINS, "13-9").unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        // resubmitting restarts the window
        ledger.submit(match_id, "cap1", CAPTAINS, "13-9").unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(ledger.pending(match_id).unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(ledger.pending(match_id).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_captain_rejected() {
        let ledger = ScoreLedger::default();
        let err = ledger
            .submit(Uuid::new_v4(), "fan", CAPTAINS, "13-9")
            .unwrap_err();
        assert!(matches!(
            matchmaking_error(&err),
            Some(MatchmakingError::NotEligible { .. })
        ));

        let err = ledger
            .submit(Uuid::new_v4(), "cap1", CAPTAINS, "thirteen")
            .unwrap_err();
        assert!(matches!(
            matchmaking_error(&err),
            Some(MatchmakingError::InvalidScore { .. })
        ));
    }
}
