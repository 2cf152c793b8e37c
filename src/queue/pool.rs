//! Per-format pool and ready-check batch state
//!
//! [`FormatQueue`] is plain synchronous state. The coordinator keeps one per
//! format behind a mutex and performs every mutation through these methods,
//! so the transitions below can be tested without a runtime.

use crate::error::{MatchmakingError, Result};
use crate::types::{BestOf, PlayerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::task::JoinHandle;
use tracing::debug;

/// The batch currently asked to confirm
#[derive(Debug)]
pub struct ReadyCheckBatch {
    pub generation: u64,
    /// Fixed at capture time, in join order
    pub members: Vec<PlayerId>,
    pub ready: HashSet<PlayerId>,
    /// Wall-clock estimate for display; the timer owns the actual expiry
    pub deadline: DateTime<Utc>,
    timer: Option<JoinHandle<()>>,
}

impl ReadyCheckBatch {
    pub fn is_member(&self, player_id: &str) -> bool {
        self.members.iter().any(|m| m == player_id)
    }

    /// Ready members in batch order
    pub fn ready_members(&self) -> Vec<PlayerId> {
        self.members
            .iter()
            .filter(|m| self.ready.contains(*m))
            .cloned()
            .collect()
    }
}

/// What a timer fire did to the format's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The fire belonged to a batch that is no longer active
    Stale,
    /// Every member confirmed; they have left the pool
    Success { members: Vec<PlayerId> },
    /// Unready members still in the pool were evicted
    Retry { evicted: Vec<PlayerId> },
}

/// Serializable view of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub generation: u64,
    pub members: Vec<PlayerId>,
    pub ready: Vec<PlayerId>,
    pub deadline: DateTime<Utc>,
}

/// Serializable view of one format's pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub best_of: BestOf,
    pub required_count: usize,
    pub players: Vec<PlayerId>,
    pub batch: Option<BatchSnapshot>,
}

/// Pool of waiting players plus the active batch for one format
#[derive(Debug)]
pub struct FormatQueue {
    best_of: BestOf,
    required_count: usize,
    pool: Vec<PlayerId>,
    batch: Option<ReadyCheckBatch>,
    next_generation: u64,
}

impl FormatQueue {
    pub fn new(best_of: BestOf, required_count: usize) -> Self {
        Self {
            best_of,
            required_count,
            pool: Vec::new(),
            batch: None,
            next_generation: 1,
        }
    }

    pub fn best_of(&self) -> BestOf {
        self.best_of
    }

    pub fn required_count(&self) -> usize {
        self.required_count
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn players(&self) -> &[PlayerId] {
        &self.pool
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.pool.iter().any(|p| p == player_id)
    }

    pub fn batch(&self) -> Option<&ReadyCheckBatch> {
        self.batch.as_ref()
    }

    /// Append a player, returning the new pool size
    pub fn push(&mut self, player_id: &str) -> Result<usize> {
        if self.contains(player_id) {
            return Err(MatchmakingError::AlreadyQueued {
                player_id: player_id.to_string(),
                best_of: self.best_of,
            }
            .into());
        }

        self.pool.push(player_id.to_string());
        Ok(self.pool.len())
    }

    /// Remove a player from the pool and drop their ready mark.
    ///
    /// Batch membership is left alone: a member who leaves stays unready.
    pub fn remove(&mut self, player_id: &str) -> bool {
        let before = self.pool.len();
        self.pool.retain(|p| p != player_id);

        if let Some(batch) = self.batch.as_mut() {
            batch.ready.remove(player_id);
        }

        self.pool.len() != before
    }

    /// A new batch is due when the pool is full and nothing is pending
    pub fn should_form(&self) -> bool {
        self.batch.is_none() && self.pool.len() >= self.required_count
    }

    /// Capture the last `required_count` players as a new batch
    pub fn form_batch(&mut self, deadline: DateTime<Utc>) -> Option<(u64, Vec<PlayerId>)> {
        if !self.should_form() {
            return None;
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let members = self.pool[self.pool.len() - self.required_count..].to_vec();
        debug!(
            "{}: captured batch {} with {} members",
            self.best_of,
            generation,
            members.len()
        );

        self.batch = Some(ReadyCheckBatch {
            generation,
            members: members.clone(),
            ready: HashSet::new(),
            deadline,
            timer: None,
        });

        Some((generation, members))
    }

    /// Attach the timeout task to the batch it was spawned for
    pub fn attach_timer(&mut self, generation: u64, timer: JoinHandle<()>) {
        match self.batch.as_mut() {
            Some(batch) if batch.generation == generation => batch.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Confirm a member of the active batch, returning the ready count
    pub fn mark_ready(&mut self, player_id: &str) -> Result<usize> {
        let in_pool = self.contains(player_id);
        let batch = match self.batch.as_mut() {
            Some(batch) if in_pool && batch.is_member(player_id) => batch,
            Some(_) => {
                return Err(MatchmakingError::NotEligible {
                    player_id: player_id.to_string(),
                    reason: "not part of the current ready check".to_string(),
                }
                .into())
            }
            None => {
                return Err(MatchmakingError::NotEligible {
                    player_id: player_id.to_string(),
                    reason: format!("no ready check is running for {}", self.best_of),
                }
                .into())
            }
        };

        if !batch.ready.insert(player_id.to_string()) {
            return Err(MatchmakingError::AlreadyReady {
                player_id: player_id.to_string(),
            }
            .into());
        }

        Ok(batch.ready.len())
    }

    /// Settle the batch with `generation` after its deadline.
    ///
    /// Members are removed by id, so players who joined after capture keep
    /// their place in the pool.
    pub fn resolve(&mut self, generation: u64) -> Resolution {
        let batch = match self.batch.take() {
            Some(batch) if batch.generation == generation => batch,
            other => {
                self.batch = other;
                return Resolution::Stale;
            }
        };

        let all_ready = batch.members.iter().all(|m| batch.ready.contains(m));
        if all_ready {
            self.pool.retain(|p| !batch.members.contains(p));
            return Resolution::Success {
                members: batch.members,
            };
        }

        let evicted: Vec<PlayerId> = batch
            .members
            .iter()
            .filter(|m| !batch.ready.contains(*m) && self.pool.contains(*m))
            .cloned()
            .collect();
        self.pool.retain(|p| !evicted.contains(p));

        Resolution::Retry { evicted }
    }

    /// Abort the pending timer and forget the batch
    pub fn cancel_batch(&mut self) -> bool {
        match self.batch.take() {
            Some(batch) => {
                if let Some(timer) = batch.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            best_of: self.best_of,
            required_count: self.required_count,
            players: self.pool.clone(),
            batch: self.batch.as_ref().map(|batch| BatchSnapshot {
                generation: batch.generation,
                members: batch.members.clone(),
                ready: batch.ready_members(),
                deadline: batch.deadline,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::matchmaking_error;
    use proptest::prelude::*;

    fn filled(required: usize, count: usize) -> FormatQueue {
        let mut queue = FormatQueue::new(BestOf::One, required);
        for i in 1..=count {
            queue.push(&format!("P{}", i)).unwrap();
        }
        queue
    }

    #[test]
    fn test_push_rejects_duplicates() {
        let mut queue = filled(4, 2);
        let err = queue.push("P1").unwrap_err();
        assert!(matches!(
            matchmaking_error(&err),
            Some(MatchmakingError::AlreadyQueued { .. })
        ));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_batch_forms_at_threshold_in_join_order() {
        let mut queue = filled(4, 3);
        assert!(!queue.should_form());
        assert!(queue.form_batch(Utc::now()).is_none());

        queue.push("P4").unwrap();
        let (generation, members) = queue.form_batch(Utc::now()).unwrap();
        assert_eq!(generation, 1);
        assert_eq!(members, vec!["P1", "P2", "P3", "P4"]);

        // only one batch at a time
        queue.push("P5").unwrap();
        assert!(!queue.should_form());
    }

    #[test]
    fn test_mark_ready_rules() {
        let mut queue = filled(2, 2);
        let err = queue.mark_ready("P1").unwrap_err();
        assert!(matches!(
            matchmaking_error(&err),
            Some(MatchmakingError::NotEligible { .. })
        ));

        queue.form_batch(Utc::now()).unwrap();
        queue.push("P3").unwrap();

        assert_eq!(queue.mark_ready("P1").unwrap(), 1);
        let err = queue.mark_ready("P1").unwrap_err();
        assert!(matches!(
            matchmaking_error(&err),
            Some(MatchmakingError::AlreadyReady { .. })
        ));

        // joined after capture
        assert!(queue.mark_ready("P3").is_err());
        assert_eq!(queue.mark_ready("P2").unwrap(), 2);
    }

    #[test]
    fn test_leaving_member_loses_ready_mark() {
        let mut queue = filled(2, 2);
        queue.form_batch(Utc::now()).unwrap();
        queue.mark_ready("P1").unwrap();
        queue.mark_ready("P2").unwrap();

        assert!(queue.remove("P2"));
        assert!(!queue.remove("P2"));
        assert_eq!(queue.batch().unwrap().ready.len(), 1);
        assert!(queue.mark_ready("P2").is_err());

        assert_eq!(
            queue.resolve(1),
            Resolution::Retry { evicted: vec![] }
        );
        assert_eq!(queue.players(), &["P1".to_string()]);
    }

    #[test]
    fn test_success_removes_members_only() {
        let mut queue = filled(2, 2);
        queue.form_batch(Utc::now()).unwrap();
        queue.push("P3").unwrap();
        queue.mark_ready("P1").unwrap();
        queue.mark_ready("P2").unwrap();

        assert_eq!(
            queue.resolve(1),
            Resolution::Success {
                members: vec!["P1".to_string(), "P2".to_string()]
            }
        );
        assert_eq!(queue.players(), &["P3".to_string()]);
        assert!(queue.batch().is_none());
    }

    #[test]
    fn test_retry_evicts_unready_and_clears_ready_set() {
        let mut queue = filled(10, 10);
        queue.form_batch(Utc::now()).unwrap();
        for i in 1..=9 {
            queue.mark_ready(&format!("P{}", i)).unwrap();
        }

        assert_eq!(
            queue.resolve(1),
            Resolution::Retry {
                evicted: vec!["P10".to_string()]
            }
        );
        assert_eq!(queue.len(), 9);
        assert!(queue.batch().is_none());
        assert!(!queue.should_form());
    }

    #[test]
    fn test_retry_reforms_from_new_tail() {
        let mut queue = filled(2, 3);
        // batch is P2, P3
        queue.form_batch(Utc::now()).unwrap();
        queue.push("P4").unwrap();
        queue.mark_ready("P2").unwrap();

        assert_eq!(
            queue.resolve(1),
            Resolution::Retry {
                evicted: vec!["P3".to_string()]
            }
        );
        assert!(queue.should_form());
        let (generation, members) = queue.form_batch(Utc::now()).unwrap();
        assert_eq!(generation, 2);
        assert_eq!(members, vec!["P2", "P4"]);
    }

    #[test]
    fn test_stale_generation_is_noop() {
        let mut queue = filled(2, 2);
        queue.form_batch(Utc::now()).unwrap();

        assert_eq!(queue.resolve(7), Resolution::Stale);
        assert!(queue.batch().is_some());

        queue.resolve(1);
        assert_eq!(queue.resolve(1), Resolution::Stale);
    }

    #[test]
    fn test_snapshot_lists_ready_in_batch_order() {
        let mut queue = filled(3, 3);
        queue.form_batch(Utc::now()).unwrap();
        queue.mark_ready("P3").unwrap();
        queue.mark_ready("P1").unwrap();

        let snapshot = queue.snapshot();
        let batch = snapshot.batch.unwrap();
        assert_eq!(batch.ready, vec!["P1", "P3"]);
        assert_eq!(snapshot.players.len(), 3);
    }

    #[test]
    fn test_cancel_batch() {
        let mut queue = filled(2, 2);
        assert!(!queue.cancel_batch());
        queue.form_batch(Utc::now()).unwrap();
        assert!(queue.cancel_batch());
        assert!(queue.batch().is_none());
    }

    proptest! {
        #[test]
        fn prop_pool_never_holds_duplicates(ops in proptest::collection::vec((0u8..3, 0usize..8), 1..80)) {
            let mut queue = FormatQueue::new(BestOf::Three, 4);
            let mut generation = 0u64;

            for (op, idx) in ops {
                let player = format!("P{}", idx);
                match op {
                    0 => {
                        let _ = queue.push(&player);
                        if let Some((g, _)) = queue.form_batch(Utc::now()) {
                            generation = g;
                        }
                    }
                    1 => {
                        queue.remove(&player);
                    }
                    _ => {
                        let _ = queue.mark_ready(&player);
                        if idx % 3 == 0 {
                            queue.resolve(generation);
                        }
                    }
                }

                let unique: HashSet<_> = queue.players().iter().collect();
                prop_assert_eq!(unique.len(), queue.len());

                if let Some(batch) = queue.batch() {
                    prop_assert!(batch.ready.len() <= batch.members.len());
                    prop_assert_eq!(batch.members.len(), 4);
                }
            }
        }
    }
}
