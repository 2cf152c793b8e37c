//! Match assembly: turning a confirmed batch into two teams
//!
//! The coordinator hands every fully-ready batch to a [`MatchAssembler`].
//! Balancing quality is not a concern here; the default assembler shuffles.

use crate::error::{MatchmakingError, Result};
use crate::types::PlayerId;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Two teams with their captains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledMatch {
    pub team1: Vec<PlayerId>,
    pub team2: Vec<PlayerId>,
    pub captain1: PlayerId,
    pub captain2: PlayerId,
    /// Whether team 1 bans and picks first in the veto
    pub team1_first_pick: bool,
}

impl AssembledMatch {
    /// Captain of the team holding first pick, then the other captain
    pub fn captains_by_pick_order(&self) -> (&PlayerId, &PlayerId) {
        if self.team1_first_pick {
            (&self.captain1, &self.captain2)
        } else {
            (&self.captain2, &self.captain1)
        }
    }
}

/// Trait for splitting a batch of players into a match
pub trait MatchAssembler: Send + Sync {
    fn assemble(&self, players: &[PlayerId]) -> Result<AssembledMatch>;
}

fn ensure_enough(players: &[PlayerId]) -> Result<()> {
    if players.len() < 2 {
        return Err(MatchmakingError::NotEnoughPlayers {
            required: 2,
            available: players.len(),
        }
        .into());
    }
    Ok(())
}

/// Uniformly random teams, captains and first pick
#[derive(Debug, Default, Clone)]
pub struct RandomMatchAssembler;

impl RandomMatchAssembler {
    pub fn new() -> Self {
        Self
    }
}

impl MatchAssembler for RandomMatchAssembler {
    fn assemble(&self, players: &[PlayerId]) -> Result<AssembledMatch> {
        ensure_enough(players)?;

        let mut rng = rand::thread_rng();
        let mut shuffled = players.to_vec();
        shuffled.shuffle(&mut rng);

        let team2 = shuffled.split_off(shuffled.len() / 2);
        let team1 = shuffled;

        // both halves are non-empty after ensure_enough
        let captain1 = team1.choose(&mut rng).cloned().unwrap_or_default();
        let captain2 = team2.choose(&mut rng).cloned().unwrap_or_default();
        let team1_first_pick = rng.gen_bool(0.5);

        debug!(
            "Assembled {}v{}: captains {} and {}, team {} picks first",
            team1.len(),
            team2.len(),
            captain1,
            captain2,
            if team1_first_pick { 1 } else { 2 }
        );

        Ok(AssembledMatch {
            team1,
            team2,
            captain1,
            captain2,
            team1_first_pick,
        })
    }
}

/// Deterministic assembler: first half is team 1, the first player of each
/// half captains it and team 1 picks first
#[derive(Debug, Default, Clone)]
pub struct SequentialMatchAssembler;

impl SequentialMatchAssembler {
    pub fn new() -> Self {
        Self
    }
}

impl MatchAssembler for SequentialMatchAssembler {
    fn assemble(&self, players: &[PlayerId]) -> Result<AssembledMatch> {
        ensure_enough(players)?;

        let (team1, team2) = players.split_at(players.len() / 2);

        Ok(AssembledMatch {
            captain1: team1[0].clone(),
            captain2: team2[0].clone(),
            team1: team1.to_vec(),
            team2: team2.to_vec(),
            team1_first_pick: true,
        })
    }
}
