//! Per-match veto state machine
//!
//! Holds the progress of one match through its format's phase sequence and
//! enforces that exactly one valid action (ban, pick or side pick) is
//! accepted at a time, attributed to the team whose turn it is. All methods
//! are synchronous and touch only in-memory state; persisting an accepted
//! action is the caller's job.

use crate::error::{MatchmakingError, Result, VetoRejection};
use crate::format::FormatConfiguration;
use crate::maps::GameMap;
use crate::types::{BestOf, MapId, MatchId, Side};
use crate::veto::phase::{default_sequence, TeamNumber, VetoAction, VetoPhase};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// A map picked during the veto
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapPick {
    pub team: TeamNumber,
    pub map_id: MapId,
    pub order: u8,
}

/// An accepted veto action, ready to be persisted by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VetoActionRecord {
    pub match_id: MatchId,
    pub order: u8,
    pub team: TeamNumber,
    pub action: VetoAction,
    pub map_id: MapId,
    /// Present for side picks
    pub side: Option<Side>,
}

/// Serializable snapshot of a session's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VetoSummary {
    pub match_id: MatchId,
    pub best_of: BestOf,
    pub is_complete: bool,
    pub current_order: u8,
    pub current_phase: Option<VetoPhase>,
    pub banned_maps: Vec<MapId>,
    pub picked_maps: Vec<MapPick>,
    pub side_picks: Vec<(MapId, Side)>,
}

/// A map that will be played, in play order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedMap {
    pub map_id: MapId,
    pub picked_by: Option<TeamNumber>,
    /// Side chosen by the team that did not pick; `None` for the decider
    pub side: Option<Side>,
}

/// Final result of a completed veto
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VetoOutcome {
    pub match_id: MatchId,
    pub maps: Vec<PlayedMap>,
}

/// Mutable veto progress for one match
#[derive(Debug, Clone)]
pub struct VetoStateMachine {
    match_id: MatchId,
    best_of: BestOf,
    sequence: &'static [VetoPhase],
    /// 1-based pointer into `sequence`
    current_order: u8,
    banned_maps: HashSet<MapId>,
    /// Insertion order kept for stable summaries
    ban_order: Vec<MapId>,
    picked_maps: Vec<MapPick>,
    side_picks: HashMap<MapId, Side>,
}

impl VetoStateMachine {
    /// Start a veto with the built-in sequence for `best_of`
    pub fn new(match_id: MatchId, best_of: BestOf) -> Result<Self> {
        let sequence = default_sequence(best_of)
            .ok_or(MatchmakingError::FormatNotImplemented { best_of })?;
        Ok(Self::with_sequence(match_id, best_of, sequence))
    }

    /// Start a veto with the sequence a format configuration carries
    pub fn from_config(match_id: MatchId, config: &FormatConfiguration) -> Result<Self> {
        let sequence = config
            .veto_sequence
            .ok_or(MatchmakingError::FormatNotImplemented {
                best_of: config.best_of,
            })?;
        Ok(Self::with_sequence(match_id, config.best_of, sequence))
    }

    fn with_sequence(match_id: MatchId, best_of: BestOf, sequence: &'static [VetoPhase]) -> Self {
        debug!(
            "Opening {} veto for match {} ({} phases)",
            best_of,
            match_id,
            sequence.len()
        );

        Self {
            match_id,
            best_of,
            sequence,
            current_order: 1,
            banned_maps: HashSet::new(),
            ban_order: Vec::new(),
            picked_maps: Vec::new(),
            side_picks: HashMap::new(),
        }
    }

    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    pub fn best_of(&self) -> BestOf {
        self.best_of
    }

    pub fn current_order(&self) -> u8 {
        self.current_order
    }

    /// The phase awaiting an action, `None` once the veto is complete
    pub fn current_phase(&self) -> Option<VetoPhase> {
        self.sequence.get(self.current_order as usize - 1).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.current_order as usize > self.sequence.len()
    }

    /// Validate that the current phase expects `attempted`
    fn expect_phase(&self, attempted: VetoAction) -> std::result::Result<VetoPhase, VetoRejection> {
        let phase = self.current_phase().ok_or(VetoRejection::VetoComplete)?;

        if phase.action != attempted {
            return Err(VetoRejection::WrongAction {
                order: phase.order,
                team: phase.team,
                expected: phase.action,
                attempted,
            });
        }

        Ok(phase)
    }

    fn is_picked(&self, map_id: &str) -> bool {
        self.picked_maps.iter().any(|p| p.map_id == map_id)
    }

    fn advance(&mut self) {
        self.current_order += 1;
        if self.is_complete() {
            info!("Match {}: veto complete", self.match_id);
        }
    }

    /// Ban `map_id` for the team whose turn it is
    pub fn ban_map(&mut self, map_id: &str) -> std::result::Result<VetoActionRecord, VetoRejection> {
        let phase = self.expect_phase(VetoAction::Ban)?;

        if self.banned_maps.contains(map_id) {
            return Err(VetoRejection::MapBanned {
                map_id: map_id.to_string(),
            });
        }
        if self.is_picked(map_id) {
            return Err(VetoRejection::MapAlreadyPicked {
                map_id: map_id.to_string(),
            });
        }

        self.banned_maps.insert(map_id.to_string());
        self.ban_order.push(map_id.to_string());
        self.advance();

        info!(
            "Match {}: team {} banned map {}",
            self.match_id, phase.team, map_id
        );

        Ok(self.record(phase, map_id, None))
    }

    /// Pick `map_id` for the team whose turn it is
    pub fn pick_map(&mut self, map_id: &str) -> std::result::Result<VetoActionRecord, VetoRejection> {
        let phase = self.expect_phase(VetoAction::Pick)?;

        if self.banned_maps.contains(map_id) {
            return Err(VetoRejection::MapBanned {
                map_id: map_id.to_string(),
            });
        }
        if self.is_picked(map_id) {
            return Err(VetoRejection::MapAlreadyPicked {
                map_id: map_id.to_string(),
            });
        }

        self.picked_maps.push(MapPick {
            team: phase.team,
            map_id: map_id.to_string(),
            order: phase.order,
        });
        self.advance();

        info!(
            "Match {}: team {} picked map {}",
            self.match_id, phase.team, map_id
        );

        Ok(self.record(phase, map_id, None))
    }

    /// Choose the starting side on the most recently picked map.
    ///
    /// The order pointer advances on success, so a second side pick for the
    /// same map can never be accepted.
    pub fn pick_side(&mut self, side: Side) -> std::result::Result<VetoActionRecord, VetoRejection> {
        let phase = self.expect_phase(VetoAction::SidePick)?;

        let map_id = self
            .picked_maps
            .last()
            .map(|p| p.map_id.clone())
            .ok_or(VetoRejection::NoMapPicked)?;

        self.side_picks.insert(map_id.clone(), side);
        self.advance();

        info!(
            "Match {}: team {} chose {} on map {}",
            self.match_id, phase.team, side, map_id
        );

        Ok(self.record(phase, &map_id, Some(side)))
    }

    fn record(&self, phase: VetoPhase, map_id: &str, side: Option<Side>) -> VetoActionRecord {
        VetoActionRecord {
            match_id: self.match_id,
            order: phase.order,
            team: phase.team,
            action: phase.action,
            map_id: map_id.to_string(),
            side,
        }
    }

    /// Maps from `all_maps` that are neither banned nor picked
    pub fn available_maps<'a>(&self, all_maps: &'a [GameMap]) -> Vec<&'a GameMap> {
        all_maps
            .iter()
            .filter(|m| !self.banned_maps.contains(&m.id) && !self.is_picked(&m.id))
            .collect()
    }

    /// The single map left once the veto is complete.
    ///
    /// Returns `None` before completion or when zero or several maps remain.
    pub fn decider<'a>(&self, all_maps: &'a [GameMap]) -> Option<&'a GameMap> {
        if !self.is_complete() {
            debug!("Match {}: decider requested before completion", self.match_id);
            return None;
        }

        match self.available_maps(all_maps).as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Picked maps with their sides, followed by the decider if one exists
    pub fn outcome(&self, all_maps: &[GameMap]) -> Option<VetoOutcome> {
        if !self.is_complete() {
            return None;
        }

        let mut maps: Vec<PlayedMap> = self
            .picked_maps
            .iter()
            .map(|pick| PlayedMap {
                map_id: pick.map_id.clone(),
                picked_by: Some(pick.team),
                side: self.side_picks.get(&pick.map_id).copied(),
            })
            .collect();

        if let Some(decider) = self.decider(all_maps) {
            maps.push(PlayedMap {
                map_id: decider.id.clone(),
                picked_by: None,
                side: None,
            });
        }

        Some(VetoOutcome {
            match_id: self.match_id,
            maps,
        })
    }

    pub fn banned_maps(&self) -> &[MapId] {
        &self.ban_order
    }

    pub fn picked_maps(&self) -> &[MapPick] {
        &self.picked_maps
    }

    pub fn side_for(&self, map_id: &str) -> Option<Side> {
        self.side_picks.get(map_id).copied()
    }

    pub fn summary(&self) -> VetoSummary {
        let side_picks = self
            .picked_maps
            .iter()
            .filter_map(|p| {
                self.side_picks
                    .get(&p.map_id)
                    .map(|side| (p.map_id.clone(), *side))
            })
            .collect();

        VetoSummary {
            match_id: self.match_id,
            best_of: self.best_of,
            is_complete: self.is_complete(),
            current_order: self.current_order,
            current_phase: self.current_phase(),
            banned_maps: self.ban_order.clone(),
            picked_maps: self.picked_maps.clone(),
            side_picks,
        }
    }
}
