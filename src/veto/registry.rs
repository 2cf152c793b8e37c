//! Registry of open veto sessions
//!
//! Each match gets its own session behind its own mutex, so captains of
//! unrelated matches never wait on each other. The registry also enforces
//! that only the captain of the team whose turn it is may act.

use crate::error::{MatchmakingError, Result, VetoRejection};
use crate::format::FormatProvider;
use crate::maps::{GameMap, MapCatalog};
use crate::metrics::MetricsCollector;
use crate::types::{BestOf, MapId, MatchId, PlayerId, Side};
use crate::veto::machine::{VetoActionRecord, VetoOutcome, VetoStateMachine, VetoSummary};
use crate::veto::phase::{TeamNumber, VetoAction, VetoPhase};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Captains allowed to act in a veto. Team one holds first pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VetoCaptains {
    pub team_one: PlayerId,
    pub team_two: PlayerId,
}

impl VetoCaptains {
    pub fn new(team_one: impl Into<PlayerId>, team_two: impl Into<PlayerId>) -> Self {
        Self {
            team_one: team_one.into(),
            team_two: team_two.into(),
        }
    }

    pub fn captain_for(&self, team: TeamNumber) -> &PlayerId {
        match team {
            TeamNumber::One => &self.team_one,
            TeamNumber::Two => &self.team_two,
        }
    }

    /// Team captained by `player_id`, if any
    pub fn team_of(&self, player_id: &str) -> Option<TeamNumber> {
        if self.team_one == player_id {
            Some(TeamNumber::One)
        } else if self.team_two == player_id {
            Some(TeamNumber::Two)
        } else {
            None
        }
    }
}

struct VetoSession {
    machine: VetoStateMachine,
    captains: VetoCaptains,
}

type SharedSession = Arc<Mutex<VetoSession>>;

/// Shared map of match id to veto session
#[derive(Clone)]
pub struct VetoRegistry {
    sessions: Arc<RwLock<HashMap<MatchId, SharedSession>>>,
    format_provider: Arc<dyn FormatProvider>,
    map_catalog: Arc<dyn MapCatalog>,
    metrics_collector: Arc<MetricsCollector>,
}

impl VetoRegistry {
    pub fn new(
        format_provider: Arc<dyn FormatProvider>,
        map_catalog: Arc<dyn MapCatalog>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            format_provider,
            map_catalog,
            metrics_collector,
        }
    }

    pub fn map_catalog(&self) -> Arc<dyn MapCatalog> {
        self.map_catalog.clone()
    }

    /// Open a veto for a freshly formed match
    pub fn open(&self, match_id: MatchId, best_of: BestOf, captains: VetoCaptains) -> Result<()> {
        let config = self.format_provider.get_format_config(best_of)?;
        let machine = VetoStateMachine::from_config(match_id, &config)?;

        let active = {
            let mut sessions = self.sessions.write().map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire veto sessions lock".to_string(),
                }
            })?;

            if sessions.contains_key(&match_id) {
                return Err(MatchmakingError::InternalError {
                    message: format!("Veto for match {} is already open", match_id),
                }
                .into());
            }

            sessions.insert(
                match_id,
                Arc::new(Mutex::new(VetoSession { machine, captains })),
            );
            sessions.len()
        };

        self.metrics_collector.set_active_vetos(active);
        info!("Opened {} veto for match {}", best_of, match_id);
        Ok(())
    }

    fn session(&self, match_id: MatchId) -> Result<SharedSession> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire veto sessions lock".to_string(),
            })?;

        sessions.get(&match_id).cloned().ok_or_else(|| {
            MatchmakingError::MatchNotFound {
                match_id: match_id.to_string(),
            }
            .into()
        })
    }

    /// Run `f` with the session locked
    fn with_session<T>(
        &self,
        match_id: MatchId,
        f: impl FnOnce(&mut VetoSession) -> Result<T>,
    ) -> Result<T> {
        let session = self.session(match_id)?;
        let mut guard = session
            .lock()
            .map_err(|_| MatchmakingError::InternalError {
                message: format!("Failed to acquire veto lock for match {}", match_id),
            })?;
        f(&mut guard)
    }

    /// Resolve a map name or id against the active catalog
    fn resolve_map(&self, map: &str) -> std::result::Result<MapId, VetoRejection> {
        self.map_catalog
            .by_name(map)
            .filter(|found| self.map_catalog.active_maps().contains(found))
            .map(|found| found.id)
            .ok_or_else(|| VetoRejection::UnknownMap {
                map_id: map.to_string(),
            })
    }

    /// Check that `player_id` captains the team the current phase belongs to
    fn authorize(session: &VetoSession, player_id: &str) -> Result<VetoPhase> {
        let phase = session
            .machine
            .current_phase()
            .ok_or(MatchmakingError::from(VetoRejection::VetoComplete))?;

        if session.captains.captain_for(phase.team) == player_id {
            return Ok(phase);
        }

        let reason = match session.captains.team_of(player_id) {
            Some(_) => format!(
                "phase {} belongs to team {} ({})",
                phase.order, phase.team, phase.action
            ),
            None => "only team captains can act in the veto".to_string(),
        };

        Err(MatchmakingError::NotEligible {
            player_id: player_id.to_string(),
            reason,
        }
        .into())
    }

    fn act(
        &self,
        match_id: MatchId,
        player_id: &str,
        action: VetoAction,
        apply: impl FnOnce(
            &mut VetoStateMachine,
        ) -> std::result::Result<VetoActionRecord, VetoRejection>,
    ) -> Result<VetoActionRecord> {
        let result = self.with_session(match_id, |session| {
            Self::authorize(session, player_id)?;
            apply(&mut session.machine).map_err(|reason| MatchmakingError::from(reason).into())
        });

        match &result {
            Ok(record) => {
                self.metrics_collector.record_veto_action(action, true);
                debug!(
                    "Match {}: recorded phase {} by {}",
                    match_id, record.order, player_id
                );
            }
            Err(e) => {
                self.metrics_collector.record_veto_action(action, false);
                warn!("Match {}: {} by {} rejected: {}", match_id, action, player_id, e);
            }
        }

        result
    }

    /// Ban a map on behalf of `player_id`
    pub fn ban(&self, match_id: MatchId, player_id: &str, map: &str) -> Result<VetoActionRecord> {
        let map_id = self.resolve_map(map);
        self.act(match_id, player_id, VetoAction::Ban, |machine| {
            machine.ban_map(&map_id?)
        })
    }

    /// Pick a map on behalf of `player_id`
    pub fn pick(&self, match_id: MatchId, player_id: &str, map: &str) -> Result<VetoActionRecord> {
        let map_id = self.resolve_map(map);
        self.act(match_id, player_id, VetoAction::Pick, |machine| {
            machine.pick_map(&map_id?)
        })
    }

    /// Choose a side on the most recently picked map
    pub fn pick_side(
        &self,
        match_id: MatchId,
        player_id: &str,
        side: Side,
    ) -> Result<VetoActionRecord> {
        self.act(match_id, player_id, VetoAction::SidePick, |machine| {
            machine.pick_side(side)
        })
    }

    pub fn current_phase(&self, match_id: MatchId) -> Result<Option<VetoPhase>> {
        self.with_session(match_id, |session| Ok(session.machine.current_phase()))
    }

    pub fn summary(&self, match_id: MatchId) -> Result<VetoSummary> {
        self.with_session(match_id, |session| Ok(session.machine.summary()))
    }

    pub fn captains(&self, match_id: MatchId) -> Result<VetoCaptains> {
        self.with_session(match_id, |session| Ok(session.captains.clone()))
    }

    /// Active maps still open to ban or pick
    pub fn available_maps(&self, match_id: MatchId) -> Result<Vec<GameMap>> {
        let all_maps = self.map_catalog.active_maps();
        self.with_session(match_id, |session| {
            Ok(session
                .machine
                .available_maps(&all_maps)
                .into_iter()
                .cloned()
                .collect())
        })
    }

    /// Remove a completed session and return the maps to be played
    pub fn close(&self, match_id: MatchId) -> Result<VetoOutcome> {
        let all_maps = self.map_catalog.active_maps();
        let outcome = self.with_session(match_id, |session| {
            session.machine.outcome(&all_maps).ok_or_else(|| {
                MatchmakingError::from(VetoRejection::VetoInProgress {
                    order: session.machine.current_order(),
                })
                .into()
            })
        })?;

        self.remove(match_id)?;
        info!(
            "Closed veto for match {} ({} maps)",
            match_id,
            outcome.maps.len()
        );
        Ok(outcome)
    }

    /// Drop a session whatever its progress, e.g. when a match is cancelled
    pub fn discard(&self, match_id: MatchId) -> Result<bool> {
        let removed = self.remove(match_id)?;
        if removed {
            info!("Discarded veto for match {}", match_id);
        }
        Ok(removed)
    }

    fn remove(&self, match_id: MatchId) -> Result<bool> {
        let (removed, active) = {
            let mut sessions = self.sessions.write().map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire veto sessions lock".to_string(),
                }
            })?;
            let removed = sessions.remove(&match_id).is_some();
            (removed, sessions.len())
        };

        self.metrics_collector.set_active_vetos(active);
        Ok(removed)
    }

    /// Number of open sessions
    pub fn active_sessions(&self) -> Result<usize> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire veto sessions lock".to_string(),
            })?;
        Ok(sessions.len())
    }

    /// Ids of all open sessions
    pub fn match_ids(&self) -> Result<Vec<MatchId>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire veto sessions lock".to_string(),
            })?;
        Ok(sessions.keys().copied().collect())
    }
}
