//! Common types used throughout the matchmaking core

use crate::error::MatchmakingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Opaque external identifier of a player (e.g. a chat user id)
pub type PlayerId = String;

/// Unique identifier for formed matches
pub type MatchId = Uuid;

/// Opaque identifier of a map as handed out by the map catalog
pub type MapId = String;

/// Number of maps a match spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BestOf {
    One,
    Three,
    Five,
}

impl BestOf {
    /// All formats, in ascending order
    pub const ALL: [BestOf; 3] = [BestOf::One, BestOf::Three, BestOf::Five];

    /// Numeric best-of value
    pub fn value(self) -> u8 {
        match self {
            BestOf::One => 1,
            BestOf::Three => 3,
            BestOf::Five => 5,
        }
    }
}

impl TryFrom<u8> for BestOf {
    type Error = MatchmakingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BestOf::One),
            3 => Ok(BestOf::Three),
            5 => Ok(BestOf::Five),
            _ => Err(MatchmakingError::InvalidFormat { value }),
        }
    }
}

impl From<BestOf> for u8 {
    fn from(best_of: BestOf) -> Self {
        best_of.value()
    }
}

impl std::fmt::Display for BestOf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BO{}", self.value())
    }
}

/// Starting side chosen during a side-pick phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "ATK")]
    Attack,
    #[serde(rename = "DEF")]
    Defense,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Attack => write!(f, "ATK"),
            Side::Defense => write!(f, "DEF"),
        }
    }
}

impl FromStr for Side {
    type Err = MatchmakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ATK" | "ATTACK" => Ok(Side::Attack),
            "DEF" | "DEFENSE" => Ok(Side::Defense),
            _ => Err(MatchmakingError::InvalidSide {
                value: s.to_string(),
            }),
        }
    }
}

/// Typed message sent to a single player through the notifier.
///
/// The core never renders text; adapters decide how each variant reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// Confirm participation before the deadline
    ReadyCheck {
        best_of: BestOf,
        deadline: DateTime<Utc>,
    },
    /// Removed from the queue for not confirming in time
    RemovedNotReady { best_of: BestOf },
    /// A match was formed with this player in it
    MatchFormed {
        match_id: MatchId,
        best_of: BestOf,
        team: u8,
        captain: PlayerId,
        /// The map to play when the format has no veto
        map_id: Option<MapId>,
    },
}

/// Output of a successful ready check, handed to persistence and the veto
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormedMatch {
    pub match_id: MatchId,
    pub best_of: BestOf,
    pub team1: Vec<PlayerId>,
    pub team2: Vec<PlayerId>,
    pub captain1: PlayerId,
    pub captain2: PlayerId,
    /// Whether team 1 has first pick in the veto
    pub team1_first_pick: bool,
    /// Whether a veto session was opened for this match
    pub veto_opened: bool,
    /// Map drawn at creation for formats without a veto
    pub map_id: Option<MapId>,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle events emitted by the queue coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueEvent {
    ReadyCheckIssued {
        best_of: BestOf,
        generation: u64,
        members: Vec<PlayerId>,
        deadline: DateTime<Utc>,
    },
    PlayersEvicted {
        best_of: BestOf,
        player_ids: Vec<PlayerId>,
    },
    MatchFormed(FormedMatch),
}
