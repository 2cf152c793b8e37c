//! Error types for the matchmaking core
//!
//! Every variant is an expected, user-facing condition the command layer is
//! meant to catch and render. Fallible APIs return the anyhow-based [`Result`]
//! alias; callers recover the typed error with `downcast_ref::<MatchmakingError>()`.

use crate::types::{BestOf, PlayerId};
use crate::veto::phase::{TeamNumber, VetoAction};

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Player {player_id} is already queued for {best_of}")]
    AlreadyQueued { player_id: PlayerId, best_of: BestOf },

    #[error("Player {player_id} is not in any queue")]
    NotQueued { player_id: PlayerId },

    #[error("Player {player_id} is not eligible: {reason}")]
    NotEligible { player_id: PlayerId, reason: String },

    #[error("Player {player_id} has already confirmed the ready check")]
    AlreadyReady { player_id: PlayerId },

    #[error("Invalid best-of value: {value}")]
    InvalidFormat { value: u8 },

    #[error("Veto for {best_of} is not implemented")]
    FormatNotImplemented { best_of: BestOf },

    #[error("Not enough players: need {required}, have {available}")]
    NotEnoughPlayers { required: usize, available: usize },

    #[error("Could not reach players: {}", player_ids.join(", "))]
    UserUnreachable { player_ids: Vec<PlayerId> },

    #[error("Invalid veto action: {reason}")]
    InvalidVetoAction { reason: VetoRejection },

    #[error("Unknown side '{value}', expected ATK or DEF")]
    InvalidSide { value: String },

    #[error("Match not found: {match_id}")]
    MatchNotFound { match_id: String },

    #[error("Invalid score: {reason}")]
    InvalidScore { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

/// Why a veto action was refused. Each reason carries enough context for a
/// captain to see whose turn it is and what the session expects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VetoRejection {
    #[error("veto is already complete")]
    VetoComplete,

    #[error("phase {order} expects team {team} to {expected}, not {attempted}")]
    WrongAction {
        order: u8,
        team: TeamNumber,
        expected: VetoAction,
        attempted: VetoAction,
    },

    #[error("map {map_id} is already banned")]
    MapBanned { map_id: String },

    #[error("map {map_id} is already picked")]
    MapAlreadyPicked { map_id: String },

    #[error("map {map_id} is not in the active pool")]
    UnknownMap { map_id: String },

    #[error("no map has been picked yet to choose a side for")]
    NoMapPicked,

    #[error("veto is still in progress at phase {order}")]
    VetoInProgress { order: u8 },
}

impl From<VetoRejection> for MatchmakingError {
    fn from(reason: VetoRejection) -> Self {
        MatchmakingError::InvalidVetoAction { reason }
    }
}

/// Extract the typed error from an anyhow error, if it is one of ours.
pub fn matchmaking_error(err: &anyhow::Error) -> Option<&MatchmakingError> {
    err.downcast_ref::<MatchmakingError>()
}
