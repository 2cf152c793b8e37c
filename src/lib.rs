//! Scrim Room - queue, ready-check and map veto core for scrim matchmaking
//!
//! Players join a per-format pool; a full pool gets a time-boxed ready check,
//! and a confirmed batch becomes a match whose captains negotiate maps and
//! sides through a fixed ban/pick sequence.

pub mod config;
pub mod error;
pub mod format;
pub mod maps;
pub mod metrics;
pub mod notify;
pub mod queue;
pub mod score;
pub mod service;
pub mod types;
pub mod utils;
pub mod veto;

// Re-export commonly used types and traits
pub use error::{matchmaking_error, MatchmakingError, Result, VetoRejection};
pub use types::*;

// Re-export key components
pub use format::{FormatConfiguration, FormatProvider, StaticFormatProvider};
pub use maps::{GameMap, MapCatalog, StaticMapCatalog};
pub use notify::{ChannelNotifier, LogNotifier, MockNotifier, Notifier};
pub use queue::{MatchAssembler, QueueCoordinator, RandomMatchAssembler};
pub use score::{Score, ScoreLedger, ScoreSubmission};
pub use veto::{VetoCaptains, VetoRegistry, VetoStateMachine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
