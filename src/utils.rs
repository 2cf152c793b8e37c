//! Utility functions for the scrim-room service

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique match ID
pub fn generate_match_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Short form of a match id for chat output
pub fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
