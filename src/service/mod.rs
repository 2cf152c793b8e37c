//! Service layer for the scrim-room service
//!
//! Application state, background tasks and health reporting for the
//! long-running binary.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthStatus};
