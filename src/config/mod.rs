//! Configuration management for the scrim-room service
//!
//! Loads settings from environment variables or a TOML file, validates
//! them and builds the format table and map catalog they describe.

pub mod app;

pub use app::{validate_config, AppConfig, QueueSettings, ServiceSettings, VetoSettings};
