//! Main application configuration
//!
//! Defines the configuration for the scrim-room service, loaded from
//! environment variables or a TOML file, with validation.

use crate::format::{StaticFormatProvider, DEFAULT_REQUIRED_COUNT};
use crate::maps::{title_case, GameMap, StaticMapCatalog, DEFAULT_MAP_POOL};
use crate::queue::{CoordinatorSettings, UnreachablePolicy};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub queue: QueueSettings,
    pub veto: VetoSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Serve the health and metrics endpoints
    pub metrics_enabled: bool,
    /// Port for the health and metrics endpoints
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Queue and ready-check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Players a ready check needs, shared by all formats
    pub required_count: usize,
    /// Seconds players get to confirm a ready check
    pub ready_timeout_seconds: u64,
    /// What to do with players whose ready-check prompt bounces
    pub unreachable_policy: UnreachablePolicy,
    /// Seconds the second captain has to confirm a score
    pub score_window_seconds: u64,
}

/// Map pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VetoSettings {
    /// Map ids in the catalog
    pub map_pool: Vec<String>,
    /// Map ids kept in the catalog but out of rotation
    pub disabled_maps: Vec<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "scrim-room".to_string(),
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            required_count: DEFAULT_REQUIRED_COUNT,
            ready_timeout_seconds: 30,
            unreachable_policy: UnreachablePolicy::EvictAtTimeout,
            score_window_seconds: 30,
        }
    }
}

impl Default for VetoSettings {
    fn default() -> Self {
        Self {
            map_pool: DEFAULT_MAP_POOL.iter().map(|m| m.to_string()).collect(),
            disabled_maps: Vec::new(),
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_uppercase())
        .filter(|item| !item.is_empty())
        .collect()
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config = Self::from_toml(&raw)?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Invalid TOML configuration")
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(enabled) = env::var("METRICS_ENABLED") {
            self.service.metrics_enabled = enabled
                .parse()
                .map_err(|_| anyhow!("Invalid METRICS_ENABLED value: {}", enabled))?;
        }
        if let Ok(port) = env::var("METRICS_PORT") {
            self.service.metrics_port = port
                .parse()
                .map_err(|_| anyhow!("Invalid METRICS_PORT value: {}", port))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Queue settings
        if let Ok(count) = env::var("REQUIRED_PLAYER_COUNT") {
            self.queue.required_count = count
                .parse()
                .map_err(|_| anyhow!("Invalid REQUIRED_PLAYER_COUNT value: {}", count))?;
        }
        if let Ok(timeout) = env::var("READY_TIMEOUT_SECONDS") {
            self.queue.ready_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid READY_TIMEOUT_SECONDS value: {}", timeout))?;
        }
        if let Ok(policy) = env::var("UNREACHABLE_POLICY") {
            self.queue.unreachable_policy = policy
                .parse()
                .map_err(|_| anyhow!("Invalid UNREACHABLE_POLICY value: {}", policy))?;
        }
        if let Ok(window) = env::var("SCORE_WINDOW_SECONDS") {
            self.queue.score_window_seconds = window
                .parse()
                .map_err(|_| anyhow!("Invalid SCORE_WINDOW_SECONDS value: {}", window))?;
        }

        // Map settings
        if let Ok(pool) = env::var("MAP_POOL") {
            self.veto.map_pool = parse_list(&pool);
        }
        if let Ok(disabled) = env::var("DISABLED_MAPS") {
            self.veto.disabled_maps = parse_list(&disabled);
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get ready-check timeout as Duration
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.ready_timeout_seconds)
    }

    /// Get score confirmation window as Duration
    pub fn score_window(&self) -> Duration {
        Duration::from_secs(self.queue.score_window_seconds)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            ready_timeout: self.ready_timeout(),
            unreachable_policy: self.queue.unreachable_policy,
        }
    }

    pub fn format_provider(&self) -> StaticFormatProvider {
        StaticFormatProvider::with_required_count(self.queue.required_count)
    }

    /// Build the map catalog from the configured pool
    pub fn map_catalog(&self) -> StaticMapCatalog {
        let maps = self
            .veto
            .map_pool
            .iter()
            .map(|id| GameMap::new(id.clone(), title_case(id)))
            .collect();

        let mut catalog = StaticMapCatalog::with_maps(maps);
        for map_id in &self.veto.disabled_maps {
            catalog.disable(map_id);
        }
        catalog
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.metrics_port == 0 {
        return Err(anyhow!("Metrics port cannot be 0"));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.queue.ready_timeout_seconds == 0 {
        return Err(anyhow!("Ready timeout must be greater than 0"));
    }
    if config.queue.score_window_seconds == 0 {
        return Err(anyhow!("Score window must be greater than 0"));
    }

    // Validate queue settings
    if config.queue.required_count < 2 || config.queue.required_count % 2 != 0 {
        return Err(anyhow!(
            "Required player count must be an even number of at least 2, got {}",
            config.queue.required_count
        ));
    }

    // Validate map pool: the longest veto consumes six maps and leaves a decider
    let active = config
        .veto
        .map_pool
        .iter()
        .filter(|id| !config.veto.disabled_maps.contains(id))
        .count();
    if active < 7 {
        return Err(anyhow!(
            "Map pool needs at least 7 active maps, got {}",
            active
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::MapCatalog;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.queue.required_count, 10);
        assert_eq!(config.ready_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.coordinator_settings().unreachable_policy,
            UnreachablePolicy::EvictAtTimeout
        );
    }

    #[test]
    fn test_from_toml_with_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [service]
            metrics_enabled = false
            metrics_port = 9100

            [queue]
            required_count = 4
            unreachable_policy = "evict_immediately"
            "#,
        )
        .unwrap();

        assert!(!config.service.metrics_enabled);
        assert_eq!(config.service.metrics_port, 9100);
        assert_eq!(config.service.name, "scrim-room");
        assert_eq!(config.queue.required_count, 4);
        assert_eq!(
            config.queue.unreachable_policy,
            UnreachablePolicy::EvictImmediately
        );
        assert_eq!(config.queue.ready_timeout_seconds, 30);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.queue.required_count = 5;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.service.log_level = "loud".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.queue.ready_timeout_seconds = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.veto.disabled_maps = vec!["PEARL".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_map_catalog_from_pool() {
        let mut config = AppConfig::default();
        config.veto.map_pool.push("ABYSS".to_string());
        config.veto.disabled_maps = vec!["SPLIT".to_string()];

        let catalog = config.map_catalog();
        let active = catalog.active_maps();
        assert_eq!(active.len(), 7);
        assert!(active.iter().all(|m| m.id != "SPLIT"));
        assert_eq!(catalog.by_name("abyss").unwrap().name, "Abyss");
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" ascent, bind ,,"), vec!["ASCENT", "BIND"]);
    }
}
