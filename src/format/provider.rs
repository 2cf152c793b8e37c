//! Format provider traits and implementations
//!
//! A format is a best-of value. Its configuration is the number of players a
//! ready check needs and the veto phase sequence, if the format has a veto.
//! Adding a format is a table change, not a code change.

use crate::error::{MatchmakingError, Result};
use crate::types::BestOf;
use crate::veto::phase::{default_sequence, VetoAction, VetoPhase};
use serde::Serialize;
use std::collections::BTreeMap;

/// Players needed to fill a 5v5 match
pub const DEFAULT_REQUIRED_COUNT: usize = 10;

/// Configuration for a single format
#[derive(Debug, Clone, Serialize)]
pub struct FormatConfiguration {
    pub best_of: BestOf,
    /// Players a ready check needs
    pub required_count: usize,
    /// Ordered veto phases, `None` when the format has no veto
    pub veto_sequence: Option<&'static [VetoPhase]>,
}

impl FormatConfiguration {
    /// Built-in configuration for a format
    pub fn standard(best_of: BestOf) -> Self {
        Self {
            best_of,
            required_count: DEFAULT_REQUIRED_COUNT,
            veto_sequence: default_sequence(best_of),
        }
    }

    /// Same configuration with a different ready-check size
    pub fn with_required_count(mut self, required_count: usize) -> Self {
        self.required_count = required_count;
        self
    }

    /// Number of maps the veto consumes (banned or picked)
    pub fn maps_consumed(&self) -> usize {
        self.veto_sequence
            .map(|seq| {
                seq.iter()
                    .filter(|p| matches!(p.action, VetoAction::Ban | VetoAction::Pick))
                    .count()
            })
            .unwrap_or(0)
    }
}

/// Trait for providing format configurations
pub trait FormatProvider: Send + Sync {
    /// Get configuration for a format, `InvalidFormat` if it is not offered
    fn get_format_config(&self, best_of: BestOf) -> Result<FormatConfiguration>;

    /// All formats players can queue for
    fn available_formats(&self) -> Vec<BestOf>;

    /// Validate a format configuration
    fn validate_config(&self, config: &FormatConfiguration) -> Result<()>;
}

/// Fixed table of formats built at startup
#[derive(Debug, Clone)]
pub struct StaticFormatProvider {
    formats: BTreeMap<BestOf, FormatConfiguration>,
}

impl StaticFormatProvider {
    /// All three formats with the default ready-check size
    pub fn new() -> Self {
        Self::with_required_count(DEFAULT_REQUIRED_COUNT)
    }

    /// All three formats sharing a ready-check size
    pub fn with_required_count(required_count: usize) -> Self {
        let formats = BestOf::ALL
            .iter()
            .map(|&best_of| {
                (
                    best_of,
                    FormatConfiguration::standard(best_of).with_required_count(required_count),
                )
            })
            .collect();

        Self { formats }
    }

    /// Create with custom configurations
    pub fn with_configs(configs: Vec<FormatConfiguration>) -> Result<Self> {
        let provider = Self {
            formats: BTreeMap::new(),
        };

        let mut formats = BTreeMap::new();
        for config in configs {
            provider.validate_config(&config)?;
            if formats.insert(config.best_of, config).is_some() {
                return Err(MatchmakingError::ConfigurationError {
                    message: "Duplicate format configuration".to_string(),
                }
                .into());
            }
        }

        if formats.is_empty() {
            return Err(MatchmakingError::ConfigurationError {
                message: "At least one format must be configured".to_string(),
            }
            .into());
        }

        Ok(Self { formats })
    }
}

impl Default for StaticFormatProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatProvider for StaticFormatProvider {
    fn get_format_config(&self, best_of: BestOf) -> Result<FormatConfiguration> {
        self.formats.get(&best_of).cloned().ok_or_else(|| {
            MatchmakingError::InvalidFormat {
                value: best_of.value(),
            }
            .into()
        })
    }

    fn available_formats(&self) -> Vec<BestOf> {
        self.formats.keys().copied().collect()
    }

    fn validate_config(&self, config: &FormatConfiguration) -> Result<()> {
        // two teams of at least one player each
        if config.required_count < 2 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Required player count must be at least 2".to_string(),
            }
            .into());
        }

        if config.required_count % 2 != 0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Required player count must be even".to_string(),
            }
            .into());
        }

        if let Some(sequence) = config.veto_sequence {
            if sequence.is_empty() {
                return Err(MatchmakingError::ConfigurationError {
                    message: format!("Veto sequence for {} is empty", config.best_of),
                }
                .into());
            }

            for (idx, phase) in sequence.iter().enumerate() {
                if phase.order as usize != idx + 1 {
                    return Err(MatchmakingError::ConfigurationError {
                        message: format!(
                            "Veto phase {} of {} has order {}",
                            idx + 1,
                            config.best_of,
                            phase.order
                        ),
                    }
                    .into());
                }
            }

            if sequence[0].action == VetoAction::SidePick {
                return Err(MatchmakingError::ConfigurationError {
                    message: "Veto cannot open with a side pick".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}
