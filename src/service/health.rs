//! Health checks for the scrim-room service
//!
//! Readiness and liveness probes plus a detailed report used by the stats
//! endpoint and the periodic health log.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Players waiting across all formats
    pub players_waiting: usize,
    pub ready_checks_issued: u64,
    pub players_evicted: u64,
    pub matches_formed: u64,
    /// Veto sessions currently open
    pub active_vetos: usize,
    pub uptime_info: String,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let mut checks = Vec::new();

        let service_check = Self::check_service_running(&app_state).await;
        let mut overall_status = if service_check.status == HealthStatus::Healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        checks.push(service_check);

        for check in [
            Self::check_queue_coordinator(&app_state),
            Self::check_veto_registry(&app_state),
        ] {
            overall_status = match (&overall_status, &check.status) {
                (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
                (HealthStatus::Healthy, HealthStatus::Degraded) => HealthStatus::Degraded,
                (current, _) => current.clone(),
            };
            checks.push(check);
        }

        let stats = Self::gather_service_stats(&app_state);

        Ok(HealthCheck {
            status: overall_status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can take queue commands
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_queue_coordinator(&app_state).status)
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Every format pool must be lockable
    fn check_queue_coordinator(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();
        let coordinator = app_state.coordinator();

        let failures: Vec<String> = coordinator
            .formats()
            .into_iter()
            .filter_map(|best_of| {
                coordinator
                    .pool_snapshot(best_of)
                    .err()
                    .map(|e| format!("{}: {}", best_of, e))
            })
            .collect();

        let (status, message) = if failures.is_empty() {
            (HealthStatus::Healthy, None)
        } else if failures.len() < coordinator.formats().len() {
            (HealthStatus::Degraded, Some(failures.join("; ")))
        } else {
            (HealthStatus::Unhealthy, Some(failures.join("; ")))
        };

        ComponentCheck {
            name: "queue_coordinator".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_veto_registry(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.veto_registry().active_sessions() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => (
                HealthStatus::Degraded,
                Some(format!("Cannot read veto sessions: {}", e)),
            ),
        };

        ComponentCheck {
            name: "veto_registry".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let uptime_info = format!("Up {}s", app_state.uptime().as_secs());

        let mut stats = match app_state.coordinator().stats() {
            Ok(queue_stats) => ServiceStats {
                players_waiting: queue_stats.players_waiting.values().sum(),
                ready_checks_issued: queue_stats.ready_checks_issued,
                players_evicted: queue_stats.players_evicted,
                matches_formed: queue_stats.matches_formed,
                active_vetos: 0,
                uptime_info,
            },
            Err(e) => {
                debug!("Failed to get queue stats for health check: {}", e);
                ServiceStats {
                    uptime_info,
                    ..Default::default()
                }
            }
        };

        stats.active_vetos = app_state.veto_registry().active_sessions().unwrap_or(0);
        stats
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
