//! Metrics and monitoring for the scrim-room service
//!
//! Prometheus collectors for the queue and veto, plus the HTTP server that
//! exposes them alongside health probes.

pub mod collector;
pub mod health;

pub use collector::{MetricsCollector, MetricsTimer, QueueMetrics, ServiceMetrics, VetoMetrics};
pub use health::{HealthEndpoints, HealthServer, HealthServerConfig};
