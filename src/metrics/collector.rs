//! Metrics collection using Prometheus
//!
//! Counters and gauges for the queue, ready checks and veto sessions.

use crate::types::BestOf;
use crate::veto::phase::VetoAction;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue and ready-check metrics
    queue_metrics: QueueMetrics,

    /// Veto metrics
    veto_metrics: VetoMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Failed deliveries through the notifier
    pub notification_failures_total: IntCounter,

    /// Health status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,
}

/// Queue and ready-check metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Successful joins per format
    pub players_joined_total: IntCounterVec,

    /// Leaves per format
    pub players_left_total: IntCounterVec,

    /// Current pool size per format
    pub players_waiting: IntGaugeVec,

    /// Ready checks by outcome (issued, success, retry, stale)
    pub ready_checks_total: IntCounterVec,

    /// Players evicted for not confirming
    pub players_evicted_total: IntCounterVec,

    /// Matches handed to the assembler
    pub matches_formed_total: IntCounterVec,

    /// Time spent inside join calls, including ready-check delivery
    pub join_duration: Histogram,
}

/// Veto metrics
#[derive(Clone)]
pub struct VetoMetrics {
    /// Sessions currently open
    pub sessions_active: IntGauge,

    /// Veto actions by action and result
    pub actions_total: IntCounterVec,
}

fn format_label(best_of: BestOf) -> &'static str {
    match best_of {
        BestOf::One => "bo1",
        BestOf::Three => "bo3",
        BestOf::Five => "bo5",
    }
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let veto_metrics = VetoMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            veto_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn veto(&self) -> &VetoMetrics {
        &self.veto_metrics
    }

    /// Record a successful join and the resulting pool size
    pub fn record_join(&self, best_of: BestOf, pool_size: usize, duration: Duration) {
        let label = format_label(best_of);
        self.queue_metrics
            .players_joined_total
            .with_label_values(&[label])
            .inc();
        self.queue_metrics
            .players_waiting
            .with_label_values(&[label])
            .set(pool_size as i64);
        self.queue_metrics
            .join_duration
            .observe(duration.as_secs_f64());
    }

    /// Record a player leaving a pool
    pub fn record_leave(&self, best_of: BestOf, pool_size: usize) {
        let label = format_label(best_of);
        self.queue_metrics
            .players_left_total
            .with_label_values(&[label])
            .inc();
        self.queue_metrics
            .players_waiting
            .with_label_values(&[label])
            .set(pool_size as i64);
    }

    /// Record a ready-check transition (issued, success, retry, stale)
    pub fn record_ready_check(&self, best_of: BestOf, outcome: &str) {
        self.queue_metrics
            .ready_checks_total
            .with_label_values(&[format_label(best_of), outcome])
            .inc();
    }

    /// Record players removed at a ready-check timeout
    pub fn record_evictions(&self, best_of: BestOf, count: usize, pool_size: usize) {
        let label = format_label(best_of);
        self.queue_metrics
            .players_evicted_total
            .with_label_values(&[label])
            .inc_by(count as u64);
        self.queue_metrics
            .players_waiting
            .with_label_values(&[label])
            .set(pool_size as i64);
    }

    /// Record a match handed off after a successful ready check
    pub fn record_match_formed(&self, best_of: BestOf, pool_size: usize) {
        let label = format_label(best_of);
        self.queue_metrics
            .matches_formed_total
            .with_label_values(&[label])
            .inc();
        self.queue_metrics
            .players_waiting
            .with_label_values(&[label])
            .set(pool_size as i64);
    }

    pub fn record_notification_failure(&self) {
        self.service_metrics.notification_failures_total.inc();
    }

    /// Record a veto action attempt
    pub fn record_veto_action(&self, action: VetoAction, accepted: bool) {
        let action = match action {
            VetoAction::Ban => "ban",
            VetoAction::Pick => "pick",
            VetoAction::SidePick => "side_pick",
        };
        let result = if accepted { "accepted" } else { "rejected" };

        self.veto_metrics
            .actions_total
            .with_label_values(&[action, result])
            .inc();
    }

    pub fn set_active_vetos(&self, count: usize) {
        self.veto_metrics.sessions_active.set(count as i64);
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("scrim_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let notification_failures_total = IntCounter::new(
            "scrim_room_notification_failures_total",
            "Notifications that could not be delivered",
        )?;
        registry.register(Box::new(notification_failures_total.clone()))?;

        let health_status = IntGauge::new(
            "scrim_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            uptime_seconds,
            notification_failures_total,
            health_status,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let players_joined_total = IntCounterVec::new(
            Opts::new("scrim_room_players_joined_total", "Total successful joins"),
            &["format"],
        )?;
        registry.register(Box::new(players_joined_total.clone()))?;

        let players_left_total = IntCounterVec::new(
            Opts::new("scrim_room_players_left_total", "Total queue leaves"),
            &["format"],
        )?;
        registry.register(Box::new(players_left_total.clone()))?;

        let players_waiting = IntGaugeVec::new(
            Opts::new("scrim_room_players_waiting", "Players currently in a pool"),
            &["format"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let ready_checks_total = IntCounterVec::new(
            Opts::new("scrim_room_ready_checks_total", "Ready checks by outcome"),
            &["format", "outcome"],
        )?;
        registry.register(Box::new(ready_checks_total.clone()))?;

        let players_evicted_total = IntCounterVec::new(
            Opts::new(
                "scrim_room_players_evicted_total",
                "Players removed for missing a ready check",
            ),
            &["format"],
        )?;
        registry.register(Box::new(players_evicted_total.clone()))?;

        let matches_formed_total = IntCounterVec::new(
            Opts::new("scrim_room_matches_formed_total", "Total matches formed"),
            &["format"],
        )?;
        registry.register(Box::new(matches_formed_total.clone()))?;

        let join_duration = Histogram::with_opts(HistogramOpts::new(
            "scrim_room_join_duration_seconds",
            "Time spent processing a join",
        ))?;
        registry.register(Box::new(join_duration.clone()))?;

        Ok(Self {
            players_joined_total,
            players_left_total,
            players_waiting,
            ready_checks_total,
            players_evicted_total,
            matches_formed_total,
            join_duration,
        })
    }
}

impl VetoMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let sessions_active =
            IntGauge::new("scrim_room_veto_sessions_active", "Open veto sessions")?;
        registry.register(Box::new(sessions_active.clone()))?;

        let actions_total = IntCounterVec::new(
            Opts::new("scrim_room_veto_actions_total", "Veto actions by result"),
            &["action", "result"],
        )?;
        registry.register(Box::new(actions_total.clone()))?;

        Ok(Self {
            sessions_active,
            actions_total,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
