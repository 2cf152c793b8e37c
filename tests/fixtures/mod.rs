//! Test fixtures shared by the integration tests

#![allow(dead_code)]

use scrim_room::format::StaticFormatProvider;
use scrim_room::maps::StaticMapCatalog;
use scrim_room::metrics::MetricsCollector;
use scrim_room::notify::MockNotifier;
use scrim_room::queue::{
    CoordinatorSettings, QueueCoordinator, SequentialMatchAssembler, UnreachablePolicy,
    DEFAULT_READY_TIMEOUT,
};
use scrim_room::types::{FormedMatch, PlayerId, QueueEvent};
use scrim_room::veto::VetoRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A coordinator wired to in-memory collaborators
pub struct TestSystem {
    pub coordinator: QueueCoordinator,
    pub registry: VetoRegistry,
    pub notifier: Arc<MockNotifier>,
    pub metrics: Arc<MetricsCollector>,
    pub events: mpsc::UnboundedReceiver<QueueEvent>,
}

impl TestSystem {
    /// Drain every event emitted so far
    pub fn drain_events(&mut self) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Matches formed since the last drain
    pub fn formed_matches(&mut self) -> Vec<FormedMatch> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                QueueEvent::MatchFormed(formed) => Some(formed),
                _ => None,
            })
            .collect()
    }
}

/// Build a system with the deterministic assembler
pub fn create_test_system(required: usize, policy: UnreachablePolicy) -> TestSystem {
    create_test_system_with_timeout(required, policy, DEFAULT_READY_TIMEOUT)
}

pub fn create_test_system_with_timeout(
    required: usize,
    policy: UnreachablePolicy,
    ready_timeout: Duration,
) -> TestSystem {
    let metrics = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
    let provider = Arc::new(StaticFormatProvider::with_required_count(required));
    let registry = VetoRegistry::new(
        provider.clone(),
        Arc::new(StaticMapCatalog::new()),
        metrics.clone(),
    );
    let notifier = Arc::new(MockNotifier::new());

    let settings = CoordinatorSettings {
        ready_timeout,
        unreachable_policy: policy,
    };
    let (coordinator, events) = QueueCoordinator::with_metrics(
        settings,
        provider,
        notifier.clone(),
        registry.clone(),
        metrics.clone(),
    )
    .expect("Failed to create coordinator");

    TestSystem {
        coordinator: coordinator.with_assembler(Arc::new(SequentialMatchAssembler::new())),
        registry,
        notifier,
        metrics,
        events,
    }
}

/// `P1..Pn`
pub fn player_ids(count: usize) -> Vec<PlayerId> {
    (1..=count).map(|i| format!("P{}", i)).collect()
}

/// Let the ready-check deadline pass and the timer tasks run.
///
/// Only meaningful with paused time.
pub async fn expire_ready_check() {
    tokio::time::sleep(DEFAULT_READY_TIMEOUT + Duration::from_secs(1)).await;
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}
