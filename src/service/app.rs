//! Main application state and service coordination
//!
//! `AppState` wires the queue coordinator, veto registry and score ledger
//! together, runs the health server and the background tasks, and keeps the
//! formed matches the command layer needs to authorize score reports.

use crate::config::AppConfig;
use crate::error::{MatchmakingError, Result as MatchmakingResult};
use crate::format::FormatProvider;
use crate::maps::MapCatalog;
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector};
use crate::notify::{LogNotifier, Notifier};
use crate::queue::QueueCoordinator;
use crate::score::{ScoreLedger, ScoreSubmission};
use crate::types::{FormedMatch, MatchId, QueueEvent};
use crate::veto::VetoRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Buffered events per subscriber before it starts lagging
const EVENT_BUFFER: usize = 256;

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    coordinator: QueueCoordinator,
    veto_registry: VetoRegistry,
    score_ledger: ScoreLedger,
    metrics_collector: Arc<MetricsCollector>,

    /// Formed matches by id, kept for captain lookups
    matches: Arc<StdRwLock<HashMap<MatchId, FormedMatch>>>,

    /// Coordinator events, consumed by the event task on start
    event_receiver: Mutex<Option<mpsc::UnboundedReceiver<QueueEvent>>>,
    event_broadcast: broadcast::Sender<QueueEvent>,

    health_server: Mutex<Option<Arc<HealthServer>>>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Build the service with notifications going to the log
    pub fn new(config: AppConfig) -> Result<Self, ServiceError> {
        Self::with_notifier(config, Arc::new(LogNotifier::new()))
    }

    /// Build the service around a specific notifier
    pub fn with_notifier(
        config: AppConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ServiceError> {
        info!("Initializing scrim-room service '{}'", config.service.name);

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let format_provider = Arc::new(config.format_provider());
        let map_catalog = Arc::new(config.map_catalog());
        info!(
            "Formats: {:?}, active maps: {}",
            format_provider.available_formats(),
            map_catalog.active_maps().len()
        );

        let veto_registry = VetoRegistry::new(
            format_provider.clone(),
            map_catalog,
            metrics_collector.clone(),
        );

        let (coordinator, event_receiver) = QueueCoordinator::with_metrics(
            config.coordinator_settings(),
            format_provider,
            notifier,
            veto_registry.clone(),
            metrics_collector.clone(),
        )
        .map_err(|e| ServiceError::Initialization {
            message: format!("Failed to create queue coordinator: {}", e),
        })?;

        let score_ledger = ScoreLedger::new(config.score_window());
        let (event_broadcast, _) = broadcast::channel(EVENT_BUFFER);

        Ok(Self {
            config,
            coordinator,
            veto_registry,
            score_ledger,
            metrics_collector,
            matches: Arc::new(StdRwLock::new(HashMap::new())),
            event_receiver: Mutex::new(Some(event_receiver)),
            event_broadcast,
            health_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start the health server and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting scrim-room service");

        {
            let mut running = self.is_running.write().await;
            if *running {
                return Err(ServiceError::Initialization {
                    message: "Service is already running".to_string(),
                });
            }
            *running = true;
        }

        if self.config.service.metrics_enabled {
            self.start_health_server().await;
        } else {
            info!("Metrics endpoints disabled");
        }

        self.start_background_tasks().await?;

        info!("Scrim-room service started");
        Ok(())
    }

    /// Stop timers, background tasks and the health server
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of scrim-room service");

        *self.is_running.write().await = false;

        let cancelled = self
            .coordinator
            .shutdown()
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to stop ready checks: {}", e),
            })?;
        debug!("{} ready checks cancelled", cancelled);

        if let Err(e) = self.score_ledger.clear() {
            warn!("Failed to clear pending scores: {}", e);
        }

        if let Some(server) = self.health_server.lock().await.take() {
            if let Err(e) = server.stop().await {
                warn!("Failed to stop health server: {}", e);
            }
        }

        self.stop_background_tasks().await;

        match self.coordinator.stats() {
            Ok(stats) => info!("Final queue statistics: {:?}", stats),
            Err(e) => warn!("Failed to read final stats: {}", e),
        }
        info!("Scrim-room service shutdown completed");

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn coordinator(&self) -> &QueueCoordinator {
        &self.coordinator
    }

    pub fn veto_registry(&self) -> &VetoRegistry {
        &self.veto_registry
    }

    pub fn score_ledger(&self) -> &ScoreLedger {
        &self.score_ledger
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Receive every coordinator event processed after this call
    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_broadcast.subscribe()
    }

    pub fn formed_match(&self, match_id: MatchId) -> Option<FormedMatch> {
        self.matches
            .read()
            .ok()
            .and_then(|matches| matches.get(&match_id).cloned())
    }

    /// Ids of formed matches a player took part in
    pub fn matches_for(&self, player_id: &str) -> Vec<MatchId> {
        let Ok(matches) = self.matches.read() else {
            return Vec::new();
        };

        matches
            .values()
            .filter(|m| m.team1.iter().chain(&m.team2).any(|p| p == player_id))
            .map(|m| m.match_id)
            .collect()
    }

    /// Submit a score on behalf of one of the match's captains
    pub fn submit_score(
        &self,
        match_id: MatchId,
        player_id: &str,
        raw: &str,
    ) -> MatchmakingResult<ScoreSubmission> {
        let formed = self
            .formed_match(match_id)
            .ok_or_else(|| MatchmakingError::MatchNotFound {
                match_id: match_id.to_string(),
            })?;

        let outcome = self.score_ledger.submit(
            match_id,
            player_id,
            [formed.captain1.as_str(), formed.captain2.as_str()],
            raw,
        )?;

        if let ScoreSubmission::Confirmed { score } = &outcome {
            info!("Match {} finished {}", match_id, score);
            self.forget_match(match_id);
        }

        Ok(outcome)
    }

    fn forget_match(&self, match_id: MatchId) {
        match self.matches.write() {
            Ok(mut matches) => {
                matches.remove(&match_id);
            }
            Err(_) => warn!("Failed to acquire formed matches lock"),
        }
        if let Err(e) = self.veto_registry.discard(match_id) {
            warn!("Failed to discard veto for match {}: {}", match_id, e);
        }
    }

    /// Record an event and pass it on to subscribers
    fn handle_event(
        event: QueueEvent,
        matches: &StdRwLock<HashMap<MatchId, FormedMatch>>,
        broadcast: &broadcast::Sender<QueueEvent>,
    ) {
        match &event {
            QueueEvent::ReadyCheckIssued {
                best_of,
                generation,
                members,
                ..
            } => {
                debug!(
                    "Ready check {} issued for {} ({} players)",
                    generation,
                    best_of,
                    members.len()
                );
            }
            QueueEvent::PlayersEvicted {
                best_of,
                player_ids,
            } => {
                info!(
                    "{} players evicted from {}: {}",
                    player_ids.len(),
                    best_of,
                    player_ids.join(", ")
                );
            }
            QueueEvent::MatchFormed(formed) => {
                info!(
                    "Match {} ({}) recorded: {} vs {}",
                    formed.match_id, formed.best_of, formed.captain1, formed.captain2
                );
                match matches.write() {
                    Ok(mut matches) => {
                        matches.insert(formed.match_id, formed.clone());
                    }
                    Err(_) => error!("Failed to acquire formed matches lock"),
                }
            }
        }

        // no subscribers is fine
        let _ = broadcast.send(event);
    }

    async fn start_health_server(self: &Arc<Self>) {
        let health_config = HealthServerConfig::for_port(self.config.service.metrics_port);
        let server = Arc::new(
            HealthServer::new(health_config, self.metrics_collector.clone())
                .with_app_state(self.clone()),
        );
        *self.health_server.lock().await = Some(server.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Health server failed: {}", e);
            }
        });
        self.background_tasks.lock().await.push(handle);

        info!(
            "Health and metrics endpoints on port {}",
            self.config.service.metrics_port
        );
    }

    async fn start_background_tasks(&self) -> Result<(), ServiceError> {
        let mut tasks = self.background_tasks.lock().await;

        // Event task
        let receiver = self.event_receiver.lock().await.take().ok_or_else(|| {
            ServiceError::BackgroundTask {
                message: "Event stream already consumed".to_string(),
            }
        })?;
        let event_task = {
            let matches = self.matches.clone();
            let broadcast = self.event_broadcast.clone();
            let mut receiver = receiver;

            tokio::spawn(async move {
                debug!("Event task started");
                while let Some(event) = receiver.recv().await {
                    Self::handle_event(event, &matches, &broadcast);
                }
                debug!("Event task stopped");
            })
        };
        tasks.push(event_task);

        // Service metrics task
        let metrics_task = {
            let metrics_collector = self.metrics_collector.clone();
            let veto_registry = self.veto_registry.clone();
            let is_running = self.is_running.clone();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(15));

                while *is_running.read().await {
                    interval.tick().await;

                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(started_at.elapsed().as_secs() as i64);

                    match veto_registry.active_sessions() {
                        Ok(active) => {
                            metrics_collector.set_active_vetos(active);
                            metrics_collector.update_health_status(2);
                        }
                        Err(e) => {
                            warn!("Failed to count veto sessions: {}", e);
                            metrics_collector.update_health_status(1);
                        }
                    }
                }
            })
        };
        tasks.push(metrics_task);

        info!("{} background tasks running", tasks.len());
        Ok(())
    }

    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let task_count = tasks.len();
        if task_count == 0 {
            debug!("No background tasks to stop");
            return;
        }

        for task in tasks.drain(..) {
            task.abort();
        }
        info!("Stopped {} background tasks", task_count);
    }
}
