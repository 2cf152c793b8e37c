//! Scrim simulator
//!
//! Runs scripted queue and veto scenarios against an in-process service,
//! printing every notification and event along the way.
//!
//! Usage:
//!   cargo run --bin scrim-sim -- full-ready --format 3
//!   cargo run --bin scrim-sim -- partial-ready --ready 9
//!   cargo run --bin scrim-sim -- veto --format 5
//!   cargo run --bin scrim-sim -- all --metrics

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use scrim_room::config::AppConfig;
use scrim_room::metrics::HealthEndpoints;
use scrim_room::notify::MockNotifier;
use scrim_room::service::AppState;
use scrim_room::types::{BestOf, FormedMatch, Notification, QueueEvent, Side};
use scrim_room::utils::short_id;
use scrim_room::veto::{TeamNumber, VetoAction};
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "scrim-sim")]
#[command(about = "Scripted queue, ready-check and veto scenarios for scrim-room")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Players per match
    #[arg(long, default_value = "10")]
    players: usize,

    /// Ready-check timeout in seconds
    #[arg(long, default_value = "1")]
    timeout: u64,

    /// Print Prometheus metrics after the scenario
    #[arg(long)]
    metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill a pool, ready everyone and form a match
    FullReady {
        /// Best-of format (1, 3 or 5)
        #[arg(short, long, default_value = "3")]
        format: u8,
    },
    /// Fill a pool, ready only some players and watch the evictions
    PartialReady {
        /// Players who confirm
        #[arg(short, long, default_value = "9")]
        ready: usize,
        /// Best-of format (1, 3 or 5)
        #[arg(short, long, default_value = "3")]
        format: u8,
    },
    /// Form a match and play through its whole veto
    Veto {
        /// Best-of format (3 or 5)
        #[arg(short, long, default_value = "3")]
        format: u8,
    },
    /// Run every scenario
    All,
}

struct Simulation {
    app: Arc<AppState>,
    notifier: Arc<MockNotifier>,
    events: broadcast::Receiver<QueueEvent>,
    timeout: Duration,
}

impl Simulation {
    async fn start(players: usize, timeout: u64) -> Result<Self> {
        let mut config = AppConfig::default();
        config.service.metrics_enabled = false;
        config.queue.required_count = players;
        config.queue.ready_timeout_seconds = timeout;

        let notifier = Arc::new(MockNotifier::new());
        let app = Arc::new(AppState::with_notifier(config, notifier.clone())?);
        let events = app.subscribe_events();
        app.start().await?;

        Ok(Self {
            app,
            notifier,
            events,
            timeout: Duration::from_secs(timeout),
        })
    }

    fn player_ids(&self, count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("P{}", i)).collect()
    }

    async fn fill(&self, best_of: BestOf, count: usize) -> Result<Vec<String>> {
        let players = self.player_ids(count);
        for player in &players {
            let size = self.app.coordinator().join(player, best_of).await?;
            println!("  {} joined {} ({} waiting)", player, best_of, size);
        }
        Ok(players)
    }

    /// Print events until one matches, or the ready check has surely expired
    async fn wait_for<T>(&mut self, mut pick: impl FnMut(&QueueEvent) -> Option<T>) -> Result<T> {
        let deadline = self.timeout + Duration::from_secs(5);
        let events = &mut self.events;

        let found = tokio::time::timeout(deadline, async {
            loop {
                let event = events.recv().await?;
                print_event(&event);
                if let Some(found) = pick(&event) {
                    return Ok::<T, anyhow::Error>(found);
                }
            }
        })
        .await
        .map_err(|_| anyhow!("Timed out waiting for queue event"))?;

        found
    }

    async fn form_match(&mut self, best_of: BestOf, players: usize) -> Result<FormedMatch> {
        let ids = self.fill(best_of, players).await?;
        for id in &ids {
            self.app.coordinator().mark_ready(id)?;
        }
        println!("  all {} players ready", ids.len());

        self.wait_for(|event| match event {
            QueueEvent::MatchFormed(formed) => Some(formed.clone()),
            _ => None,
        })
        .await
    }

    async fn stop(self, show_metrics: bool) -> Result<()> {
        println!(
            "  notifications sent: {} ready checks, {} evictions, {} match announcements",
            self.notifier
                .count(|n| matches!(n, Notification::ReadyCheck { .. })),
            self.notifier
                .count(|n| matches!(n, Notification::RemovedNotReady { .. })),
            self.notifier
                .count(|n| matches!(n, Notification::MatchFormed { .. })),
        );

        if show_metrics {
            let text = HealthEndpoints::get_metrics_text(self.app.metrics_collector()).await?;
            println!("{}", text);
        }

        self.app.shutdown().await?;
        Ok(())
    }
}

fn print_event(event: &QueueEvent) {
    match event {
        QueueEvent::ReadyCheckIssued {
            best_of,
            generation,
            members,
            ..
        } => println!(
            "  > ready check #{} for {}: {}",
            generation,
            best_of,
            members.join(", ")
        ),
        QueueEvent::PlayersEvicted {
            best_of,
            player_ids,
        } => println!("  > evicted from {}: {}", best_of, player_ids.join(", ")),
        QueueEvent::MatchFormed(formed) => println!(
            "  > match {} formed: [{}] vs [{}], captains {} / {}",
            short_id(&formed.match_id),
            formed.team1.join(", "),
            formed.team2.join(", "),
            formed.captain1,
            formed.captain2
        ),
    }
}

async fn full_ready(cli: &Cli, format: u8) -> Result<()> {
    println!("Scenario: full ready check for bo{}", format);
    let best_of = BestOf::try_from(format)?;

    let mut sim = Simulation::start(cli.players, cli.timeout).await?;
    let formed = sim.form_match(best_of, cli.players).await?;

    match (&formed.map_id, formed.veto_opened) {
        (_, true) => println!("  veto opened"),
        (Some(map), false) => println!("  veto skipped, map {} drawn", map),
        (None, false) => println!("  veto skipped, no map available"),
    }
    sim.stop(cli.metrics).await
}

async fn partial_ready(cli: &Cli, format: u8, ready: usize) -> Result<()> {
    println!(
        "Scenario: {} of {} players ready for bo{}",
        ready, cli.players, format
    );
    let best_of = BestOf::try_from(format)?;

    let mut sim = Simulation::start(cli.players, cli.timeout).await?;
    let ids = sim.fill(best_of, cli.players).await?;
    for id in ids.iter().take(ready) {
        sim.app.coordinator().mark_ready(id)?;
    }

    if ready >= cli.players {
        sim.wait_for(|event| matches!(event, QueueEvent::MatchFormed(_)).then_some(()))
            .await?;
    } else {
        let evicted = sim
            .wait_for(|event| match event {
                QueueEvent::PlayersEvicted { player_ids, .. } => Some(player_ids.clone()),
                _ => None,
            })
            .await?;

        let snapshot = sim.app.coordinator().pool_snapshot(best_of)?;
        println!(
            "  {} evicted, {} still waiting, ready check {}",
            evicted.len(),
            snapshot.players.len(),
            if snapshot.batch.is_some() {
                "reissued"
            } else {
                "not reissued"
            }
        );
    }

    sim.stop(cli.metrics).await
}

async fn veto(cli: &Cli, format: u8) -> Result<()> {
    println!("Scenario: bo{} veto walkthrough", format);
    let best_of = BestOf::try_from(format)?;

    let mut sim = Simulation::start(cli.players, cli.timeout).await?;
    let formed = sim.form_match(best_of, cli.players).await?;
    if !formed.veto_opened {
        println!("  {} has no veto", best_of);
        return sim.stop(cli.metrics).await;
    }

    let registry = sim.app.veto_registry();
    let match_id = formed.match_id;
    let captains = registry.captains(match_id)?;

    while let Some(phase) = registry.current_phase(match_id)? {
        let captain = captains.captain_for(phase.team);
        let record = match phase.action {
            VetoAction::SidePick => {
                let side = if phase.team == TeamNumber::One {
                    Side::Attack
                } else {
                    Side::Defense
                };
                registry.pick_side(match_id, captain, side)?
            }
            action => {
                let map = registry
                    .available_maps(match_id)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("Map pool exhausted at phase {}", phase.order))?;
                if action == VetoAction::Ban {
                    registry.ban(match_id, captain, &map.name)?
                } else {
                    registry.pick(match_id, captain, &map.name)?
                }
            }
        };

        println!(
            "  {:>2}. team {} ({}) {} {}{}",
            record.order,
            record.team,
            captain,
            record.action,
            record.map_id,
            record
                .side
                .map(|side| format!(" -> {}", side))
                .unwrap_or_default()
        );
    }

    let outcome = registry.close(match_id)?;
    for (i, map) in outcome.maps.iter().enumerate() {
        println!(
            "  map {}: {} {}",
            i + 1,
            map.map_id,
            map.side
                .map(|side| format!("(starts {})", side))
                .unwrap_or_else(|| "(decider)".to_string())
        );
    }

    sim.stop(cli.metrics).await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::FullReady { format } => full_ready(&cli, *format).await?,
        Commands::PartialReady { ready, format } => partial_ready(&cli, *format, *ready).await?,
        Commands::Veto { format } => veto(&cli, *format).await?,
        Commands::All => {
            full_ready(&cli, 1).await?;
            partial_ready(&cli, 3, cli.players.saturating_sub(1)).await?;
            veto(&cli, 3).await?;
            veto(&cli, 5).await?;
        }
    }

    println!("Done");
    Ok(())
}
