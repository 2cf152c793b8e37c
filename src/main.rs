//! Main entry point for the Scrim Room service
//!
//! Runs the queue, ready-check and veto core behind a line-based console,
//! with the health and metrics endpoints served alongside. Notifications
//! and lifecycle events are printed as they happen.

use anyhow::Result;
use clap::Parser;
use scrim_room::config::AppConfig;
use scrim_room::matchmaking_error;
use scrim_room::notify::ChannelNotifier;
use scrim_room::score::ScoreSubmission;
use scrim_room::service::{AppState, HealthCheck, HealthStatus};
use scrim_room::types::{BestOf, MatchId, Notification, QueueEvent, Side};
use scrim_room::utils::short_id;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

/// Scrim Room - queue, ready check and map veto for community scrims
#[derive(Parser)]
#[command(
    name = "scrim-room",
    version,
    about = "Queue, ready-check and map veto service for community scrims",
    long_about = "Scrim Room pools players per best-of format, runs a timed ready check when a \
                 pool fills, splits confirmed players into two teams and walks their captains \
                 through the map ban/pick/side sequence. Commands are read from stdin."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Metrics port override
    #[arg(long, value_name = "PORT", help = "Override metrics server port")]
    metrics_port: Option<u16>,

    /// Disable the health and metrics endpoints
    #[arg(long, help = "Do not serve health and metrics endpoints")]
    no_metrics: bool,

    /// Ready-check timeout override
    #[arg(long, value_name = "SECONDS", help = "Override the ready-check timeout")]
    ready_timeout: Option<u64>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// A console command
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Join { player: String, best_of: u8 },
    Leave { player: String },
    Ready { player: String },
    Status { player: String },
    Pool { best_of: u8 },
    Ban { player: String, map: String },
    Pick { player: String, map: String },
    Side { player: String, side: Side },
    Veto { player: String },
    Done { player: String },
    Score { player: String, score: String },
    Stats,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  join <player> <1|3|5>     queue for a best-of format
  leave <player>            leave the queue
  ready <player>            confirm the ready check
  status <player>           show queue status
  pool <1|3|5>              show a format's pool
  ban <player> <map>        ban a map in your match's veto
  pick <player> <map>       pick a map in your match's veto
  side <player> <ATK|DEF>   choose a side on the last picked map
  veto <player>             show your match's veto
  done <player>             close a completed veto
  score <player> <13-9>     report your match's score
  stats                     show queue statistics
  quit                      stop the service";

fn parse_command(line: &str) -> std::result::Result<Command, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let player = |index: usize| {
        parts
            .get(index)
            .map(|p| p.to_string())
            .ok_or_else(|| "missing player id".to_string())
    };
    let best_of = |index: usize| -> std::result::Result<u8, String> {
        parts
            .get(index)
            .ok_or_else(|| "missing best-of value".to_string())?
            .parse::<u8>()
            .map_err(|_| format!("'{}' is not a best-of value", parts[index]))
    };
    let rest = |index: usize, what: &str| {
        if parts.len() > index {
            Ok(parts[index..].join(" "))
        } else {
            Err(format!("missing {}", what))
        }
    };

    match parts.first().map(|c| c.to_lowercase()).as_deref() {
        Some("join") => Ok(Command::Join {
            player: player(1)?,
            best_of: best_of(2)?,
        }),
        Some("leave") => Ok(Command::Leave { player: player(1)? }),
        Some("ready") => Ok(Command::Ready { player: player(1)? }),
        Some("status") => Ok(Command::Status { player: player(1)? }),
        Some("pool") => Ok(Command::Pool {
            best_of: best_of(1)?,
        }),
        Some("ban") => Ok(Command::Ban {
            player: player(1)?,
            map: rest(2, "map name")?,
        }),
        Some("pick") => Ok(Command::Pick {
            player: player(1)?,
            map: rest(2, "map name")?,
        }),
        Some("side") => Ok(Command::Side {
            player: player(1)?,
            side: rest(2, "side")?
                .parse()
                .map_err(|e: scrim_room::MatchmakingError| e.to_string())?,
        }),
        Some("veto") => Ok(Command::Veto { player: player(1)? }),
        Some("done") => Ok(Command::Done { player: player(1)? }),
        Some("score") => Ok(Command::Score {
            player: player(1)?,
            score: rest(2, "score")?,
        }),
        Some("stats") => Ok(Command::Stats),
        Some("help") => Ok(Command::Help),
        Some("quit") | Some("exit") => Ok(Command::Quit),
        Some(other) => Err(format!("unknown command '{}', try 'help'", other)),
        None => Err("empty command".to_string()),
    }
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Perform health check and return appropriate exit code
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = Arc::new(AppState::new(config)?);
    app_state.start().await?;

    let health = HealthCheck::check(app_state.clone()).await;
    app_state.shutdown().await?;

    match health {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            for check in &health.checks {
                println!("  {}: {}", check.name, check.status);
            }
            println!("  Uptime: {}", health.stats.uptime_info);

            if health.status == HealthStatus::Healthy {
                std::process::exit(0);
            } else {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Log queue health periodically
async fn health_check_task(app_state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));

    while app_state.is_running().await {
        interval.tick().await;

        match HealthCheck::check(app_state.clone()).await {
            Ok(health) => {
                info!(
                    "Health check: {} - {} waiting, {} matches formed, {} vetos open",
                    health.status,
                    health.stats.players_waiting,
                    health.stats.matches_formed,
                    health.stats.active_vetos
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("Scrim Room service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    if config.service.metrics_enabled {
        info!("   Metrics port: {}", config.service.metrics_port);
    }
    info!("   Players per match: {}", config.queue.required_count);
    info!("   Ready timeout: {}s", config.queue.ready_timeout_seconds);
    info!("   Unreachable policy: {:?}", config.queue.unreachable_policy);
    info!("   Map pool: {}", config.veto.map_pool.join(", "));
}

/// Load and merge configuration from file or environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(metrics_port) = args.metrics_port {
        config.service.metrics_port = metrics_port;
    }

    if args.no_metrics {
        config.service.metrics_enabled = false;
    }

    if let Some(timeout) = args.ready_timeout {
        config.queue.ready_timeout_seconds = timeout;
    }

    scrim_room::config::validate_config(&config)?;
    Ok(config)
}

fn render_notification(player_id: &str, notification: &Notification) -> String {
    match notification {
        Notification::ReadyCheck { best_of, deadline } => format!(
            "@{}: your {} match is ready, type 'ready {}' before {}",
            player_id,
            best_of,
            player_id,
            deadline.format("%H:%M:%S")
        ),
        Notification::RemovedNotReady { best_of } => format!(
            "@{}: you were removed from the {} queue for not readying up",
            player_id, best_of
        ),
        Notification::MatchFormed {
            match_id,
            best_of,
            team,
            captain,
            map_id,
        } => format!(
            "@{}: {} match {} formed, you are on team {} (captain {}){}",
            player_id,
            best_of,
            short_id(match_id),
            team,
            captain,
            map_id
                .as_ref()
                .map(|map| format!(", map {}", map))
                .unwrap_or_default()
        ),
    }
}

fn render_event(event: &QueueEvent) -> String {
    match event {
        QueueEvent::ReadyCheckIssued {
            best_of,
            generation,
            members,
            ..
        } => format!(
            "# ready check #{} for {}: {}",
            generation,
            best_of,
            members.join(", ")
        ),
        QueueEvent::PlayersEvicted {
            best_of,
            player_ids,
        } => format!("# evicted from {}: {}", best_of, player_ids.join(", ")),
        QueueEvent::MatchFormed(formed) => format!(
            "# match {} ({}): [{}] vs [{}], {} picks first{}",
            short_id(&formed.match_id),
            formed.best_of,
            formed.team1.join(", "),
            formed.team2.join(", "),
            if formed.team1_first_pick {
                &formed.captain1
            } else {
                &formed.captain2
            },
            match (&formed.map_id, formed.veto_opened) {
                (_, true) => String::new(),
                (Some(map), false) => format!(", playing {}", map),
                (None, false) => ", no veto".to_string(),
            }
        ),
    }
}

/// The match a player is in whose veto is still open
fn veto_match(app: &AppState, player_id: &str) -> Result<MatchId> {
    app.matches_for(player_id)
        .into_iter()
        .find(|match_id| app.veto_registry().summary(*match_id).is_ok())
        .ok_or_else(|| anyhow::anyhow!("{} has no open veto", player_id))
}

fn any_match(app: &AppState, player_id: &str) -> Result<MatchId> {
    app.matches_for(player_id)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("{} is not in a match", player_id))
}

async fn execute(app: &AppState, command: Command) -> Result<String> {
    let coordinator = app.coordinator();
    let registry = app.veto_registry();

    let reply = match command {
        Command::Join { player, best_of } => {
            let size = coordinator.join_raw(&player, best_of).await?;
            format!("{} joined bo{} ({} waiting)", player, best_of, size)
        }
        Command::Leave { player } => match coordinator.leave(&player)? {
            Some(best_of) => format!("{} left the {} queue", player, best_of),
            None => format!("{} was not queued", player),
        },
        Command::Ready { player } => {
            let count = coordinator.mark_ready(&player)?;
            format!("{} is ready ({} ready)", player, count)
        }
        Command::Status { player } => match coordinator.status(&player)? {
            Some(best_of) => format!("{} is queued for {}", player, best_of),
            None => format!("{} is not queued", player),
        },
        Command::Pool { best_of } => {
            let snapshot = coordinator.pool_snapshot(BestOf::try_from(best_of)?)?;
            let mut reply = format!(
                "{}: {}/{} [{}]",
                snapshot.best_of,
                snapshot.players.len(),
                snapshot.required_count,
                snapshot.players.join(", ")
            );
            if let Some(batch) = snapshot.batch {
                reply.push_str(&format!(
                    "\n  ready check #{}: {}/{} ready",
                    batch.generation,
                    batch.ready.len(),
                    batch.members.len()
                ));
            }
            reply
        }
        Command::Ban { player, map } => {
            let record = registry.ban(veto_match(app, &player)?, &player, &map)?;
            format!("team {} banned {}", record.team, record.map_id)
        }
        Command::Pick { player, map } => {
            let record = registry.pick(veto_match(app, &player)?, &player, &map)?;
            format!("team {} picked {}", record.team, record.map_id)
        }
        Command::Side { player, side } => {
            let record = registry.pick_side(veto_match(app, &player)?, &player, side)?;
            format!("team {} takes {} on {}", record.team, side, record.map_id)
        }
        Command::Veto { player } => {
            let match_id = veto_match(app, &player)?;
            let summary = registry.summary(match_id)?;
            let available: Vec<String> = registry
                .available_maps(match_id)?
                .into_iter()
                .map(|m| m.name)
                .collect();

            let next = match summary.current_phase {
                Some(phase) => format!(
                    "phase {}: team {} to {}",
                    phase.order, phase.team, phase.action
                ),
                None => "complete, type 'done'".to_string(),
            };
            format!(
                "veto {} ({}): {}\n  banned: {}\n  picked: {}\n  available: {}",
                short_id(&match_id),
                summary.best_of,
                next,
                summary.banned_maps.join(", "),
                summary
                    .picked_maps
                    .iter()
                    .map(|p| format!("{} (team {})", p.map_id, p.team))
                    .collect::<Vec<_>>()
                    .join(", "),
                available.join(", ")
            )
        }
        Command::Done { player } => {
            let outcome = registry.close(veto_match(app, &player)?)?;
            let maps: Vec<String> = outcome
                .maps
                .iter()
                .enumerate()
                .map(|(i, m)| match m.side {
                    Some(side) => format!("{}. {} ({})", i + 1, m.map_id, side),
                    None => format!("{}. {} (decider)", i + 1, m.map_id),
                })
                .collect();
            format!("maps for {}: {}", short_id(&outcome.match_id), maps.join(", "))
        }
        Command::Score { player, score } => {
            let match_id = any_match(app, &player)?;
            match app.submit_score(match_id, &player, &score)? {
                ScoreSubmission::Pending { score } | ScoreSubmission::Updated { score } => {
                    format!("score {} waiting for the other captain", score)
                }
                ScoreSubmission::Confirmed { score } => format!("score {} confirmed", score),
                ScoreSubmission::Mismatch { previous, score } => format!(
                    "scores disagree ({} vs {}), {} is now pending",
                    previous, score, score
                ),
            }
        }
        Command::Stats => serde_json::to_string_pretty(&coordinator.stats()?)?,
        Command::Help => HELP.to_string(),
        Command::Quit => String::new(),
    };

    Ok(reply)
}

/// Read commands from stdin until EOF or `quit`
async fn console(app: Arc<AppState>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read command: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("! {}", message);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        match execute(&app, command).await {
            Ok(reply) => println!("{}", reply),
            Err(e) => match matchmaking_error(&e) {
                Some(err) => println!("! {}", err),
                None => {
                    warn!("Command failed: {:#}", e);
                    println!("! {}", e);
                }
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    let (notifier, mut notifications) = ChannelNotifier::new();
    let app_state = match AppState::with_notifier(config.clone(), Arc::new(notifier)) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    let mut events = BroadcastStream::new(app_state.subscribe_events());
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let notification_task = tokio::spawn(async move {
        while let Some((player_id, notification)) = notifications.recv().await {
            println!("{}", render_notification(&player_id, &notification));
        }
    });

    let event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => println!("{}", render_event(&event)),
                Err(e) => warn!("Event stream lagged: {}", e),
            }
        }
    });

    let health_task = tokio::spawn(health_check_task(app_state.clone()));

    info!("Scrim Room service is running, type 'help' for commands");

    tokio::select! {
        _ = console(app_state.clone()) => {
            info!("Console closed");
        }
        _ = wait_for_shutdown_signal() => {}
    }

    info!("Beginning graceful shutdown...");
    health_task.abort();

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("Graceful shutdown completed successfully"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    notification_task.abort();
    event_task.abort();

    info!("Scrim Room service stopped");
    Ok(())
}
