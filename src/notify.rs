//! Outbound player notifications
//!
//! The coordinator tells players about ready checks, evictions and formed
//! matches through a [`Notifier`]. How a notification is rendered and
//! delivered (direct message, console line, test log) is up to the
//! implementation.

use crate::error::{MatchmakingError, Result};
use crate::types::{Notification, PlayerId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Trait for delivering a notification to one player
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `notification` to `player_id`. An error means the player
    /// could not be reached.
    async fn notify(&self, player_id: &str, notification: &Notification) -> Result<()>;
}

/// Notifier that only writes to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, player_id: &str, notification: &Notification) -> Result<()> {
        info!("Notify {}: {:?}", player_id, notification);
        Ok(())
    }
}

/// Notifier that forwards every notification into an mpsc channel.
///
/// Delivery fails once the receiving side is dropped.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<(PlayerId, Notification)>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(PlayerId, Notification)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, player_id: &str, notification: &Notification) -> Result<()> {
        self.sender
            .send((player_id.to_string(), notification.clone()))
            .map_err(|_| {
                MatchmakingError::UserUnreachable {
                    player_ids: vec![player_id.to_string()],
                }
                .into()
            })
    }
}

/// Mock notifier for tests and the simulator.
///
/// Records every delivered notification; players marked unreachable fail
/// delivery and are not recorded.
#[derive(Debug, Default)]
pub struct MockNotifier {
    delivered: Mutex<Vec<(PlayerId, Notification)>>,
    unreachable: Mutex<HashSet<PlayerId>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to `player_id` fail from now on
    pub fn set_unreachable(&self, player_id: &str) {
        if let Ok(mut unreachable) = self.unreachable.lock() {
            unreachable.insert(player_id.to_string());
        }
    }

    pub fn set_reachable(&self, player_id: &str) {
        if let Ok(mut unreachable) = self.unreachable.lock() {
            unreachable.remove(player_id);
        }
    }

    /// All delivered notifications in delivery order
    pub fn delivered(&self) -> Vec<(PlayerId, Notification)> {
        self.delivered
            .lock()
            .map(|delivered| delivered.clone())
            .unwrap_or_default()
    }

    /// Notifications delivered to a single player
    pub fn delivered_to(&self, player_id: &str) -> Vec<Notification> {
        self.delivered()
            .into_iter()
            .filter(|(id, _)| id == player_id)
            .map(|(_, notification)| notification)
            .collect()
    }

    /// Count delivered notifications matching `predicate`
    pub fn count(&self, predicate: impl Fn(&Notification) -> bool) -> usize {
        self.delivered()
            .iter()
            .filter(|(_, notification)| predicate(notification))
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.clear();
        }
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, player_id: &str, notification: &Notification) -> Result<()> {
        let unreachable = self
            .unreachable
            .lock()
            .map(|set| set.contains(player_id))
            .unwrap_or(false);

        if unreachable {
            debug!("Mock delivery to {} failed", player_id);
            return Err(MatchmakingError::UserUnreachable {
                player_ids: vec![player_id.to_string()],
            }
            .into());
        }

        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push((player_id.to_string(), notification.clone()));
        }
        Ok(())
    }
}
