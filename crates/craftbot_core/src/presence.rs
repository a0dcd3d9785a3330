//! Presence tracking: who is currently online.
//!
//! The tracker is the only writer of the presence set. After every presence
//! frame it logs a report line of the form
//!
//! ```text
//! Online players: Alex, Steve
//! Online players: [none]
//! ```
//!
//! External viewers scan the log for the most recent such line, so that
//! format is fixed.

use crate::dispatch::MessageHandler;
use crate::error::DispatchError;
use crate::wire::{InboundMessage, PresenceAction};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::info;

/// Prefix of the presence report line.
pub const REPORT_PREFIX: &str = "Online players: ";
/// Rendered in place of an empty player list.
pub const NONE_MARKER: &str = "[none]";

/// Set of players currently present on the server.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    players: RwLock<BTreeSet<String>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds each name, returning the ones that were not already present.
    pub async fn on_add(&self, names: &[String]) -> Vec<String> {
        let mut players = self.players.write().await;
        let mut added = Vec::new();
        for name in names {
            if players.insert(name.clone()) {
                info!("Player joined: {}", name);
                added.push(name.clone());
            }
        }
        added
    }

    /// Removes each name, returning the ones that were actually present.
    pub async fn on_remove(&self, names: &[String]) -> Vec<String> {
        let mut players = self.players.write().await;
        let mut removed = Vec::new();
        for name in names {
            if players.remove(name) {
                info!("Player left: {}", name);
                removed.push(name.clone());
            }
        }
        removed
    }

    /// Current players, sorted.
    pub async fn snapshot(&self) -> Vec<String> {
        self.players.read().await.iter().cloned().collect()
    }

    /// Forgets everyone and logs the now-empty report.
    ///
    /// Used after a fresh login; the server resends the full list.
    pub async fn reset(&self) {
        self.players.write().await.clear();
        info!("{}", self.report().await);
    }

    /// Report line for the current snapshot.
    pub async fn report(&self) -> String {
        render_report(&self.snapshot().await)
    }

    async fn apply(&self, actions: &[PresenceAction]) {
        for action in actions {
            match action {
                PresenceAction::Add(names) => {
                    self.on_add(names).await;
                }
                PresenceAction::Remove(names) => {
                    self.on_remove(names).await;
                }
            }
        }
        info!("{}", self.report().await);
    }
}

/// Renders a sorted snapshot as a report line.
pub fn render_report(names: &[String]) -> String {
    if names.is_empty() {
        format!("{REPORT_PREFIX}{NONE_MARKER}")
    } else {
        format!("{REPORT_PREFIX}{}", names.join(", "))
    }
}

#[async_trait]
impl MessageHandler for PresenceTracker {
    fn name(&self) -> &'static str {
        "presence"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<(), DispatchError> {
        if let InboundMessage::Presence(update) = message {
            self.apply(&update.actions).await;
        }
        Ok(())
    }
}
