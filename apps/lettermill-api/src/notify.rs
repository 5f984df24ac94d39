//! In-process notification fan-out.
//!
//! Status changes are published to per-group broadcast channels; SSE
//! subscribers attach to the group for their user. Publishing to a group with
//! no subscribers is a no-op, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::models::StatusEvent;

const CHANNEL_CAPACITY: usize = 64;

/// Group name for a user's private notification stream.
pub fn user_group(user_id: &str) -> String {
    format!("user_{user_id}")
}

#[derive(Clone, Default)]
pub struct Notifier {
    groups: Arc<RwLock<HashMap<String, broadcast::Sender<StatusEvent>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a group, creating its channel on first use.
    pub async fn subscribe(&self, group: &str) -> broadcast::Receiver<StatusEvent> {
        let mut groups = self.groups.write().await;
        groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to a group. Best-effort: missing groups and lagging
    /// receivers are ignored.
    pub async fn publish(&self, group: &str, event: StatusEvent) {
        let groups = self.groups.read().await;
        if let Some(sender) = groups.get(group) {
            let delivered = sender.send(event).unwrap_or(0);
            debug!(group, delivered, "published status event");
        } else {
            debug!(group, "no subscribers for status event");
        }
    }
}
