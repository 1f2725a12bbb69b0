use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Notifications emitted after a successful write to the node registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegistryEvent {
    NodeCreated {
        id: String,
        source_file: String,
        timestamp: DateTime<Utc>,
    },
    NodeUpdated {
        id: String,
        /// Set when the canonical id changed with this update
        previous_id: Option<String>,
        source_file: String,
        timestamp: DateTime<Utc>,
    },
    NodeDeleted {
        id: String,
        timestamp: DateTime<Utc>,
    },
    PluginsReloaded {
        count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl RegistryEvent {
    pub fn created(id: impl Into<String>, source_file: impl Into<String>) -> Self {
        RegistryEvent::NodeCreated {
            id: id.into(),
            source_file: source_file.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn updated(
        id: impl Into<String>,
        previous_id: Option<String>,
        source_file: impl Into<String>,
    ) -> Self {
        RegistryEvent::NodeUpdated {
            id: id.into(),
            previous_id,
            source_file: source_file.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn deleted(id: impl Into<String>) -> Self {
        RegistryEvent::NodeDeleted {
            id: id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn reloaded(count: usize) -> Self {
        RegistryEvent::PluginsReloaded {
            count,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast bus for registry events
pub struct EventBus {
    sender: broadcast::Sender<RegistryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.sender.subscribe()
    }

    /// Send an event; having no subscribers is not an error
    pub fn emit(&self, event: RegistryEvent) {
        let _ = self.sender.send(event);
    }
}
