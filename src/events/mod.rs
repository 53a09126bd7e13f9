//! Fire-and-forget notifications of block state changes.
//!
//! The limiter publishes on an [`EventBus`]; listeners such as the firewall
//! integration subscribe and react on their own tasks. Publishing never
//! fails from the limiter's point of view.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::core::BlockRecord;

/// Block state changes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SecurityEvent {
    IpBlocked { ip: String, record: BlockRecord },
    IpUnblocked { ip: String, actor: String },
}

impl SecurityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SecurityEvent::IpBlocked { .. } => "ip_blocked",
            SecurityEvent::IpUnblocked { .. } => "ip_unblocked",
        }
    }

    pub fn ip(&self) -> &str {
        match self {
            SecurityEvent::IpBlocked { ip, .. } | SecurityEvent::IpUnblocked { ip, .. } => ip,
        }
    }
}

/// An event as delivered to listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityNotification {
    pub id: Uuid,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SecurityEvent,
}

/// Broadcast channel for [`SecurityNotification`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SecurityNotification>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SecurityNotification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Broadcast `event` to current subscribers; returns how many received it
    pub fn publish(&self, event: SecurityEvent) -> usize {
        let name = event.name();
        let notification = SecurityNotification {
            id: Uuid::new_v4(),
            emitted_at: Utc::now(),
            event,
        };

        match self.sender.send(notification) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!(event = name, "No listeners for security event");
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
