//! WebSocket notification fan-out.
//!
//! [`BroadcastNotifier`] is the node's [`Notifier`]: every notification the
//! dispatcher delivers is pushed onto a broadcast channel that each `/ws`
//! connection subscribes to. Clients filter by `recipients` themselves.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use tontine_protocol::outbox::{NotificationKind, Notifier, NotifyError};

/// Events pushed to WebSocket subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    /// A governance notification.
    #[serde(rename = "notification")]
    Notification {
        kind: NotificationKind,
        recipients: Vec<String>,
        title: String,
        message: String,
        timestamp: i64,
    },
}

/// Forwards notifications to WebSocket subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<NodeEvent>,
}

impl BroadcastNotifier {
    pub fn new(tx: broadcast::Sender<NodeEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(
        &self,
        user_ids: &[String],
        title: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotifyError> {
        let event = NodeEvent::Notification {
            kind,
            recipients: user_ids.to_vec(),
            title: title.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        // No subscribers is not a failure: nobody is listening right now.
        if self.tx.send(event).is_err() {
            tracing::debug!(?kind, "no websocket subscribers for notification");
        }
        Ok(())
    }
}
