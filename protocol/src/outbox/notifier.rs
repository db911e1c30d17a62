//! Notification delivery seam.
//!
//! The engine never calls a [`Notifier`] directly. The dispatcher does,
//! after the state change that produced the event has committed, so a
//! delivery failure can only delay a notification, never undo a settlement.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use super::event::NotificationKind;

/// Why a notification could not be delivered.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The transport is down or refused the message. Worth retrying.
    #[error("notification transport unavailable: {0}")]
    Unavailable(String),

    /// The message was malformed for this transport.
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Delivers a notification to a set of users.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_ids: &[String],
        title: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotifyError>;
}

/// Writes every notification to the log. Useful in tests and as a
/// fallback when no real transport is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_ids: &[String],
        title: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotifyError> {
        info!(?kind, recipients = ?user_ids, title, message, "notification");
        Ok(())
    }
}
