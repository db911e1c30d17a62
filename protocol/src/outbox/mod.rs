//! # Event Outbox
//!
//! Notifications are a side effect of governance, not part of it. The
//! engine records a [`DomainEvent`] in the `outbox` tree inside the same
//! transaction as the state change; the [`Dispatcher`] later drains the
//! outbox and calls a [`Notifier`]. Nothing in this module runs inside a
//! ledger transaction, and nothing it does can roll one back.

pub mod dispatcher;
pub mod event;
pub mod notifier;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use event::{Audience, DomainEvent, NotificationKind, OutboxEntry};
pub use notifier::{LogNotifier, Notifier, NotifyError};
