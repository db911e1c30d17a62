//! Domain events recorded by the engine.
//!
//! Events are appended to the outbox in the same transaction as the state
//! change they describe, so an event exists if and only if the change
//! committed. Each event knows its audience and how to phrase itself; the
//! dispatcher resolves the audience to user ids at delivery time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::governance::types::Amount;

/// Who should hear about an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Audience {
    /// A single user.
    User(String),
    /// Every active member of a vault, optionally minus one user.
    VaultMembers {
        vault_id: String,
        except: Option<String>,
    },
}

/// Notification category handed to the [`Notifier`](super::Notifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    WithdrawalRequested,
    WithdrawalApproved,
    WithdrawalRejected,
    SettlementFailed,
    VaultClosed,
}

/// An externally visible state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A request is waiting for votes.
    WithdrawalRequested {
        vault_id: String,
        request_id: String,
        requested_by: String,
        amount: Amount,
        reason: String,
        total_votes_required: u32,
    },
    /// A request was approved and settled.
    RequestApproved {
        vault_id: String,
        request_id: String,
        requested_by: String,
        amount: Amount,
        balance_after: Amount,
    },
    /// A request was voted down.
    RequestRejected {
        vault_id: String,
        request_id: String,
        requested_by: String,
        votes_yes: u32,
        votes_no: u32,
    },
    /// Quorum was reached but the vault could not cover the amount.
    SettlementFailed {
        vault_id: String,
        request_id: String,
        requested_by: String,
        requested: Amount,
        available: Amount,
    },
    /// A settlement drained the vault.
    VaultClosed {
        vault_id: String,
        vault_name: String,
        reason: String,
        closed_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The vault this event belongs to.
    pub fn vault_id(&self) -> &str {
        match self {
            DomainEvent::WithdrawalRequested { vault_id, .. }
            | DomainEvent::RequestApproved { vault_id, .. }
            | DomainEvent::RequestRejected { vault_id, .. }
            | DomainEvent::SettlementFailed { vault_id, .. }
            | DomainEvent::VaultClosed { vault_id, .. } => vault_id,
        }
    }

    /// Who gets notified.
    pub fn audience(&self) -> Audience {
        match self {
            DomainEvent::WithdrawalRequested {
                vault_id,
                requested_by,
                ..
            } => Audience::VaultMembers {
                vault_id: vault_id.clone(),
                except: Some(requested_by.clone()),
            },
            DomainEvent::RequestApproved { requested_by, .. }
            | DomainEvent::RequestRejected { requested_by, .. }
            | DomainEvent::SettlementFailed { requested_by, .. } => {
                Audience::User(requested_by.clone())
            }
            DomainEvent::VaultClosed { vault_id, .. } => Audience::VaultMembers {
                vault_id: vault_id.clone(),
                except: None,
            },
        }
    }

    pub fn kind(&self) -> NotificationKind {
        match self {
            DomainEvent::WithdrawalRequested { .. } => NotificationKind::WithdrawalRequested,
            DomainEvent::RequestApproved { .. } => NotificationKind::WithdrawalApproved,
            DomainEvent::RequestRejected { .. } => NotificationKind::WithdrawalRejected,
            DomainEvent::SettlementFailed { .. } => NotificationKind::SettlementFailed,
            DomainEvent::VaultClosed { .. } => NotificationKind::VaultClosed,
        }
    }

    /// Short notification title.
    pub fn title(&self) -> String {
        match self {
            DomainEvent::WithdrawalRequested { .. } => "Withdrawal vote needed".to_string(),
            DomainEvent::RequestApproved { .. } => "Withdrawal approved".to_string(),
            DomainEvent::RequestRejected { .. } => "Withdrawal rejected".to_string(),
            DomainEvent::SettlementFailed { .. } => "Withdrawal could not be settled".to_string(),
            DomainEvent::VaultClosed { vault_name, .. } => format!("Vault \"{vault_name}\" closed"),
        }
    }

    /// Notification body.
    pub fn message(&self) -> String {
        match self {
            DomainEvent::WithdrawalRequested {
                requested_by,
                amount,
                reason,
                total_votes_required,
                ..
            } => format!(
                "{requested_by} requested {amount} ({reason}); {total_votes_required} yes vote(s) needed"
            ),
            DomainEvent::RequestApproved {
                amount,
                balance_after,
                ..
            } => format!(
                "Your withdrawal of {amount} was settled; vault balance is now {balance_after}"
            ),
            DomainEvent::RequestRejected {
                votes_yes,
                votes_no,
                ..
            } => format!("Your withdrawal was rejected ({votes_yes} yes, {votes_no} no)"),
            DomainEvent::SettlementFailed {
                requested,
                available,
                ..
            } => format!(
                "Your withdrawal of {requested} was approved but only {available} remained in the vault"
            ),
            DomainEvent::VaultClosed { reason, .. } => {
                format!("The vault was closed after a {reason}")
            }
        }
    }
}

/// An event waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub event: DomainEvent,
    pub recorded_at: DateTime<Utc>,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

impl OutboxEntry {
    pub fn new(event: DomainEvent, recorded_at: DateTime<Utc>) -> Self {
        Self {
            event,
            recorded_at,
            attempts: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_notifies_everyone_but_the_requester() {
        let event = DomainEvent::WithdrawalRequested {
            vault_id: "v1".into(),
            request_id: "r1".into(),
            requested_by: "bob".into(),
            amount: 250,
            reason: "medical bill".into(),
            total_votes_required: 2,
        };
        assert_eq!(
            event.audience(),
            Audience::VaultMembers {
                vault_id: "v1".into(),
                except: Some("bob".into())
            }
        );
        assert_eq!(event.kind(), NotificationKind::WithdrawalRequested);
        assert!(event.message().contains("medical bill"));
    }

    #[test]
    fn closure_is_broadcast_to_all_members() {
        let event = DomainEvent::VaultClosed {
            vault_id: "v1".into(),
            vault_name: "Holiday".into(),
            reason: "full withdrawal".into(),
            closed_at: Utc::now(),
        };
        assert_eq!(
            event.audience(),
            Audience::VaultMembers {
                vault_id: "v1".into(),
                except: None
            }
        );
        assert_eq!(event.title(), "Vault \"Holiday\" closed");
        assert_eq!(event.vault_id(), "v1");
    }

    #[test]
    fn outcomes_go_to_the_requester() {
        let event = DomainEvent::RequestRejected {
            vault_id: "v1".into(),
            request_id: "r1".into(),
            requested_by: "carol".into(),
            votes_yes: 1,
            votes_no: 3,
        };
        assert_eq!(event.audience(), Audience::User("carol".into()));
        assert_eq!(event.message(), "Your withdrawal was rejected (1 yes, 3 no)");
    }

    #[test]
    fn outbox_entry_survives_bincode() {
        let entry = OutboxEntry::new(
            DomainEvent::SettlementFailed {
                vault_id: "v".into(),
                request_id: "r".into(),
                requested_by: "dan".into(),
                requested: 10,
                available: 3,
            },
            Utc::now(),
        );
        let bytes = bincode::serialize(&entry).unwrap();
        let back: OutboxEntry = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, entry);
    }
}
