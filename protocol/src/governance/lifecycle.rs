//! Vault Lifecycle Controller.
//!
//! `active → closed` is one-way and happens only when a settlement leaves
//! the vault with nothing in it.

use chrono::{DateTime, Utc};

use super::types::Vault;
use crate::config::CLOSE_REASON_FULL_WITHDRAWAL;

/// Result of checking a vault after a settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleTransition {
    /// Balance is still positive, or the vault was already closed.
    Unchanged,
    /// The vault was closed by this settlement.
    Closed {
        closed_at: DateTime<Utc>,
        reason: String,
    },
}

/// Closes `vault` if the settlement drained it.
pub fn after_settlement(vault: &mut Vault, now: DateTime<Utc>) -> LifecycleTransition {
    if vault.current_amount > 0 {
        return LifecycleTransition::Unchanged;
    }
    if vault.close(CLOSE_REASON_FULL_WITHDRAWAL, now) {
        LifecycleTransition::Closed {
            closed_at: now,
            reason: CLOSE_REASON_FULL_WITHDRAWAL.to_string(),
        }
    } else {
        LifecycleTransition::Unchanged
    }
}
