//! # Settlement Executor
//!
//! Turns an approved request into money movement. Runs only inside the
//! transaction that approved the request, so "approved" and "settled" are
//! never observable separately. Logging happens in the engine after the
//! transaction commits, since the closure may run more than once.
//!
//! ## Steps
//!
//! 1. Refuse if the request already has a settlement entry.
//! 2. Recheck the balance. If it no longer covers the amount, reject the
//!    request with `InsufficientFunds` and leave the vault untouched.
//! 3. Debit the vault and append a `withdrawal` history entry.
//! 4. Record the settlement guard and credit the destination account.
//! 5. Queue `RequestApproved`, then close the vault if it is empty.

use chrono::{DateTime, Utc};

use super::error::GovernanceError;
use super::lifecycle::{after_settlement, LifecycleTransition};
use super::types::{
    Amount, RejectionReason, TransactionType, Vault, VaultTransaction, WithdrawalRequest,
};
use crate::outbox::DomainEvent;
use crate::storage::txn::{LedgerTxn, OrAbort, TxnResult};

/// Result of a settlement attempt that did not abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SettlementOutcome {
    /// Funds moved.
    Settled {
        transaction: VaultTransaction,
        vault_closed: bool,
    },
    /// Balance was short; the request is now rejected.
    Failed { requested: Amount, available: Amount },
}

/// Settles `request` against `vault` and writes both back.
///
/// `request` must already be `Approved`. `transaction_id` identifies the
/// history entry written on success.
pub(crate) fn settle(
    txn: &LedgerTxn<'_>,
    vault: &mut Vault,
    request: &mut WithdrawalRequest,
    transaction_id: &str,
    now: DateTime<Utc>,
) -> TxnResult<SettlementOutcome> {
    if txn.is_settled(&request.id)? {
        return sled::transaction::abort(GovernanceError::AlreadyProcessed {
            request_id: request.id.clone(),
            status: request.status,
        });
    }

    let available = vault.current_amount;
    if !vault.is_active() || request.amount > available {
        request.reject(
            RejectionReason::InsufficientFunds {
                requested: request.amount,
                available,
            },
            now,
        );
        txn.put_request(request)?;
        txn.push_event(
            DomainEvent::SettlementFailed {
                vault_id: vault.id.clone(),
                request_id: request.id.clone(),
                requested_by: request.requested_by.clone(),
                requested: request.amount,
                available,
            },
            now,
        )?;
        return Ok(SettlementOutcome::Failed {
            requested: request.amount,
            available,
        });
    }

    let balance_after = vault.debit(request.amount).or_abort()?;
    let entry = VaultTransaction {
        id: transaction_id.to_string(),
        vault_id: vault.id.clone(),
        user_id: request.requested_by.clone(),
        transaction_type: TransactionType::Withdrawal,
        amount: request.amount,
        balance_after,
        description: format!("Withdrawal: {}", request.reason),
        request_id: Some(request.id.clone()),
        sequence: vault.take_sequence(),
        created_at: now,
    };
    let key = txn.append_transaction(&entry)?;
    txn.record_settlement(&request.id, &key)?;

    if let Some(account_id) = &request.destination_account_id {
        txn.credit_account(account_id, request.amount, now)?;
    }

    request.processed_at = Some(now);
    txn.push_event(
        DomainEvent::RequestApproved {
            vault_id: vault.id.clone(),
            request_id: request.id.clone(),
            requested_by: request.requested_by.clone(),
            amount: request.amount,
            balance_after,
        },
        now,
    )?;

    let vault_closed = match after_settlement(vault, now) {
        LifecycleTransition::Closed { closed_at, reason } => {
            txn.push_event(
                DomainEvent::VaultClosed {
                    vault_id: vault.id.clone(),
                    vault_name: vault.name.clone(),
                    reason,
                    closed_at,
                },
                now,
            )?;
            true
        }
        LifecycleTransition::Unchanged => false,
    };

    txn.put_vault(vault)?;
    txn.put_request(request)?;
    Ok(SettlementOutcome::Settled {
        transaction: entry,
        vault_closed,
    })
}
