//! Typed view over the ledger trees inside one sled transaction.
//!
//! [`LedgerTxn`] is handed to the closure passed to
//! [`LedgerDb::transact`](super::LedgerDb::transact). Every read sees the
//! transaction's own writes, and every write becomes visible to other
//! readers only when the whole closure commits.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use uuid::Uuid;

use super::db::{decode, encode, pair_key, transaction_key};
use crate::governance::error::GovernanceError;
use crate::governance::types::{
    Account, Amount, Member, Vault, VaultTransaction, Vote, WithdrawalRequest,
};
use crate::outbox::{DomainEvent, OutboxEntry};

/// Result type of a transaction closure.
pub(crate) type TxnResult<T> = ConflictableTransactionResult<T, GovernanceError>;

/// Converts a fallible value into a transaction result that aborts on error.
pub(crate) trait OrAbort<T> {
    fn or_abort(self) -> TxnResult<T>;
}

impl<T, E: Into<GovernanceError>> OrAbort<T> for Result<T, E> {
    fn or_abort(self) -> TxnResult<T> {
        self.map_err(|e| ConflictableTransactionError::Abort(e.into()))
    }
}

/// All ledger trees, viewed through one transaction.
pub struct LedgerTxn<'a> {
    pub(crate) vaults: &'a TransactionalTree,
    pub(crate) members: &'a TransactionalTree,
    pub(crate) requests: &'a TransactionalTree,
    pub(crate) vault_requests: &'a TransactionalTree,
    pub(crate) votes: &'a TransactionalTree,
    pub(crate) transactions: &'a TransactionalTree,
    pub(crate) settlements: &'a TransactionalTree,
    pub(crate) accounts: &'a TransactionalTree,
    pub(crate) outbox: &'a TransactionalTree,
}

fn read<T: DeserializeOwned>(tree: &TransactionalTree, key: &[u8]) -> TxnResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(decode(&bytes).or_abort()?)),
        None => Ok(None),
    }
}

fn write<T: Serialize>(tree: &TransactionalTree, key: &[u8], value: &T) -> TxnResult<()> {
    tree.insert(key, encode(value).or_abort()?)?;
    Ok(())
}

impl LedgerTxn<'_> {
    // -- Vaults -------------------------------------------------------------

    /// The vault, or an abort with `NotFound`.
    pub(crate) fn vault(&self, id: &str) -> TxnResult<Vault> {
        read(self.vaults, id.as_bytes())?
            .ok_or_else(|| GovernanceError::not_found("vault", id))
            .or_abort()
    }

    pub(crate) fn put_vault(&self, vault: &Vault) -> TxnResult<()> {
        write(self.vaults, vault.id.as_bytes(), vault)
    }

    // -- Members ------------------------------------------------------------

    pub(crate) fn member(&self, vault_id: &str, user_id: &str) -> TxnResult<Option<Member>> {
        read(self.members, &pair_key(vault_id, user_id))
    }

    /// Returns `true` if `user_id` is an active member of the vault.
    pub(crate) fn is_active_member(&self, vault_id: &str, user_id: &str) -> TxnResult<bool> {
        Ok(self
            .member(vault_id, user_id)?
            .is_some_and(|m| m.is_active()))
    }

    pub(crate) fn put_member(&self, member: &Member) -> TxnResult<()> {
        write(
            self.members,
            &pair_key(&member.vault_id, &member.user_id),
            member,
        )
    }

    // -- Requests -----------------------------------------------------------

    /// The request, or an abort with `NotFound`.
    pub(crate) fn request(&self, id: &str) -> TxnResult<WithdrawalRequest> {
        read(self.requests, id.as_bytes())?
            .ok_or_else(|| GovernanceError::not_found("withdrawal request", id))
            .or_abort()
    }

    /// Stores a new request and indexes it under its vault.
    pub(crate) fn insert_request(&self, request: &WithdrawalRequest) -> TxnResult<()> {
        self.put_request(request)?;
        self.vault_requests
            .insert(pair_key(&request.vault_id, &request.id), Vec::<u8>::new())?;
        Ok(())
    }

    pub(crate) fn put_request(&self, request: &WithdrawalRequest) -> TxnResult<()> {
        write(self.requests, request.id.as_bytes(), request)
    }

    // -- Votes --------------------------------------------------------------

    /// Records a ballot. Aborts with `DuplicateVote` if the member already
    /// has one on this request.
    pub(crate) fn insert_vote(&self, vote: &Vote) -> TxnResult<()> {
        let key = pair_key(&vote.request_id, &vote.member_id);
        let previous = self.votes.insert(key, encode(vote).or_abort()?)?;
        if previous.is_some() {
            return sled::transaction::abort(GovernanceError::DuplicateVote {
                request_id: vote.request_id.clone(),
                member_id: vote.member_id.clone(),
            });
        }
        Ok(())
    }

    // -- History ------------------------------------------------------------

    /// Appends a history entry and returns its storage key.
    pub(crate) fn append_transaction(&self, tx: &VaultTransaction) -> TxnResult<Vec<u8>> {
        let key = transaction_key(&tx.vault_id, tx.sequence);
        write(self.transactions, &key, tx)?;
        Ok(key)
    }

    // -- Settlements --------------------------------------------------------

    /// Returns `true` if the request already has a settlement transaction.
    pub(crate) fn is_settled(&self, request_id: &str) -> TxnResult<bool> {
        Ok(self.settlements.get(request_id.as_bytes())?.is_some())
    }

    pub(crate) fn record_settlement(&self, request_id: &str, tx_key: &[u8]) -> TxnResult<()> {
        self.settlements.insert(request_id.as_bytes(), tx_key)?;
        Ok(())
    }

    // -- Accounts -----------------------------------------------------------

    /// Adds `amount` to an account, opening it at zero if needed.
    pub(crate) fn credit_account(
        &self,
        id: &str,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> TxnResult<Account> {
        let mut account = read(self.accounts, id.as_bytes())?
            .unwrap_or_else(|| Account::empty(id.to_string(), now));
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| {
                GovernanceError::InvalidAmount(format!("credit would overflow account {id}"))
            })
            .or_abort()?;
        account.updated_at = now;
        write(self.accounts, id.as_bytes(), &account)?;
        Ok(account)
    }

    // -- Outbox -------------------------------------------------------------

    /// Queues an event for delivery once this transaction commits.
    pub(crate) fn push_event(&self, event: DomainEvent, now: DateTime<Utc>) -> TxnResult<()> {
        let key = Uuid::now_v7();
        write(self.outbox, key.as_bytes(), &OutboxEntry::new(event, now))
    }
}
