//! # LedgerDb — Persistent Ledger Store
//!
//! The persistence layer for vaults, membership, withdrawal governance and
//! settlement history, built on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree             | Key                              | Value                      |
//! |------------------|----------------------------------|----------------------------|
//! | `vaults`         | `vault_id`                       | `bincode(Vault)`           |
//! | `members`        | `vault_id/user_id`               | `bincode(Member)`          |
//! | `requests`       | `request_id`                     | `bincode(WithdrawalRequest)` |
//! | `vault_requests` | `vault_id/request_id`            | empty (index)              |
//! | `votes`          | `request_id/member_id`           | `bincode(Vote)`            |
//! | `transactions`   | `vault_id/` + `sequence` (8B BE) | `bincode(VaultTransaction)` |
//! | `settlements`    | `request_id`                     | transaction key            |
//! | `accounts`       | `account_id`                     | `bincode(Account)`         |
//! | `outbox`         | `event_id` (UUIDv7)              | `bincode(OutboxEntry)`     |
//!
//! Sequences are stored big-endian so that sled's lexicographic ordering
//! matches append order, and request/event ids are UUIDv7 so they sort by
//! creation time.
//!
//! ## Atomicity
//!
//! Every state-changing operation runs through [`LedgerDb::transact`], a
//! single sled transaction spanning all trees. sled transactions are
//! serializable and retried automatically on conflict: either every write
//! of an operation lands or none does.

use serde::de::DeserializeOwned;
use sled::transaction::TransactionError;
use sled::{Db, IVec, Transactional, Tree};
use std::path::Path;
use tracing::warn;

use super::txn::{LedgerTxn, TxnResult};
use crate::governance::error::GovernanceError;
use crate::governance::types::{
    Account, Member, Vault, VaultTransaction, Vote, WithdrawalRequest,
};
use crate::outbox::OutboxEntry;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// `parent/child` composite key.
pub(crate) fn pair_key(parent: &str, child: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(parent.len() + child.len() + 1);
    key.extend_from_slice(parent.as_bytes());
    key.push(b'/');
    key.extend_from_slice(child.as_bytes());
    key
}

/// `parent/` prefix for range scans.
pub(crate) fn prefix(parent: &str) -> Vec<u8> {
    let mut key = parent.as_bytes().to_vec();
    key.push(b'/');
    key
}

/// `vault_id/` followed by the big-endian sequence number.
pub(crate) fn transaction_key(vault_id: &str, sequence: u64) -> Vec<u8> {
    let mut key = prefix(vault_id);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Persistent store for every record the governance engine touches.
///
/// Cheap to clone: sled handles are reference counted, and all trees
/// support concurrent reads with serialized transactional writes.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    db: Db,
    vaults: Tree,
    members: Tree,
    requests: Tree,
    vault_requests: Tree,
    votes: Tree,
    transactions: Tree,
    settlements: Tree,
    accounts: Tree,
    outbox: Tree,
}

impl LedgerDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when dropped.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        Ok(Self {
            vaults: db.open_tree("vaults")?,
            members: db.open_tree("members")?,
            requests: db.open_tree("requests")?,
            vault_requests: db.open_tree("vault_requests")?,
            votes: db.open_tree("votes")?,
            transactions: db.open_tree("transactions")?,
            settlements: db.open_tree("settlements")?,
            accounts: db.open_tree("accounts")?,
            outbox: db.open_tree("outbox")?,
            db,
        })
    }

    /// Runs `op` as one serializable transaction across every tree.
    ///
    /// `op` may be invoked more than once if sled detects a conflict, so it
    /// must not have side effects outside the transaction view. Aborts
    /// surface as the [`GovernanceError`] they carry; the writes of an
    /// aborted attempt are discarded.
    ///
    /// Once sled commits, the value is returned even if the follow-up flush
    /// fails; that failure is only logged, and sled flushes again on its
    /// own schedule.
    pub(crate) fn transact<T, F>(&self, op: F) -> Result<T, GovernanceError>
    where
        F: Fn(&LedgerTxn<'_>) -> TxnResult<T>,
    {
        let result = (
            &self.vaults,
            &self.members,
            &self.requests,
            &self.vault_requests,
            &self.votes,
            &self.transactions,
            &self.settlements,
            &self.accounts,
            &self.outbox,
        )
            .transaction(
                |(
                    vaults,
                    members,
                    requests,
                    vault_requests,
                    votes,
                    transactions,
                    settlements,
                    accounts,
                    outbox,
                )| {
                    let txn = LedgerTxn {
                        vaults,
                        members,
                        requests,
                        vault_requests,
                        votes,
                        transactions,
                        settlements,
                        accounts,
                        outbox,
                    };
                    op(&txn)
                },
            );

        match result {
            Ok(value) => {
                // Already committed.
                if let Err(err) = self.flush() {
                    warn!(error = %err, "flush after commit failed");
                }
                Ok(value)
            }
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(DbError::Sled(err).into()),
        }
    }

    // -- Point lookups ------------------------------------------------------

    fn get<T: DeserializeOwned>(tree: &Tree, key: impl AsRef<[u8]>) -> DbResult<Option<T>> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(tree: &Tree, parent: &str) -> DbResult<Vec<T>> {
        let mut out = Vec::new();
        for item in tree.scan_prefix(prefix(parent)) {
            let (_key, value) = item?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    /// Retrieve a vault by id.
    pub fn vault(&self, id: &str) -> DbResult<Option<Vault>> {
        Self::get(&self.vaults, id.as_bytes())
    }

    /// Retrieve a membership record.
    pub fn member(&self, vault_id: &str, user_id: &str) -> DbResult<Option<Member>> {
        Self::get(&self.members, pair_key(vault_id, user_id))
    }

    /// Every membership record of a vault, active or removed.
    pub fn members_of(&self, vault_id: &str) -> DbResult<Vec<Member>> {
        Self::scan(&self.members, vault_id)
    }

    /// Retrieve a withdrawal request by id.
    pub fn request(&self, id: &str) -> DbResult<Option<WithdrawalRequest>> {
        Self::get(&self.requests, id.as_bytes())
    }

    /// Every withdrawal request of a vault, oldest first.
    pub fn requests_for_vault(&self, vault_id: &str) -> DbResult<Vec<WithdrawalRequest>> {
        let mut out = Vec::new();
        for item in self.vault_requests.scan_prefix(prefix(vault_id)) {
            let (key, _) = item?;
            let request_id = &key[vault_id.len() + 1..];
            match Self::get(&self.requests, request_id)? {
                Some(request) => out.push(request),
                None => {
                    return Err(DbError::NotFound(
                        String::from_utf8_lossy(request_id).into_owned(),
                    ))
                }
            }
        }
        Ok(out)
    }

    /// Every vote cast on a request.
    pub fn votes_for_request(&self, request_id: &str) -> DbResult<Vec<Vote>> {
        Self::scan(&self.votes, request_id)
    }

    /// The vault's transaction history in append order.
    pub fn transactions_for_vault(&self, vault_id: &str) -> DbResult<Vec<VaultTransaction>> {
        Self::scan(&self.transactions, vault_id)
    }

    /// The settlement transaction of a request, if it was settled.
    pub fn settlement_for(&self, request_id: &str) -> DbResult<Option<VaultTransaction>> {
        match self.settlements.get(request_id.as_bytes())? {
            Some(tx_key) => Self::get(&self.transactions, tx_key),
            None => Ok(None),
        }
    }

    /// Retrieve a destination account.
    pub fn account(&self, id: &str) -> DbResult<Option<Account>> {
        Self::get(&self.accounts, id.as_bytes())
    }

    // -- Outbox -------------------------------------------------------------

    /// Up to `limit` outbox entries in recording order.
    ///
    /// Entries are decoded one by one, so a corrupt record only fails its
    /// own slot. Read errors on the tree itself still fail the batch.
    pub fn outbox_batch(&self, limit: usize) -> DbResult<Vec<(IVec, DbResult<OutboxEntry>)>> {
        let mut out = Vec::with_capacity(limit);
        for item in self.outbox.iter().take(limit) {
            let (key, value) = item?;
            out.push((key, decode(&value)));
        }
        Ok(out)
    }

    /// Overwrite an outbox entry (used to bump its attempt counter).
    pub fn update_outbox(&self, key: &IVec, entry: &OutboxEntry) -> DbResult<()> {
        self.outbox.insert(key, encode(entry)?)?;
        Ok(())
    }

    /// Remove a delivered or abandoned outbox entry.
    pub fn remove_outbox(&self, key: &IVec) -> DbResult<()> {
        self.outbox.remove(key)?;
        Ok(())
    }

    // -- Utility ------------------------------------------------------------

    /// Number of vaults stored.
    pub fn vault_count(&self) -> usize {
        self.vaults.len()
    }

    /// Number of withdrawal requests stored.
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Number of votes stored.
    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    /// Number of events waiting in the outbox.
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::types::WithdrawalRule;

    #[test]
    fn open_temporary_database() {
        let db = LedgerDb::open_temporary().expect("should create temp db");
        assert_eq!(db.vault_count(), 0);
        assert_eq!(db.request_count(), 0);
        assert_eq!(db.outbox_len(), 0);
    }

    #[test]
    fn open_persistent_database_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault_id = {
            let db = LedgerDb::open(dir.path()).expect("should open db");
            let vault = db
                .create_vault("Rent pool", "alice", WithdrawalRule::MajorityVote)
                .unwrap();
            vault.id
        };

        let db = LedgerDb::open(dir.path()).expect("should reopen db");
        let vault = db.vault(&vault_id).unwrap().expect("vault persisted");
        assert_eq!(vault.name, "Rent pool");
        assert_eq!(vault.active_members, 1);
    }

    #[test]
    fn missing_records_return_none() {
        let db = LedgerDb::open_temporary().unwrap();
        assert!(db.vault("nope").unwrap().is_none());
        assert!(db.request("nope").unwrap().is_none());
        assert!(db.account("nope").unwrap().is_none());
        assert!(db.settlement_for("nope").unwrap().is_none());
        assert!(db.votes_for_request("nope").unwrap().is_empty());
    }

    #[test]
    fn transaction_keys_sort_by_sequence() {
        let a = transaction_key("v", 1);
        let b = transaction_key("v", 2);
        let c = transaction_key("v", 256);
        assert!(a < b && b < c);
        assert!(a.starts_with(&prefix("v")));
    }

    #[test]
    fn prefixes_do_not_bleed_between_parents() {
        // "v1/" must not match keys of vault "v10".
        assert!(!pair_key("v10", "bob").starts_with(&prefix("v1")));
        assert!(pair_key("v1", "bob").starts_with(&prefix("v1")));
    }

    #[test]
    fn corrupt_outbox_entry_fails_only_its_slot() {
        let db = LedgerDb::open_temporary().unwrap();
        let vault = db
            .create_vault("Outbox", "alice", WithdrawalRule::CreatorOnly)
            .unwrap();
        db.outbox.insert([0u8; 16], vec![0xff, 0xff]).unwrap();
        db.transact(|txn| {
            txn.push_event(
                crate::outbox::DomainEvent::VaultClosed {
                    vault_id: vault.id.clone(),
                    vault_name: vault.name.clone(),
                    reason: "full withdrawal".into(),
                    closed_at: chrono::Utc::now(),
                },
                chrono::Utc::now(),
            )
        })
        .unwrap();

        let batch = db.outbox_batch(10).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].1.is_err());
        assert!(batch[1].1.is_ok());
    }

    #[test]
    fn aborted_transaction_leaves_no_trace() {
        let db = LedgerDb::open_temporary().unwrap();
        let vault = db
            .create_vault("Abort test", "alice", WithdrawalRule::Unanimous)
            .unwrap();

        let result: Result<(), GovernanceError> = db.transact(|txn| {
            let mut v = txn.vault(&vault.id)?;
            v.current_amount = 1_000;
            txn.put_vault(&v)?;
            sled::transaction::abort(GovernanceError::InvalidRequest("boom".into()))
        });

        assert!(matches!(result, Err(GovernanceError::InvalidRequest(_))));
        assert_eq!(db.vault(&vault.id).unwrap().unwrap().current_amount, 0);
    }
}
