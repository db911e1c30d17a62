//! # Storage Module
//!
//! Persistent ledger for the governance engine. Vaults, members, requests,
//! votes, the append-only transaction history, destination accounts and the
//! event outbox all live in one sled database.
//!
//! ## Architecture
//!
//! ```text
//! db.rs        — LedgerDb: trees, point queries, the transaction entry point
//! txn.rs       — LedgerTxn: typed reads/writes inside one sled transaction
//! admin.rs     — vault creation, membership, deposits, account credits
//! directory.rs — MembershipDirectory trait, implemented by LedgerDb
//! ```
//!
//! ## Design Decisions
//!
//! 1. **One transaction per governed operation.** Balance check, vote
//!    insert, counter update, settlement, closure and outbox append commit
//!    together or not at all.
//!
//! 2. **Uniqueness lives in keys.** A vote is keyed by `(request, member)`
//!    and a settlement by `request`, so a second write for the same key is
//!    detected inside the transaction that attempts it.
//!
//! 3. **Bincode for on-disk serialization.** JSON is for the API; bincode
//!    is for storage.

pub mod admin;
pub mod db;
pub mod directory;
pub(crate) mod txn;

pub use db::{DbError, DbResult, LedgerDb};
pub use directory::MembershipDirectory;
