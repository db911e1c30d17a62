// Copyright (c) 2026 Tontine Contributors. MIT License.
// See LICENSE for details.

//! # Tontine Protocol — Core Library
//!
//! Withdrawal governance and settlement for shared savings vaults. A group
//! pools money into a vault; nobody takes it back out unless the vault's
//! consensus rule says so, and when it does the money moves exactly once.
//!
//! ## Architecture
//!
//! - **governance** — Domain model, rule evaluation, vote tally, settlement,
//!   vault lifecycle, and the [`GovernanceEngine`](governance::GovernanceEngine)
//!   that ties them together in one transaction per operation.
//! - **storage** — sled-backed ledger: vaults, members, requests, votes,
//!   history, destination accounts, and the membership directory.
//! - **outbox** — Domain events committed alongside state changes, and the
//!   dispatcher that turns them into notifications afterwards.
//! - **config** — Engine constants and runtime tunables.
//!
//! ## Design Philosophy
//!
//! 1. If it touches money, it happens inside a transaction.
//! 2. Uniqueness is a storage key, not an `if` statement.
//! 3. Notifications are a consequence of a commit, never a cause of a
//!    rollback.
//! 4. Status fields are enums. Strings are for humans.

pub mod config;
pub mod governance;
pub mod outbox;
pub mod storage;
