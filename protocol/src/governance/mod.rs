//! # Governance Module
//!
//! Withdrawal governance for shared vaults: who may ask for money, how many
//! members must agree, and what happens when they do.
//!
//! ## Architecture
//!
//! ```text
//! types.rs      — Vault, Member, WithdrawalRequest, Vote, VaultTransaction
//! rule.rs       — Consensus Rule Evaluator: rule + membership → quorum
//! tally.rs      — Tally Engine: one ballot → pending / approved / rejected
//! settlement.rs — Settlement Executor: debit, history, destination credit
//! lifecycle.rs  — Vault Lifecycle Controller: active → closed at zero
//! engine.rs     — GovernanceEngine: the transactional entry points
//! error.rs      — GovernanceError and its stable error codes
//! ```
//!
//! ## Request State Machine
//!
//! ```text
//! (created) ──▶ pending ──▶ approved ──▶ settled
//!     │            │
//!     │            └──────▶ rejected   (outvoted, or short at settlement)
//!     └─ creator_only, requester == creator ──▶ approved ──▶ settled
//! ```

pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod rule;
pub(crate) mod settlement;
pub mod tally;
pub mod types;

pub use engine::{CastVote, GovernanceEngine, SubmitWithdrawal, VoteReceipt, WithdrawalReceipt};
pub use error::{ErrorKind, GovernanceError};
pub use rule::{Quorum, RejectionThreshold, RuleError};
pub use tally::TallyOutcome;
pub use types::{
    Account, Amount, Member, MemberStatus, RejectionReason, RequestStatus, TransactionType,
    Vault, VaultStatus, VaultTransaction, Vote, WithdrawalRequest, WithdrawalRule,
};
