//! # Domain Model
//!
//! Vaults, members, withdrawal requests, votes and the append-only
//! transaction history. Every status field is an enum rather than a string
//! so that an impossible state does not compile.
//!
//! All amounts are `u64` in minor units (cents, or whatever the smallest
//! denomination of the vault's currency is). Unsigned storage makes a
//! negative balance unrepresentable; checked arithmetic makes an overflow
//! an error instead of a silent wrap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::GovernanceError;

/// Monetary amount in minor units.
pub type Amount = u64;

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Consensus rule configured per vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalRule {
    /// Only the creator may withdraw, and their requests approve themselves.
    CreatorOnly,
    /// Half the active members (rounded up) must vote yes.
    MajorityVote,
    /// Every active member must vote yes.
    Unanimous,
}

impl std::fmt::Display for WithdrawalRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WithdrawalRule::CreatorOnly => write!(f, "creator_only"),
            WithdrawalRule::MajorityVote => write!(f, "majority_vote"),
            WithdrawalRule::Unanimous => write!(f, "unanimous"),
        }
    }
}

/// Lifecycle of a vault. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    /// Accepting deposits and withdrawal requests.
    Active,
    /// Drained by a settlement. No further debits.
    Closed,
}

impl std::fmt::Display for VaultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultStatus::Active => write!(f, "active"),
            VaultStatus::Closed => write!(f, "closed"),
        }
    }
}

/// A shared savings pool governed by a withdrawal rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Pooled balance in minor units.
    pub current_amount: Amount,
    /// Consensus rule applied to withdrawal requests.
    pub withdrawal_rule: WithdrawalRule,
    /// User who created the vault.
    pub creator_id: String,
    /// Current lifecycle status.
    pub status: VaultStatus,
    /// Cached number of members with `MemberStatus::Active`.
    ///
    /// Maintained inside the same transaction as every membership change so
    /// quorum math never has to scan the member tree.
    pub active_members: u32,
    /// Sequence number the next history entry will receive.
    pub next_sequence: u64,
    /// When the vault was created.
    pub created_at: DateTime<Utc>,
    /// When the vault was closed, if it has been.
    pub closed_at: Option<DateTime<Utc>>,
    /// Why the vault was closed, if it has been.
    pub close_reason: Option<String>,
}

impl Vault {
    /// Creates an empty, active vault. The creator is not counted as a
    /// member here; membership is recorded separately.
    pub fn new(name: String, creator_id: String, withdrawal_rule: WithdrawalRule) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            current_amount: 0,
            withdrawal_rule,
            creator_id,
            status: VaultStatus::Active,
            active_members: 0,
            next_sequence: 0,
            created_at: Utc::now(),
            closed_at: None,
            close_reason: None,
        }
    }

    /// Returns `true` while the vault accepts new activity.
    pub fn is_active(&self) -> bool {
        self.status == VaultStatus::Active
    }

    /// Fails with [`GovernanceError::VaultClosed`] if the vault is closed.
    pub fn ensure_active(&self) -> Result<(), GovernanceError> {
        match self.status {
            VaultStatus::Active => Ok(()),
            VaultStatus::Closed => Err(GovernanceError::VaultClosed(self.id.clone())),
        }
    }

    /// Adds funds and returns the new balance.
    pub fn credit(&mut self, amount: Amount) -> Result<Amount, GovernanceError> {
        self.ensure_active()?;
        self.current_amount = self.current_amount.checked_add(amount).ok_or_else(|| {
            GovernanceError::InvalidAmount(format!(
                "deposit of {amount} would overflow vault balance {}",
                self.current_amount
            ))
        })?;
        Ok(self.current_amount)
    }

    /// Removes funds and returns the new balance. Never goes below zero.
    pub fn debit(&mut self, amount: Amount) -> Result<Amount, GovernanceError> {
        self.ensure_active()?;
        self.current_amount = self.current_amount.checked_sub(amount).ok_or(
            GovernanceError::InsufficientFunds {
                requested: amount,
                available: self.current_amount,
            },
        )?;
        Ok(self.current_amount)
    }

    /// Marks the vault closed. Returns `false` if it was already closed.
    pub fn close(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if self.status == VaultStatus::Closed {
            return false;
        }
        self.status = VaultStatus::Closed;
        self.closed_at = Some(now);
        self.close_reason = Some(reason.to_string());
        true
    }

    /// Hands out the next history sequence number.
    pub(crate) fn take_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }
}

// ---------------------------------------------------------------------------
// Member
// ---------------------------------------------------------------------------

/// Membership status. Only active members vote or count toward quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Removed,
}

/// A user's membership in a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub vault_id: String,
    pub user_id: String,
    pub status: MemberStatus,
    pub joined_at: DateTime<Utc>,
}

impl Member {
    /// Returns `true` if this member may vote and counts toward quorum.
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

// ---------------------------------------------------------------------------
// Withdrawal requests
// ---------------------------------------------------------------------------

/// Resolution status of a withdrawal request.
///
/// `Approved` and `Rejected` are terminal: once written, neither the status
/// nor the vote counters change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    /// Returns `true` for `Approved` and `Rejected`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Approved => write!(f, "approved"),
            RequestStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Why a request ended up `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The "no" votes crossed the rejection threshold.
    Outvoted,
    /// Quorum was reached but the vault could no longer cover the amount.
    InsufficientFunds { requested: Amount, available: Amount },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::Outvoted => write!(f, "outvoted"),
            RejectionReason::InsufficientFunds {
                requested,
                available,
            } => write!(
                f,
                "insufficient funds at settlement: requested {requested}, available {available}"
            ),
        }
    }
}

/// A member's request to withdraw from a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    /// Unique, time-ordered identifier.
    pub id: String,
    pub vault_id: String,
    pub requested_by: String,
    pub amount: Amount,
    pub reason: String,
    /// Account credited on settlement, if any.
    pub destination_account_id: Option<String>,
    pub status: RequestStatus,
    pub votes_yes: u32,
    pub votes_no: u32,
    /// Yes votes needed to approve. Fixed at creation.
    pub total_votes_required: u32,
    /// Active member count at creation. Fixed at creation; later
    /// membership changes do not alter the quorum of this request.
    pub eligible_voters: u32,
    /// Set when `status` is `Rejected`.
    pub rejection: Option<RejectionReason>,
    pub created_at: DateTime<Utc>,
    /// Set when `status` leaves `Pending`.
    pub processed_at: Option<DateTime<Utc>>,
}

impl WithdrawalRequest {
    /// Builds a fresh `Pending` request with zeroed counters.
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        id: String,
        vault_id: String,
        requested_by: String,
        amount: Amount,
        reason: String,
        destination_account_id: Option<String>,
        total_votes_required: u32,
        eligible_voters: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            vault_id,
            requested_by,
            amount,
            reason,
            destination_account_id,
            status: RequestStatus::Pending,
            votes_yes: 0,
            votes_no: 0,
            total_votes_required,
            eligible_voters,
            rejection: None,
            created_at,
            processed_at: None,
        }
    }

    /// Fails with [`GovernanceError::AlreadyProcessed`] unless pending.
    pub fn ensure_pending(&self) -> Result<(), GovernanceError> {
        if self.status.is_terminal() {
            return Err(GovernanceError::AlreadyProcessed {
                request_id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Moves a pending request to `Approved`.
    pub(crate) fn approve(&mut self, now: DateTime<Utc>) {
        self.status = RequestStatus::Approved;
        self.processed_at = Some(now);
    }

    /// Moves a request to `Rejected` with the given cause.
    pub(crate) fn reject(&mut self, reason: RejectionReason, now: DateTime<Utc>) {
        self.status = RequestStatus::Rejected;
        self.rejection = Some(reason);
        self.processed_at = Some(now);
    }
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

/// One member's ballot on one request. At most one per (request, member).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub vault_id: String,
    pub request_id: String,
    pub member_id: String,
    /// `true` for yes.
    pub vote: bool,
    pub comment: Option<String>,
    pub cast_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Transaction history
// ---------------------------------------------------------------------------

/// Direction of a vault history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Deposit => write!(f, "deposit"),
            TransactionType::Withdrawal => write!(f, "withdrawal"),
        }
    }
}

/// Append-only record of a balance change. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultTransaction {
    pub id: String,
    pub vault_id: String,
    pub user_id: String,
    pub transaction_type: TransactionType,
    pub amount: Amount,
    /// Vault balance immediately after this entry.
    pub balance_after: Amount,
    pub description: String,
    /// The withdrawal request this entry settles, for withdrawals.
    pub request_id: Option<String>,
    /// Position in the vault's history.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Destination accounts
// ---------------------------------------------------------------------------

/// A per-user destination account credited by settlements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub balance: Amount,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A zero-balance account.
    pub fn empty(id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            balance: 0,
            updated_at: now,
        }
    }
}
