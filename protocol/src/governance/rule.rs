//! # Consensus Rule Evaluator
//!
//! Turns a vault's [`WithdrawalRule`] and its active membership into a
//! [`Quorum`]: whether a new request approves itself, and how many "yes"
//! votes it otherwise needs. The quorum is computed once, when the request
//! is created, and never recomputed.
//!
//! | Rule            | Auto-approved            | `total_votes_required` |
//! |-----------------|--------------------------|------------------------|
//! | `creator_only`  | requester == creator     | 0                      |
//! | `majority_vote` | never                    | ceil(members / 2)      |
//! | `unanimous`     | never                    | members                |
//!
//! Rejection is governed separately by [`RejectionThreshold`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::WithdrawalRule;

/// Why a request cannot be created under the vault's rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// `creator_only` vault and the requester is not the creator.
    #[error("only the vault creator may withdraw; {requester} is not the creator")]
    NotCreator {
        /// The user that attempted the withdrawal.
        requester: String,
    },

    /// A voting rule with nobody to vote would approve on the first no-op
    /// tally, so it is refused outright.
    #[error("vault has no active members to vote")]
    NoActiveMembers,
}

/// Outcome of evaluating a rule for a new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quorum {
    /// The request skips voting and settles immediately.
    pub auto_approved: bool,
    /// "Yes" votes needed to approve.
    pub total_votes_required: u32,
    /// Active members at evaluation time.
    pub eligible_voters: u32,
}

/// Computes the quorum for a new withdrawal request.
pub fn evaluate(
    rule: WithdrawalRule,
    active_members: u32,
    requester_id: &str,
    creator_id: &str,
) -> Result<Quorum, RuleError> {
    match rule {
        WithdrawalRule::CreatorOnly => {
            if requester_id != creator_id {
                return Err(RuleError::NotCreator {
                    requester: requester_id.to_string(),
                });
            }
            Ok(Quorum {
                auto_approved: true,
                total_votes_required: 0,
                eligible_voters: active_members,
            })
        }
        WithdrawalRule::MajorityVote | WithdrawalRule::Unanimous => {
            if active_members == 0 {
                return Err(RuleError::NoActiveMembers);
            }
            let total_votes_required = match rule {
                WithdrawalRule::MajorityVote => active_members.div_ceil(2),
                _ => active_members,
            };
            Ok(Quorum {
                auto_approved: false,
                total_votes_required,
                eligible_voters: active_members,
            })
        }
    }
}

/// When accumulated "no" votes reject a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionThreshold {
    /// Reject once `votes_no > total_votes_required`.
    ///
    /// Asymmetric with approval, and the historical behavior: a unanimous
    /// vault of N needs N + 1 "no" votes, which it can never collect.
    ExceedsQuorum,
    /// Reject once approval is arithmetically out of reach:
    /// `votes_no >= eligible_voters - total_votes_required + 1`.
    Symmetric,
}

impl RejectionThreshold {
    /// Returns `true` if `votes_no` rejects the request.
    pub fn is_rejected(
        self,
        votes_no: u32,
        total_votes_required: u32,
        eligible_voters: u32,
    ) -> bool {
        match self {
            RejectionThreshold::ExceedsQuorum => votes_no > total_votes_required,
            RejectionThreshold::Symmetric => {
                votes_no >= eligible_voters.saturating_sub(total_votes_required) + 1
            }
        }
    }
}
