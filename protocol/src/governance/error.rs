//! Error types for withdrawal governance.
//!
//! Every engine operation that can fail returns a [`GovernanceError`]. The
//! first seven variants are the caller-facing failure kinds; `InvalidRequest`
//! covers malformed input and `Storage` wraps infrastructure failures.

use serde::Serialize;
use thiserror::Error;

use super::rule::RuleError;
use super::types::{Amount, RequestStatus};
use crate::storage::DbError;

/// Errors returned by the governance engine.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// A vault, request, member or account does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// What kind of record was looked up.
        entity: &'static str,
        /// The identifier that missed.
        id: String,
    },

    /// The actor is not allowed to perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The amount is zero, exceeds the vault balance, or overflows.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The vault is closed and accepts no further activity.
    #[error("vault {0} is closed")]
    VaultClosed(String),

    /// The request has already been approved or rejected.
    #[error("withdrawal request {request_id} already processed (status: {status})")]
    AlreadyProcessed {
        request_id: String,
        status: RequestStatus,
    },

    /// The member has already voted on this request.
    #[error("member {member_id} already voted on request {request_id}")]
    DuplicateVote {
        request_id: String,
        member_id: String,
    },

    /// The vault balance no longer covers the request at settlement time.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Amount, available: Amount },

    /// Malformed input (empty reason, oversized comment, empty vault).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The ledger store failed.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

/// Stable, machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidAmount,
    VaultClosed,
    AlreadyProcessed,
    DuplicateVote,
    InsufficientFunds,
    InvalidRequest,
    Storage,
}

impl ErrorKind {
    /// The code as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::InvalidAmount => "INVALID_AMOUNT",
            ErrorKind::VaultClosed => "VAULT_CLOSED",
            ErrorKind::AlreadyProcessed => "ALREADY_PROCESSED",
            ErrorKind::DuplicateVote => "DUPLICATE_VOTE",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::Storage => "STORAGE",
        }
    }
}

impl GovernanceError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GovernanceError::NotFound { .. } => ErrorKind::NotFound,
            GovernanceError::Forbidden(_) => ErrorKind::Forbidden,
            GovernanceError::InvalidAmount(_) => ErrorKind::InvalidAmount,
            GovernanceError::VaultClosed(_) => ErrorKind::VaultClosed,
            GovernanceError::AlreadyProcessed { .. } => ErrorKind::AlreadyProcessed,
            GovernanceError::DuplicateVote { .. } => ErrorKind::DuplicateVote,
            GovernanceError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            GovernanceError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            GovernanceError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        GovernanceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<RuleError> for GovernanceError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NotCreator { .. } => GovernanceError::Forbidden(err.to_string()),
            RuleError::NoActiveMembers => GovernanceError::InvalidRequest(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_one_to_one() {
        let err = GovernanceError::DuplicateVote {
            request_id: "r".into(),
            member_id: "m".into(),
        };
        assert_eq!(err.kind(), ErrorKind::DuplicateVote);
        assert_eq!(err.kind().as_str(), "DUPLICATE_VOTE");
        assert_eq!(
            GovernanceError::VaultClosed("v".into()).kind().as_str(),
            "VAULT_CLOSED"
        );
    }

    #[test]
    fn rule_errors_become_forbidden_or_invalid() {
        let forbidden: GovernanceError = RuleError::NotCreator {
            requester: "bob".into(),
        }
        .into();
        assert_eq!(forbidden.kind(), ErrorKind::Forbidden);

        let invalid: GovernanceError = RuleError::NoActiveMembers.into();
        assert_eq!(invalid.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn messages_carry_context() {
        let err = GovernanceError::InsufficientFunds {
            requested: 500,
            available: 120,
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: requested 500, available 120"
        );
    }
}
