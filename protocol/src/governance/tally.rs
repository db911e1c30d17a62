//! # Tally
//!
//! Folds a single ballot into a pending request's counters and derives the
//! resulting status. The engine calls [`record_ballot`] inside the same
//! storage transaction that inserts the vote row, so increment and
//! evaluation are one atomic step.
//!
//! Approval is checked before rejection. Once a request leaves `Pending`,
//! every further ballot is refused with `AlreadyProcessed`.

use chrono::{DateTime, Utc};

use super::error::GovernanceError;
use super::rule::RejectionThreshold;
use super::types::{RejectionReason, RequestStatus, WithdrawalRequest};

/// What a ballot did to its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyOutcome {
    /// Still waiting for more votes.
    Pending,
    /// "Yes" votes reached `total_votes_required`.
    Approved,
    /// "No" votes crossed the rejection threshold.
    Rejected,
}

impl From<TallyOutcome> for RequestStatus {
    fn from(outcome: TallyOutcome) -> Self {
        match outcome {
            TallyOutcome::Pending => RequestStatus::Pending,
            TallyOutcome::Approved => RequestStatus::Approved,
            TallyOutcome::Rejected => RequestStatus::Rejected,
        }
    }
}

/// Applies one ballot to `request` and transitions it if a threshold is met.
///
/// # Errors
///
/// Returns [`GovernanceError::AlreadyProcessed`] if the request is terminal.
/// Returns [`GovernanceError::InvalidRequest`] if a counter would overflow.
pub fn record_ballot(
    request: &mut WithdrawalRequest,
    approve: bool,
    threshold: RejectionThreshold,
    now: DateTime<Utc>,
) -> Result<TallyOutcome, GovernanceError> {
    request.ensure_pending()?;

    let counter = if approve {
        &mut request.votes_yes
    } else {
        &mut request.votes_no
    };
    *counter = counter
        .checked_add(1)
        .ok_or_else(|| GovernanceError::InvalidRequest("vote counter overflow".into()))?;

    if request.votes_yes >= request.total_votes_required {
        request.approve(now);
        return Ok(TallyOutcome::Approved);
    }

    if threshold.is_rejected(
        request.votes_no,
        request.total_votes_required,
        request.eligible_voters,
    ) {
        request.reject(RejectionReason::Outvoted, now);
        return Ok(TallyOutcome::Rejected);
    }

    Ok(TallyOutcome::Pending)
}
