//! # Engine Configuration & Constants
//!
//! Every tunable of the governance engine lives here. Constants are the
//! defaults; [`EngineConfig`] and [`DispatcherConfig`] are what the engine
//! and dispatcher actually read, so a node can override them at startup.
//!
//! Changing the rejection policy on a live deployment changes the outcome
//! of requests that are already pending. Think twice, then think again.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::governance::rule::RejectionThreshold;

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Engine version reported by the node.
pub const ENGINE_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

/// Recorded as `close_reason` when a settlement drains a vault to zero.
pub const CLOSE_REASON_FULL_WITHDRAWAL: &str = "full withdrawal";

/// How many "no" votes it takes to reject a pending request.
///
/// `ExceedsQuorum` rejects once `votes_no > total_votes_required`. This is
/// deliberately not symmetric with approval: a majority vault of four needs
/// two "yes" to approve but three "no" to reject, and a unanimous vault can
/// never be rejected by votes alone.
pub const DEFAULT_REJECTION_THRESHOLD: RejectionThreshold = RejectionThreshold::ExceedsQuorum;

/// Maximum length of a withdrawal reason, in bytes.
pub const MAX_REASON_LENGTH: usize = 500;

/// Maximum length of a vote comment, in bytes.
pub const MAX_COMMENT_LENGTH: usize = 1_000;

/// Maximum length of a vault name, in bytes.
pub const MAX_VAULT_NAME_LENGTH: usize = 120;

// ---------------------------------------------------------------------------
// Outbox dispatch
// ---------------------------------------------------------------------------

/// Number of outbox entries pulled per drain.
pub const OUTBOX_BATCH_SIZE: usize = 64;

/// Pause between outbox drains. Half a second keeps notifications snappy
/// without turning an idle node into a space heater.
pub const DISPATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Delivery attempts before an outbox entry is dropped.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

// ---------------------------------------------------------------------------
// Runtime configuration
// ---------------------------------------------------------------------------

/// Tunables read by [`GovernanceEngine`](crate::governance::GovernanceEngine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rejection rule applied by the tally.
    pub rejection_threshold: RejectionThreshold,
    /// Upper bound on `reason` length.
    pub max_reason_length: usize,
    /// Upper bound on vote `comment` length.
    pub max_comment_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rejection_threshold: DEFAULT_REJECTION_THRESHOLD,
            max_reason_length: MAX_REASON_LENGTH,
            max_comment_length: MAX_COMMENT_LENGTH,
        }
    }
}

/// Tunables read by the outbox [`Dispatcher`](crate::outbox::Dispatcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Entries pulled per drain.
    pub batch_size: usize,
    /// Milliseconds between drains.
    pub interval_ms: u64,
    /// Attempts before an undeliverable entry is dropped.
    pub max_delivery_attempts: u32,
}

impl DispatcherConfig {
    /// The drain interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: OUTBOX_BATCH_SIZE,
            interval_ms: DISPATCH_INTERVAL.as_millis() as u64,
            max_delivery_attempts: MAX_DELIVERY_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_engine_config_keeps_asymmetric_rejection() {
        let config = EngineConfig::default();
        assert_eq!(config.rejection_threshold, RejectionThreshold::ExceedsQuorum);
        assert_eq!(config.max_reason_length, MAX_REASON_LENGTH);
    }

    #[test]
    fn dispatcher_interval_matches_constant() {
        let config = DispatcherConfig::default();
        assert_eq!(config.interval(), DISPATCH_INTERVAL);
        assert!(config.batch_size > 0);
        assert!(config.max_delivery_attempts > 0);
    }

    #[test]
    fn length_limits_sanity() {
        // A comment that can't hold a reason is a UX bug waiting to happen.
        assert!(MAX_COMMENT_LENGTH >= MAX_REASON_LENGTH);
        assert!(MAX_VAULT_NAME_LENGTH > 0);
    }
}
