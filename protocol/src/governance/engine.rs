//! # Governance Engine
//!
//! The two governed operations, `submit_withdrawal` and `cast_vote`, plus
//! the read side. Each governed call is exactly one ledger transaction:
//!
//! ```text
//! submit_withdrawal ─▶ [vault active? member? rule → quorum, balance ≥ amount]
//!                       ├─ auto-approved ─▶ settle ─▶ (close?)
//!                       └─ pending ──────▶ WithdrawalRequested
//!
//! cast_vote ─────────▶ [pending? member? insert vote (unique) → tally]
//!                       ├─ approved ─▶ settle ─▶ (close?)
//!                       ├─ rejected ─▶ RequestRejected
//!                       └─ pending
//! ```
//!
//! The transaction is serializable and retried on conflict, so two votes
//! that both see the quorum about to be reached cannot both settle: the
//! second one re-runs against the committed state of the first and finds
//! the request no longer pending.
//!
//! Identifiers and timestamps are minted before the transaction starts so
//! a retry writes the same values.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::GovernanceError;
use super::rule;
use super::settlement::{settle, SettlementOutcome};
use super::tally::{record_ballot, TallyOutcome};
use super::types::{
    Account, Amount, Member, RequestStatus, Vault, VaultTransaction, Vote, WithdrawalRequest,
    WithdrawalRule,
};
use crate::config::EngineConfig;
use crate::outbox::DomainEvent;
use crate::storage::txn::OrAbort;
use crate::storage::LedgerDb;

// ---------------------------------------------------------------------------
// Commands & receipts
// ---------------------------------------------------------------------------

/// Input to [`GovernanceEngine::submit_withdrawal`].
#[derive(Debug, Clone)]
pub struct SubmitWithdrawal {
    pub vault_id: String,
    pub requester_id: String,
    pub amount: Amount,
    pub reason: String,
    /// Account credited when the request settles.
    pub destination_account_id: Option<String>,
}

/// Input to [`GovernanceEngine::cast_vote`].
#[derive(Debug, Clone)]
pub struct CastVote {
    pub request_id: String,
    pub member_id: String,
    /// `true` for yes.
    pub approve: bool,
    pub comment: Option<String>,
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalReceipt {
    pub request: WithdrawalRequest,
    /// The withdrawal entry, if the request settled immediately.
    pub settlement: Option<VaultTransaction>,
    pub vault_closed: bool,
}

impl WithdrawalReceipt {
    pub fn status(&self) -> RequestStatus {
        self.request.status
    }
}

/// Result of a successful vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteReceipt {
    pub status: RequestStatus,
    pub votes_yes: u32,
    pub votes_no: u32,
    pub request: WithdrawalRequest,
    /// The withdrawal entry, if this vote approved the request.
    pub settlement: Option<VaultTransaction>,
    pub vault_closed: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Withdrawal governance and settlement over a [`LedgerDb`].
///
/// Cheap to clone and safe to share across threads; all coordination
/// happens in the database.
#[derive(Debug, Clone)]
pub struct GovernanceEngine {
    db: LedgerDb,
    config: EngineConfig,
}

impl GovernanceEngine {
    pub fn new(db: LedgerDb, config: EngineConfig) -> Self {
        Self { db, config }
    }

    /// The underlying ledger.
    pub fn db(&self) -> &LedgerDb {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn validate_submission(&self, cmd: &SubmitWithdrawal) -> Result<(), GovernanceError> {
        if cmd.amount == 0 {
            return Err(GovernanceError::InvalidAmount(
                "amount must be greater than zero".into(),
            ));
        }
        if cmd.reason.trim().is_empty() {
            return Err(GovernanceError::InvalidRequest(
                "reason must not be empty".into(),
            ));
        }
        if cmd.reason.len() > self.config.max_reason_length {
            return Err(GovernanceError::InvalidRequest(format!(
                "reason exceeds {} bytes",
                self.config.max_reason_length
            )));
        }
        if let Some(account) = &cmd.destination_account_id {
            if account.trim().is_empty() {
                return Err(GovernanceError::InvalidRequest(
                    "destination account must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Creates a withdrawal request, settling it immediately if the vault's
    /// rule auto-approves it.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the vault does not exist.
    /// - `VaultClosed` if the vault is closed.
    /// - `Forbidden` if the requester is not an active member, or is not the
    ///   creator of a `creator_only` vault.
    /// - `InvalidAmount` if the amount is zero or exceeds the balance.
    /// - `InvalidRequest` for an empty or oversized reason.
    pub fn submit_withdrawal(
        &self,
        cmd: SubmitWithdrawal,
    ) -> Result<WithdrawalReceipt, GovernanceError> {
        self.validate_submission(&cmd)?;

        let request_id = Uuid::now_v7().to_string();
        let transaction_id = Uuid::now_v7().to_string();
        let now = Utc::now();

        let (request, outcome) = self.db.transact(|txn| {
            let mut vault = txn.vault(&cmd.vault_id)?;
            vault.ensure_active().or_abort()?;

            if !txn.is_active_member(&vault.id, &cmd.requester_id)? {
                return sled::transaction::abort(GovernanceError::Forbidden(format!(
                    "{} is not an active member of vault {}",
                    cmd.requester_id, vault.id
                )));
            }

            let quorum = rule::evaluate(
                vault.withdrawal_rule,
                vault.active_members,
                &cmd.requester_id,
                &vault.creator_id,
            )
            .or_abort()?;

            if cmd.amount > vault.current_amount {
                return sled::transaction::abort(GovernanceError::InvalidAmount(format!(
                    "requested {} but vault {} holds {}",
                    cmd.amount, vault.id, vault.current_amount
                )));
            }

            let mut request = WithdrawalRequest::pending(
                request_id.clone(),
                vault.id.clone(),
                cmd.requester_id.clone(),
                cmd.amount,
                cmd.reason.clone(),
                cmd.destination_account_id.clone(),
                quorum.total_votes_required,
                quorum.eligible_voters,
                now,
            );

            if quorum.auto_approved {
                request.approve(now);
                txn.insert_request(&request)?;
                let outcome = settle(txn, &mut vault, &mut request, &transaction_id, now)?;
                return Ok((request, Some(outcome)));
            }

            txn.insert_request(&request)?;
            txn.push_event(
                DomainEvent::WithdrawalRequested {
                    vault_id: vault.id.clone(),
                    request_id: request.id.clone(),
                    requested_by: request.requested_by.clone(),
                    amount: request.amount,
                    reason: request.reason.clone(),
                    total_votes_required: request.total_votes_required,
                },
                now,
            )?;
            Ok((request, None))
        })?;

        match outcome {
            None => {
                info!(
                    request_id = %request.id,
                    vault_id = %request.vault_id,
                    requested_by = %request.requested_by,
                    amount = request.amount,
                    votes_required = request.total_votes_required,
                    "withdrawal requested"
                );
                Ok(WithdrawalReceipt {
                    request,
                    settlement: None,
                    vault_closed: false,
                })
            }
            Some(outcome) => {
                let (settlement, vault_closed) = self.finish_settlement(&request, outcome)?;
                Ok(WithdrawalReceipt {
                    request,
                    settlement,
                    vault_closed,
                })
            }
        }
    }

    /// Records a member's vote and applies the tally.
    ///
    /// If the vote approves the request, settlement happens before this
    /// returns. If settlement finds the vault short, the vote and the
    /// resulting rejection are committed and `InsufficientFunds` is
    /// returned.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the request does not exist.
    /// - `AlreadyProcessed` if the request is no longer pending.
    /// - `Forbidden` if the member is not active in the request's vault.
    /// - `DuplicateVote` if the member already voted on this request.
    /// - `InsufficientFunds` if approval could not be settled.
    pub fn cast_vote(&self, cmd: CastVote) -> Result<VoteReceipt, GovernanceError> {
        if let Some(comment) = &cmd.comment {
            if comment.len() > self.config.max_comment_length {
                return Err(GovernanceError::InvalidRequest(format!(
                    "comment exceeds {} bytes",
                    self.config.max_comment_length
                )));
            }
        }

        let transaction_id = Uuid::now_v7().to_string();
        let threshold = self.config.rejection_threshold;
        let now = Utc::now();

        let (request, tally, outcome) = self.db.transact(|txn| {
            let mut request = txn.request(&cmd.request_id)?;
            request.ensure_pending().or_abort()?;

            if !txn.is_active_member(&request.vault_id, &cmd.member_id)? {
                return sled::transaction::abort(GovernanceError::Forbidden(format!(
                    "{} is not an active member of vault {}",
                    cmd.member_id, request.vault_id
                )));
            }

            txn.insert_vote(&Vote {
                vault_id: request.vault_id.clone(),
                request_id: request.id.clone(),
                member_id: cmd.member_id.clone(),
                vote: cmd.approve,
                comment: cmd.comment.clone(),
                cast_at: now,
            })?;

            let tally = record_ballot(&mut request, cmd.approve, threshold, now).or_abort()?;
            let outcome = match tally {
                TallyOutcome::Approved => {
                    let mut vault = txn.vault(&request.vault_id)?;
                    Some(settle(txn, &mut vault, &mut request, &transaction_id, now)?)
                }
                TallyOutcome::Rejected => {
                    txn.put_request(&request)?;
                    txn.push_event(
                        DomainEvent::RequestRejected {
                            vault_id: request.vault_id.clone(),
                            request_id: request.id.clone(),
                            requested_by: request.requested_by.clone(),
                            votes_yes: request.votes_yes,
                            votes_no: request.votes_no,
                        },
                        now,
                    )?;
                    None
                }
                TallyOutcome::Pending => {
                    txn.put_request(&request)?;
                    None
                }
            };
            Ok((request, tally, outcome))
        })?;

        info!(
            request_id = %request.id,
            member_id = %cmd.member_id,
            approve = cmd.approve,
            votes_yes = request.votes_yes,
            votes_no = request.votes_no,
            outcome = ?tally,
            "vote recorded"
        );

        let (settlement, vault_closed) = match outcome {
            Some(outcome) => self.finish_settlement(&request, outcome)?,
            None => {
                if tally == TallyOutcome::Rejected {
                    info!(request_id = %request.id, "withdrawal rejected by vote");
                }
                (None, false)
            }
        };

        Ok(VoteReceipt {
            status: request.status,
            votes_yes: request.votes_yes,
            votes_no: request.votes_no,
            request,
            settlement,
            vault_closed,
        })
    }

    /// Logs a committed settlement and turns a failed one into an error.
    fn finish_settlement(
        &self,
        request: &WithdrawalRequest,
        outcome: SettlementOutcome,
    ) -> Result<(Option<VaultTransaction>, bool), GovernanceError> {
        match outcome {
            SettlementOutcome::Settled {
                transaction,
                vault_closed,
            } => {
                info!(
                    request_id = %request.id,
                    vault_id = %request.vault_id,
                    amount = transaction.amount,
                    balance_after = transaction.balance_after,
                    "withdrawal settled"
                );
                if vault_closed {
                    info!(vault_id = %request.vault_id, "vault closed after full withdrawal");
                }
                Ok((Some(transaction), vault_closed))
            }
            SettlementOutcome::Failed {
                requested,
                available,
            } => {
                warn!(
                    request_id = %request.id,
                    vault_id = %request.vault_id,
                    requested,
                    available,
                    "settlement failed, request rejected"
                );
                Err(GovernanceError::InsufficientFunds {
                    requested,
                    available,
                })
            }
        }
    }

    // -- Administration -----------------------------------------------------

    pub fn create_vault(
        &self,
        name: &str,
        creator_id: &str,
        rule: WithdrawalRule,
    ) -> Result<Vault, GovernanceError> {
        self.db.create_vault(name, creator_id, rule)
    }

    pub fn add_member(&self, vault_id: &str, user_id: &str) -> Result<Member, GovernanceError> {
        self.db.add_member(vault_id, user_id)
    }

    pub fn remove_member(&self, vault_id: &str, user_id: &str) -> Result<Member, GovernanceError> {
        self.db.remove_member(vault_id, user_id)
    }

    pub fn deposit(
        &self,
        vault_id: &str,
        user_id: &str,
        amount: Amount,
        description: &str,
    ) -> Result<VaultTransaction, GovernanceError> {
        self.db.deposit(vault_id, user_id, amount, description)
    }

    // -- Queries ------------------------------------------------------------

    pub fn vault(&self, id: &str) -> Result<Vault, GovernanceError> {
        self.db
            .vault(id)?
            .ok_or_else(|| GovernanceError::not_found("vault", id))
    }

    pub fn request(&self, id: &str) -> Result<WithdrawalRequest, GovernanceError> {
        self.db
            .request(id)?
            .ok_or_else(|| GovernanceError::not_found("withdrawal request", id))
    }

    /// Requests of a vault, oldest first.
    pub fn requests_for_vault(
        &self,
        vault_id: &str,
    ) -> Result<Vec<WithdrawalRequest>, GovernanceError> {
        self.vault(vault_id)?;
        Ok(self.db.requests_for_vault(vault_id)?)
    }

    pub fn votes_for_request(&self, request_id: &str) -> Result<Vec<Vote>, GovernanceError> {
        self.request(request_id)?;
        Ok(self.db.votes_for_request(request_id)?)
    }

    /// History of a vault in append order.
    pub fn transactions_for_vault(
        &self,
        vault_id: &str,
    ) -> Result<Vec<VaultTransaction>, GovernanceError> {
        self.vault(vault_id)?;
        Ok(self.db.transactions_for_vault(vault_id)?)
    }

    /// The withdrawal entry that settled a request, if any.
    pub fn settlement_for(
        &self,
        request_id: &str,
    ) -> Result<Option<VaultTransaction>, GovernanceError> {
        Ok(self.db.settlement_for(request_id)?)
    }

    pub fn account(&self, id: &str) -> Result<Account, GovernanceError> {
        self.db
            .account(id)?
            .ok_or_else(|| GovernanceError::not_found("account", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::rule::RejectionThreshold;
    use crate::governance::types::{RejectionReason, VaultStatus};

    fn engine() -> GovernanceEngine {
        GovernanceEngine::new(LedgerDb::open_temporary().unwrap(), EngineConfig::default())
    }

    /// Vault with `members` (first is the creator) and `balance` deposited.
    fn funded_vault(
        engine: &GovernanceEngine,
        rule: WithdrawalRule,
        members: &[&str],
        balance: Amount,
    ) -> Vault {
        let vault = engine.create_vault("Test vault", members[0], rule).unwrap();
        for member in &members[1..] {
            engine.add_member(&vault.id, member).unwrap();
        }
        if balance > 0 {
            engine
                .deposit(&vault.id, members[0], balance, "seed")
                .unwrap();
        }
        engine.vault(&vault.id).unwrap()
    }

    fn submit(
        engine: &GovernanceEngine,
        vault_id: &str,
        who: &str,
        amount: Amount,
    ) -> Result<WithdrawalReceipt, GovernanceError> {
        engine.submit_withdrawal(SubmitWithdrawal {
            vault_id: vault_id.to_string(),
            requester_id: who.to_string(),
            amount,
            reason: "groceries".to_string(),
            destination_account_id: None,
        })
    }

    fn vote(
        engine: &GovernanceEngine,
        request_id: &str,
        who: &str,
        approve: bool,
    ) -> Result<VoteReceipt, GovernanceError> {
        engine.cast_vote(CastVote {
            request_id: request_id.to_string(),
            member_id: who.to_string(),
            approve,
            comment: None,
        })
    }

    #[test]
    fn input_validation_happens_before_storage() {
        let engine = engine();
        let vault = funded_vault(&engine, WithdrawalRule::MajorityVote, &["alice"], 100);

        assert!(matches!(
            submit(&engine, &vault.id, "alice", 0),
            Err(GovernanceError::InvalidAmount(_))
        ));

        let blank = engine.submit_withdrawal(SubmitWithdrawal {
            vault_id: vault.id.clone(),
            requester_id: "alice".into(),
            amount: 10,
            reason: "  ".into(),
            destination_account_id: None,
        });
        assert!(matches!(blank, Err(GovernanceError::InvalidRequest(_))));
        assert_eq!(engine.db().request_count(), 0);
    }

    #[test]
    fn failure_kinds_follow_precondition_order() {
        let engine = engine();
        assert!(matches!(
            submit(&engine, "missing", "alice", 1),
            Err(GovernanceError::NotFound { entity: "vault", .. })
        ));

        let vault = funded_vault(&engine, WithdrawalRule::MajorityVote, &["alice", "bob"], 100);
        assert!(matches!(
            submit(&engine, &vault.id, "mallory", 1),
            Err(GovernanceError::Forbidden(_))
        ));
        assert!(matches!(
            submit(&engine, &vault.id, "bob", 101),
            Err(GovernanceError::InvalidAmount(_))
        ));
    }

    #[test]
    fn pending_request_queues_member_notification() {
        let engine = engine();
        let members = ["alice", "bob", "carol"];
        let vault = funded_vault(&engine, WithdrawalRule::MajorityVote, &members, 100);
        let receipt = submit(&engine, &vault.id, "bob", 40).unwrap();

        assert_eq!(receipt.status(), RequestStatus::Pending);
        assert_eq!(receipt.request.total_votes_required, 2);
        assert_eq!(receipt.request.eligible_voters, 3);
        assert!(receipt.settlement.is_none());
        assert_eq!(engine.db().outbox_len(), 1);
    }

    #[test]
    fn vote_comment_length_is_bounded() {
        let engine = engine();
        let vault = funded_vault(&engine, WithdrawalRule::MajorityVote, &["alice", "bob"], 100);
        let request = submit(&engine, &vault.id, "bob", 10).unwrap().request;
        let err = engine
            .cast_vote(CastVote {
                request_id: request.id.clone(),
                member_id: "alice".into(),
                approve: true,
                comment: Some("x".repeat(engine.config().max_comment_length + 1)),
            })
            .unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidRequest(_)));
        assert_eq!(engine.db().vote_count(), 0);
    }

    #[test]
    fn symmetric_threshold_can_be_configured() {
        let db = LedgerDb::open_temporary().unwrap();
        let engine = GovernanceEngine::new(
            db,
            EngineConfig {
                rejection_threshold: RejectionThreshold::Symmetric,
                ..EngineConfig::default()
            },
        );
        let members = ["alice", "bob", "carol"];
        let vault = funded_vault(&engine, WithdrawalRule::Unanimous, &members, 100);
        let request = submit(&engine, &vault.id, "alice", 10).unwrap().request;

        let receipt = vote(&engine, &request.id, "bob", false).unwrap();
        assert_eq!(receipt.status, RequestStatus::Rejected);
        assert_eq!(receipt.request.rejection, Some(RejectionReason::Outvoted));
        assert_eq!(engine.vault(&vault.id).unwrap().current_amount, 100);
    }

    #[test]
    fn removed_member_cannot_vote_but_quorum_is_unchanged() {
        let engine = engine();
        let members = ["alice", "bob", "carol", "dan"];
        let vault = funded_vault(&engine, WithdrawalRule::MajorityVote, &members, 100);
        let request = submit(&engine, &vault.id, "alice", 10).unwrap().request;
        engine.remove_member(&vault.id, "dan").unwrap();

        assert!(matches!(
            vote(&engine, &request.id, "dan", true),
            Err(GovernanceError::Forbidden(_))
        ));
        let stored = engine.request(&request.id).unwrap();
        assert_eq!(stored.total_votes_required, 2);
        assert_eq!(stored.eligible_voters, 4);
    }

    #[test]
    fn settlement_shortfall_rejects_and_reports() {
        let engine = engine();
        let vault = funded_vault(&engine, WithdrawalRule::MajorityVote, &["alice", "bob"], 100);
        let first = submit(&engine, &vault.id, "alice", 80).unwrap().request;
        let second = submit(&engine, &vault.id, "bob", 50).unwrap().request;

        vote(&engine, &first.id, "bob", true).unwrap();
        let err = vote(&engine, &second.id, "alice", true).unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::InsufficientFunds {
                requested: 50,
                available: 20
            }
        ));

        let stored = engine.request(&second.id).unwrap();
        assert_eq!(stored.status, RequestStatus::Rejected);
        assert_eq!(stored.votes_yes, 1);
        assert!(engine.settlement_for(&second.id).unwrap().is_none());

        let vault = engine.vault(&vault.id).unwrap();
        assert_eq!(vault.current_amount, 20);
        assert_eq!(vault.status, VaultStatus::Active);
    }
}
