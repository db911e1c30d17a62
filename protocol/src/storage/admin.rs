//! Ledger administration: vault creation, membership and deposits.
//!
//! None of these operations are governed by voting. They exist so that a
//! vault has members to vote and a balance to withdraw from, and they keep
//! the vault's cached `active_members` count and history sequence in step
//! with the member and transaction trees.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::db::LedgerDb;
use super::txn::OrAbort;
use crate::config::MAX_VAULT_NAME_LENGTH;
use crate::governance::error::GovernanceError;
use crate::governance::types::{
    Account, Amount, Member, MemberStatus, TransactionType, Vault, VaultTransaction,
    WithdrawalRule,
};

fn require_id(field: &str, value: &str) -> Result<(), GovernanceError> {
    if value.trim().is_empty() {
        return Err(GovernanceError::InvalidRequest(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

fn require_positive(amount: Amount) -> Result<(), GovernanceError> {
    if amount == 0 {
        return Err(GovernanceError::InvalidAmount(
            "amount must be greater than zero".into(),
        ));
    }
    Ok(())
}

impl LedgerDb {
    /// Creates an active vault with `creator_id` as its first member.
    pub fn create_vault(
        &self,
        name: &str,
        creator_id: &str,
        withdrawal_rule: WithdrawalRule,
    ) -> Result<Vault, GovernanceError> {
        let name = name.trim();
        require_id("vault name", name)?;
        require_id("creator id", creator_id)?;
        if name.len() > MAX_VAULT_NAME_LENGTH {
            return Err(GovernanceError::InvalidRequest(format!(
                "vault name exceeds {MAX_VAULT_NAME_LENGTH} bytes"
            )));
        }

        let mut vault = Vault::new(name.to_string(), creator_id.to_string(), withdrawal_rule);
        vault.active_members = 1;
        let creator = Member {
            vault_id: vault.id.clone(),
            user_id: creator_id.to_string(),
            status: MemberStatus::Active,
            joined_at: vault.created_at,
        };

        self.transact(|txn| {
            txn.put_vault(&vault)?;
            txn.put_member(&creator)?;
            Ok(())
        })?;

        info!(vault_id = %vault.id, creator = creator_id, rule = %withdrawal_rule, "vault created");
        Ok(vault)
    }

    /// Adds a user to a vault, or reactivates a removed member.
    pub fn add_member(&self, vault_id: &str, user_id: &str) -> Result<Member, GovernanceError> {
        require_id("user id", user_id)?;
        let now = Utc::now();

        let member = self.transact(|txn| {
            let mut vault = txn.vault(vault_id)?;
            vault.ensure_active().or_abort()?;

            let member = match txn.member(vault_id, user_id)? {
                Some(existing) if existing.is_active() => {
                    return sled::transaction::abort(GovernanceError::InvalidRequest(format!(
                        "{user_id} is already a member of vault {vault_id}"
                    )));
                }
                Some(mut removed) => {
                    removed.status = MemberStatus::Active;
                    removed.joined_at = now;
                    removed
                }
                None => Member {
                    vault_id: vault_id.to_string(),
                    user_id: user_id.to_string(),
                    status: MemberStatus::Active,
                    joined_at: now,
                },
            };

            vault.active_members = vault
                .active_members
                .checked_add(1)
                .ok_or_else(|| GovernanceError::InvalidRequest("member count overflow".into()))
                .or_abort()?;
            txn.put_member(&member)?;
            txn.put_vault(&vault)?;
            Ok(member)
        })?;

        info!(vault_id, user_id, "member added");
        Ok(member)
    }

    /// Marks an active member as removed.
    ///
    /// Pending requests keep the quorum they were created with.
    pub fn remove_member(&self, vault_id: &str, user_id: &str) -> Result<Member, GovernanceError> {
        let member = self.transact(|txn| {
            let mut vault = txn.vault(vault_id)?;
            vault.ensure_active().or_abort()?;

            let mut member = match txn.member(vault_id, user_id)? {
                Some(m) if m.is_active() => m,
                _ => {
                    return sled::transaction::abort(GovernanceError::not_found(
                        "member",
                        user_id,
                    ))
                }
            };

            member.status = MemberStatus::Removed;
            vault.active_members = vault.active_members.saturating_sub(1);
            txn.put_member(&member)?;
            txn.put_vault(&vault)?;
            Ok(member)
        })?;

        info!(vault_id, user_id, "member removed");
        Ok(member)
    }

    /// Pays `amount` into a vault on behalf of an active member.
    pub fn deposit(
        &self,
        vault_id: &str,
        user_id: &str,
        amount: Amount,
        description: &str,
    ) -> Result<VaultTransaction, GovernanceError> {
        require_positive(amount)?;
        let tx_id = Uuid::now_v7().to_string();
        let now = Utc::now();

        let entry = self.transact(|txn| {
            let mut vault = txn.vault(vault_id)?;
            vault.ensure_active().or_abort()?;
            if !txn.is_active_member(vault_id, user_id)? {
                return sled::transaction::abort(GovernanceError::Forbidden(format!(
                    "{user_id} is not an active member of vault {vault_id}"
                )));
            }

            let balance_after = vault.credit(amount).or_abort()?;
            let entry = VaultTransaction {
                id: tx_id.clone(),
                vault_id: vault_id.to_string(),
                user_id: user_id.to_string(),
                transaction_type: TransactionType::Deposit,
                amount,
                balance_after,
                description: description.to_string(),
                request_id: None,
                sequence: vault.take_sequence(),
                created_at: now,
            };
            txn.append_transaction(&entry)?;
            txn.put_vault(&vault)?;
            Ok(entry)
        })?;

        info!(vault_id, user_id, amount, balance_after = entry.balance_after, "deposit recorded");
        Ok(entry)
    }

    /// Credits a destination account from outside any vault.
    pub fn credit_account(
        &self,
        account_id: &str,
        amount: Amount,
    ) -> Result<Account, GovernanceError> {
        require_id("account id", account_id)?;
        require_positive(amount)?;
        let now = Utc::now();
        self.transact(|txn| txn.credit_account(account_id, amount, now))
    }

    /// Balance of a destination account; zero if it was never credited.
    pub fn account_balance(&self, account_id: &str) -> Result<Amount, GovernanceError> {
        Ok(self.account(account_id)?.map_or(0, |a| a.balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::types::VaultStatus;

    fn db_with_vault(rule: WithdrawalRule) -> (LedgerDb, Vault) {
        let db = LedgerDb::open_temporary().unwrap();
        let vault = db.create_vault("Family fund", "alice", rule).unwrap();
        (db, vault)
    }

    #[test]
    fn creator_is_first_active_member() {
        let (db, vault) = db_with_vault(WithdrawalRule::MajorityVote);
        assert_eq!(vault.active_members, 1);
        assert_eq!(vault.status, VaultStatus::Active);
        assert!(db.member(&vault.id, "alice").unwrap().unwrap().is_active());
    }

    #[test]
    fn blank_or_oversized_names_are_refused() {
        let db = LedgerDb::open_temporary().unwrap();
        assert!(matches!(
            db.create_vault("   ", "alice", WithdrawalRule::Unanimous),
            Err(GovernanceError::InvalidRequest(_))
        ));
        let long = "x".repeat(MAX_VAULT_NAME_LENGTH + 1);
        assert!(matches!(
            db.create_vault(&long, "alice", WithdrawalRule::Unanimous),
            Err(GovernanceError::InvalidRequest(_))
        ));
        assert_eq!(db.vault_count(), 0);
    }

    #[test]
    fn membership_changes_track_active_count() {
        let (db, vault) = db_with_vault(WithdrawalRule::Unanimous);
        db.add_member(&vault.id, "bob").unwrap();
        db.add_member(&vault.id, "carol").unwrap();
        assert_eq!(db.vault(&vault.id).unwrap().unwrap().active_members, 3);

        db.remove_member(&vault.id, "bob").unwrap();
        assert_eq!(db.vault(&vault.id).unwrap().unwrap().active_members, 2);
        assert!(!db.member(&vault.id, "bob").unwrap().unwrap().is_active());

        // Rejoining reactivates the same record.
        db.add_member(&vault.id, "bob").unwrap();
        assert_eq!(db.vault(&vault.id).unwrap().unwrap().active_members, 3);
        assert_eq!(db.members_of(&vault.id).unwrap().len(), 3);
    }

    #[test]
    fn duplicate_and_unknown_members_are_refused() {
        let (db, vault) = db_with_vault(WithdrawalRule::Unanimous);
        assert!(matches!(
            db.add_member(&vault.id, "alice"),
            Err(GovernanceError::InvalidRequest(_))
        ));
        assert!(matches!(
            db.remove_member(&vault.id, "zoe"),
            Err(GovernanceError::NotFound { entity: "member", .. })
        ));
        assert!(matches!(
            db.add_member("missing", "bob"),
            Err(GovernanceError::NotFound { entity: "vault", .. })
        ));
    }

    #[test]
    fn deposits_append_history_with_running_balance() {
        let (db, vault) = db_with_vault(WithdrawalRule::MajorityVote);
        db.add_member(&vault.id, "bob").unwrap();
        db.deposit(&vault.id, "alice", 300, "initial").unwrap();
        let second = db.deposit(&vault.id, "bob", 200, "top up").unwrap();
        assert_eq!(second.balance_after, 500);
        assert_eq!(second.sequence, 1);

        let history = db.transactions_for_vault(&vault.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].description, "initial");
        assert_eq!(history[1].transaction_type, TransactionType::Deposit);
        assert_eq!(db.vault(&vault.id).unwrap().unwrap().current_amount, 500);
    }

    #[test]
    fn outsiders_and_zero_amounts_cannot_deposit() {
        let (db, vault) = db_with_vault(WithdrawalRule::MajorityVote);
        assert!(matches!(
            db.deposit(&vault.id, "mallory", 10, "hi"),
            Err(GovernanceError::Forbidden(_))
        ));
        assert!(matches!(
            db.deposit(&vault.id, "alice", 0, "nothing"),
            Err(GovernanceError::InvalidAmount(_))
        ));
        assert!(db.transactions_for_vault(&vault.id).unwrap().is_empty());
    }

    #[test]
    fn account_credits_accumulate() {
        let db = LedgerDb::open_temporary().unwrap();
        assert_eq!(db.account_balance("acct-1").unwrap(), 0);
        db.credit_account("acct-1", 40).unwrap();
        let account = db.credit_account("acct-1", 2).unwrap();
        assert_eq!(account.balance, 42);
        assert_eq!(db.account_balance("acct-1").unwrap(), 42);
    }
}
