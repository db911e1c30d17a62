//! Membership Directory — who belongs to a vault.
//!
//! Read-only view of vault membership used outside the governed write path:
//! the dispatcher resolves notification audiences through it, and the node
//! answers membership queries with it. Inside a transaction the engine reads
//! the member tree directly so that its checks see the same snapshot as its
//! writes.

use super::db::{DbError, DbResult, LedgerDb};

/// Read access to vault membership.
pub trait MembershipDirectory: Send + Sync {
    /// Returns `true` if `user_id` is an active member of the vault.
    fn is_active_member(&self, vault_id: &str, user_id: &str) -> DbResult<bool>;

    /// Number of active members in the vault.
    fn active_member_count(&self, vault_id: &str) -> DbResult<u32>;

    /// The user who created the vault.
    fn creator_of(&self, vault_id: &str) -> DbResult<String>;

    /// User ids of every active member.
    fn active_members(&self, vault_id: &str) -> DbResult<Vec<String>>;
}

impl MembershipDirectory for LedgerDb {
    fn is_active_member(&self, vault_id: &str, user_id: &str) -> DbResult<bool> {
        Ok(self
            .member(vault_id, user_id)?
            .is_some_and(|m| m.is_active()))
    }

    fn active_member_count(&self, vault_id: &str) -> DbResult<u32> {
        self.vault(vault_id)?
            .map(|v| v.active_members)
            .ok_or_else(|| DbError::NotFound(vault_id.to_string()))
    }

    fn creator_of(&self, vault_id: &str) -> DbResult<String> {
        self.vault(vault_id)?
            .map(|v| v.creator_id)
            .ok_or_else(|| DbError::NotFound(vault_id.to_string()))
    }

    fn active_members(&self, vault_id: &str) -> DbResult<Vec<String>> {
        Ok(self
            .members_of(vault_id)?
            .into_iter()
            .filter(|m| m.is_active())
            .map(|m| m.user_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::types::WithdrawalRule;

    #[test]
    fn directory_reflects_membership() {
        let db = LedgerDb::open_temporary().unwrap();
        let vault = db
            .create_vault("Group gift", "alice", WithdrawalRule::MajorityVote)
            .unwrap();
        db.add_member(&vault.id, "bob").unwrap();
        db.add_member(&vault.id, "carol").unwrap();
        db.remove_member(&vault.id, "carol").unwrap();

        assert!(db.is_active_member(&vault.id, "bob").unwrap());
        assert!(!db.is_active_member(&vault.id, "carol").unwrap());
        assert!(!db.is_active_member(&vault.id, "zoe").unwrap());
        assert_eq!(db.active_member_count(&vault.id).unwrap(), 2);
        assert_eq!(db.creator_of(&vault.id).unwrap(), "alice");

        let mut members = db.active_members(&vault.id).unwrap();
        members.sort();
        assert_eq!(members, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn unknown_vault_is_not_found() {
        let db = LedgerDb::open_temporary().unwrap();
        assert!(matches!(
            db.creator_of("ghost"),
            Err(DbError::NotFound(_))
        ));
        assert!(db.active_members("ghost").unwrap().is_empty());
    }
}
