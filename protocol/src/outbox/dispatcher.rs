//! # Outbox Dispatcher
//!
//! Drains committed [`DomainEvent`](super::DomainEvent)s from the outbox and
//! hands them to a [`Notifier`]. Runs outside every ledger transaction:
//!
//! ```text
//! engine txn ──commit──▶ outbox tree ──drain──▶ resolve audience ──▶ Notifier
//!                                                                   │
//!                          attempts += 1 (or drop at cap) ◀── error ┘
//! ```
//!
//! Delivery is at-least-once: an entry is removed only after the notifier
//! accepted it, so a crash between delivery and removal repeats the
//! notification on restart.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::event::Audience;
use super::notifier::Notifier;
use crate::config::DispatcherConfig;
use crate::storage::{DbResult, LedgerDb, MembershipDirectory};

/// What one drain pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Entries the notifier accepted (or that had nobody to notify).
    pub delivered: usize,
    /// Entries that failed and stay queued for another attempt.
    pub failed: usize,
    /// Entries abandoned after `max_delivery_attempts` failures.
    pub dropped: usize,
}

impl DispatchReport {
    /// Returns `true` if the pass found nothing to do.
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.failed == 0 && self.dropped == 0
    }
}

/// Moves events from the outbox to a notifier.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    db: LedgerDb,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(db: LedgerDb, config: DispatcherConfig) -> Self {
        Self { db, config }
    }

    /// Resolves an audience to concrete user ids.
    fn recipients(&self, audience: &Audience) -> DbResult<Vec<String>> {
        match audience {
            Audience::User(user_id) => Ok(vec![user_id.clone()]),
            Audience::VaultMembers { vault_id, except } => Ok(self
                .db
                .active_members(vault_id)?
                .into_iter()
                .filter(|user| Some(user) != except.as_ref())
                .collect()),
        }
    }

    /// Delivers up to one batch of outbox entries, oldest first.
    ///
    /// A failure confined to one entry never stops the rest of the batch:
    /// an undecodable record is discarded, and an audience that cannot be
    /// resolved counts as a failed delivery attempt.
    pub async fn drain_once(&self, notifier: &dyn Notifier) -> DbResult<DispatchReport> {
        let mut report = DispatchReport::default();

        for (key, decoded) in self.db.outbox_batch(self.config.batch_size)? {
            let mut entry = match decoded {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(key = ?key, error = %err, "discarding undecodable outbox entry");
                    self.db.remove_outbox(&key)?;
                    report.dropped += 1;
                    continue;
                }
            };

            let event = &entry.event;
            let outcome = match self.recipients(&event.audience()) {
                Ok(recipients) if recipients.is_empty() => {
                    debug!(
                        vault_id = event.vault_id(),
                        kind = ?event.kind(),
                        "no recipients, discarding"
                    );
                    self.db.remove_outbox(&key)?;
                    report.delivered += 1;
                    continue;
                }
                Ok(recipients) => notifier
                    .notify(&recipients, &event.title(), &event.message(), event.kind())
                    .await
                    .map_err(|err| err.to_string()),
                Err(err) => Err(format!("audience resolution failed: {err}")),
            };

            match outcome {
                Ok(()) => {
                    self.db.remove_outbox(&key)?;
                    report.delivered += 1;
                }
                Err(err) => {
                    entry.attempts += 1;
                    if entry.attempts >= self.config.max_delivery_attempts {
                        warn!(
                            vault_id = entry.event.vault_id(),
                            kind = ?entry.event.kind(),
                            attempts = entry.attempts,
                            error = %err,
                            "giving up on notification"
                        );
                        self.db.remove_outbox(&key)?;
                        report.dropped += 1;
                    } else {
                        warn!(
                            vault_id = entry.event.vault_id(),
                            kind = ?entry.event.kind(),
                            attempts = entry.attempts,
                            error = %err,
                            "notification delivery failed, will retry"
                        );
                        self.db.update_outbox(&key, &entry)?;
                        report.failed += 1;
                    }
                }
            }
        }

        if !report.is_empty() {
            debug!(
                delivered = report.delivered,
                failed = report.failed,
                dropped = report.dropped,
                "outbox drained"
            );
        }
        Ok(report)
    }

    /// Drains the outbox on every tick until `shutdown` flips to `true` or
    /// its sender goes away. `on_report` sees the result of each pass.
    pub async fn run<F>(
        &self,
        notifier: Arc<dyn Notifier>,
        mut shutdown: watch::Receiver<bool>,
        mut on_report: F,
    ) where
        F: FnMut(&DispatchReport) + Send,
    {
        let mut interval = tokio::time::interval(self.config.interval());
        info!(interval_ms = self.config.interval_ms, "outbox dispatcher started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.drain_once(notifier.as_ref()).await {
                        Ok(report) => on_report(&report),
                        Err(err) => warn!(error = %err, "outbox drain failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("outbox dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::types::WithdrawalRule;
    use crate::outbox::{DomainEvent, NotificationKind, NotifyError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Records every delivery; fails while `failing` is set.
    #[derive(Default)]
    struct RecordingNotifier {
        deliveries: Mutex<Vec<(Vec<String>, NotificationKind)>>,
        failing: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            user_ids: &[String],
            _title: &str,
            _message: &str,
            kind: NotificationKind,
        ) -> Result<(), NotifyError> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(NotifyError::Unavailable("smtp down".into()));
            }
            self.deliveries
                .lock()
                .unwrap()
                .push((user_ids.to_vec(), kind));
            Ok(())
        }
    }

    fn seeded_db() -> (LedgerDb, String) {
        let db = LedgerDb::open_temporary().unwrap();
        let vault = db
            .create_vault("Outbox test", "alice", WithdrawalRule::MajorityVote)
            .unwrap();
        db.add_member(&vault.id, "bob").unwrap();
        db.add_member(&vault.id, "carol").unwrap();
        (db, vault.id)
    }

    fn enqueue(db: &LedgerDb, event: DomainEvent) {
        db.transact(|txn| txn.push_event(event.clone(), Utc::now()))
            .unwrap();
    }

    fn requested(vault_id: &str) -> DomainEvent {
        DomainEvent::WithdrawalRequested {
            vault_id: vault_id.into(),
            request_id: "r1".into(),
            requested_by: "bob".into(),
            amount: 100,
            reason: "car repair".into(),
            total_votes_required: 2,
        }
    }

    #[tokio::test]
    async fn delivers_to_resolved_audience_and_clears_outbox() {
        let (db, vault_id) = seeded_db();
        enqueue(&db, requested(&vault_id));

        let notifier = RecordingNotifier::default();
        let dispatcher = Dispatcher::new(db.clone(), DispatcherConfig::default());
        let report = dispatcher.drain_once(&notifier).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(db.outbox_len(), 0);
        let deliveries = notifier.deliveries.lock().unwrap();
        let (mut users, kind) = deliveries[0].clone();
        users.sort();
        assert_eq!(users, vec!["alice".to_string(), "carol".to_string()]);
        assert_eq!(kind, NotificationKind::WithdrawalRequested);
    }

    #[tokio::test]
    async fn failures_are_retried_then_dropped() {
        let (db, vault_id) = seeded_db();
        enqueue(&db, requested(&vault_id));

        let notifier = RecordingNotifier::default();
        notifier
            .failing
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let config = DispatcherConfig {
            max_delivery_attempts: 2,
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(db.clone(), config);

        let first = dispatcher.drain_once(&notifier).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(db.outbox_len(), 1);
        assert_eq!(db.outbox_batch(1).unwrap()[0].1.as_ref().unwrap().attempts, 1);

        let second = dispatcher.drain_once(&notifier).await.unwrap();
        assert_eq!(second.dropped, 1);
        assert_eq!(db.outbox_len(), 0);
        assert!(notifier.deliveries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_entry_does_not_block_later_events() {
        let (db, vault_id) = seeded_db();
        // Sorts ahead of every v7 key.
        db.transact(|txn| {
            txn.outbox.insert(&[0u8; 16][..], &[0xffu8, 0xff][..])?;
            Ok(())
        })
        .unwrap();
        enqueue(&db, requested(&vault_id));
        assert_eq!(db.outbox_len(), 2);

        let notifier = RecordingNotifier::default();
        let report = Dispatcher::new(db.clone(), DispatcherConfig::default())
            .drain_once(&notifier)
            .await
            .unwrap();

        assert_eq!(report.dropped, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(db.outbox_len(), 0);
        assert_eq!(
            notifier.deliveries.lock().unwrap()[0].1,
            NotificationKind::WithdrawalRequested
        );
    }

    #[tokio::test]
    async fn unresolvable_audience_counts_as_failed_attempt() {
        let (db, vault_id) = seeded_db();
        // A member record that cannot be decoded breaks audience resolution
        // for the whole vault, but not for single-user audiences.
        let broken = crate::storage::db::pair_key(&vault_id, "zed");
        db.transact(|txn| {
            txn.members.insert(&broken[..], &[0xffu8, 0xff][..])?;
            Ok(())
        })
        .unwrap();
        enqueue(&db, requested(&vault_id));
        enqueue(
            &db,
            DomainEvent::RequestRejected {
                vault_id: vault_id.clone(),
                request_id: "r1".into(),
                requested_by: "bob".into(),
                votes_yes: 0,
                votes_no: 3,
            },
        );

        let notifier = RecordingNotifier::default();
        let config = DispatcherConfig {
            max_delivery_attempts: 2,
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(db.clone(), config);

        let first = dispatcher.drain_once(&notifier).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.delivered, 1);
        assert_eq!(db.outbox_len(), 1);

        let second = dispatcher.drain_once(&notifier).await.unwrap();
        assert_eq!(second.dropped, 1);
        assert_eq!(db.outbox_len(), 0);

        let deliveries = notifier.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn events_are_delivered_in_recording_order() {
        let (db, vault_id) = seeded_db();
        enqueue(&db, requested(&vault_id));
        enqueue(
            &db,
            DomainEvent::RequestRejected {
                vault_id: vault_id.clone(),
                request_id: "r1".into(),
                requested_by: "bob".into(),
                votes_yes: 0,
                votes_no: 3,
            },
        );

        let notifier = RecordingNotifier::default();
        Dispatcher::new(db, DispatcherConfig::default())
            .drain_once(&notifier)
            .await
            .unwrap();

        let kinds: Vec<_> = notifier
            .deliveries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, k)| *k)
            .collect();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::WithdrawalRequested,
                NotificationKind::WithdrawalRejected
            ]
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (db, vault_id) = seeded_db();
        enqueue(&db, requested(&vault_id));

        let config = DispatcherConfig {
            interval_ms: 10,
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(db.clone(), config);
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut delivered = 0;
            dispatcher
                .run(notifier, rx, |report| delivered += report.delivered)
                .await;
            delivered
        });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let delivered = handle.await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(db.outbox_len(), 0);
    }
}
