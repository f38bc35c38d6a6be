use crate::domain::ports::SharedPurchaseStore;
use crate::domain::purchase::{NewPurchase, PaymentAttempt, Purchase};
use crate::domain::session::SubjectId;
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// A confirmed payment whose ledger row could not be written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrecordedSettlement {
    pub purchase: NewPurchase,
    pub first_failed_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
}

/// Result of one [`LedgerClient::reconcile`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub recorded: usize,
    /// Entries whose row turned out to exist already.
    pub already_recorded: usize,
    pub still_pending: usize,
}

/// Narrow façade over the purchase store.
///
/// Besides reads and writes it keeps the outbox of settlements that were
/// paid for but failed to persist, so they can be replayed instead of lost.
#[derive(Clone)]
pub struct LedgerClient {
    store: SharedPurchaseStore,
    outbox: Arc<Mutex<VecDeque<UnrecordedSettlement>>>,
}

impl LedgerClient {
    pub fn new(store: SharedPurchaseStore) -> Self {
        Self {
            store,
            outbox: Arc::default(),
        }
    }

    /// Writes the completed row for a confirmed attempt.
    pub async fn record_completed(
        &self,
        attempt: &PaymentAttempt,
        reference: &str,
    ) -> StoreResult<Purchase> {
        self.store.insert_purchase(attempt.completed(reference)).await
    }

    /// Writes a failed row so the reference of a charge without an
    /// entitlement is kept for refunds. Falls back to the outbox.
    pub async fn record_failed(&self, attempt: &PaymentAttempt, reference: &str) {
        let row = attempt.failed(reference);
        if let Err(err) = self.store.insert_purchase(row.clone()).await {
            self.enqueue_unrecorded(row, &err).await;
        }
    }

    pub async fn has_completed(&self, subject: &SubjectId, item_id: &str) -> StoreResult<bool> {
        self.store.find_completed(subject, item_id).await
    }

    /// Completed purchases of `subject`, newest first.
    pub async fn completed_for(&self, subject: &SubjectId) -> StoreResult<Vec<Purchase>> {
        self.store.list_completed(subject).await
    }

    /// Queues a row that must eventually be written.
    pub async fn enqueue_unrecorded(&self, purchase: NewPurchase, err: &StoreError) {
        error!(
            subject = %purchase.subject,
            item = %purchase.item_id,
            reference = purchase.reference.as_deref().unwrap_or_default(),
            error = %err,
            "confirmed payment could not be recorded, queued for reconciliation"
        );
        self.outbox.lock().await.push_back(UnrecordedSettlement {
            purchase,
            first_failed_at: Utc::now(),
            attempts: 1,
            last_error: err.to_string(),
        });
    }

    /// Settlements still waiting to be written, oldest first.
    pub async fn pending(&self) -> Vec<UnrecordedSettlement> {
        self.outbox.lock().await.iter().cloned().collect()
    }

    /// Replays every queued settlement once.
    ///
    /// A replay rejected as a duplicate counts as recorded: the entitlement
    /// exists. Entries that fail again stay queued.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut outbox = self.outbox.lock().await;
        let mut report = ReconcileReport::default();
        let mut retained = VecDeque::with_capacity(outbox.len());

        while let Some(mut entry) = outbox.pop_front() {
            match self.store.insert_purchase(entry.purchase.clone()).await {
                Ok(row) => {
                    info!(purchase = %row.id, reference = row.reference.as_deref().unwrap_or_default(), "unrecorded settlement recorded");
                    report.recorded += 1;
                }
                Err(err) if err.is_duplicate() => {
                    info!(subject = %entry.purchase.subject, item = %entry.purchase.item_id, "unrecorded settlement was already present");
                    report.already_recorded += 1;
                }
                Err(err) => {
                    entry.attempts += 1;
                    entry.last_error = err.to_string();
                    warn!(attempts = entry.attempts, error = %err, "unrecorded settlement still failing");
                    retained.push_back(entry);
                }
            }
        }

        report.still_pending = retained.len();
        *outbox = retained;
        report
    }
}
