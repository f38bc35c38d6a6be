//! Purchase settlement.
//!
//! [`PurchaseOrchestrator`] turns one purchase intent into at most one
//! completed ledger row. The settlement path is chosen once, when the
//! orchestrator is built, from [`SettlementMode`].

use crate::application::gateway::GatewayAdapter;
use crate::application::ledger::{LedgerClient, ReconcileReport, UnrecordedSettlement};
use crate::application::session_manager::SessionHandle;
use crate::domain::amount::Amount;
use crate::domain::ports::{CheckoutOutcome, SharedPaymentVerifier};
use crate::domain::purchase::{AttemptMode, PaymentAttempt, Purchase};
use crate::domain::session::{Session, SubjectId};
use crate::error::PurchaseError;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Settlement path, resolved once at startup.
#[derive(Clone)]
pub enum SettlementMode {
    /// Simulated settlement: waits `delay`, then records the purchase.
    Test { delay: Duration },
    /// Hosted checkout followed by server-side verification.
    Live {
        gateway: GatewayAdapter,
        verifier: SharedPaymentVerifier,
    },
}

impl SettlementMode {
    pub fn kind(&self) -> AttemptMode {
        match self {
            SettlementMode::Test { .. } => AttemptMode::Test,
            SettlementMode::Live { .. } => AttemptMode::Live,
        }
    }
}

impl std::fmt::Debug for SettlementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementMode::Test { delay } => f.debug_struct("Test").field("delay", delay).finish(),
            SettlementMode::Live { gateway, .. } => f
                .debug_struct("Live")
                .field("settings", gateway.settings())
                .finish_non_exhaustive(),
        }
    }
}

/// How a successful call to [`PurchaseOrchestrator::initiate`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Completed(Purchase),
    /// The subject closed the checkout widget. Nothing was recorded.
    Cancelled,
}

/// What the UI shows next to the purchase button.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorStatus {
    pub busy: bool,
    pub last_error: Option<PurchaseError>,
}

type InFlightKey = (SubjectId, String);

/// Drives purchase attempts for the current session.
///
/// Cheap to clone; clones share the in-flight registry and status.
#[derive(Clone)]
pub struct PurchaseOrchestrator {
    session: SessionHandle,
    ledger: LedgerClient,
    mode: SettlementMode,
    in_flight: Arc<Mutex<HashSet<InFlightKey>>>,
    status: Arc<watch::Sender<OrchestratorStatus>>,
    active: Arc<AtomicUsize>,
}

impl PurchaseOrchestrator {
    pub fn new(session: SessionHandle, ledger: LedgerClient, mode: SettlementMode) -> Self {
        info!(mode = ?mode.kind(), "purchase orchestrator ready");
        let (status, _) = watch::channel(OrchestratorStatus::default());
        Self {
            session,
            ledger,
            mode,
            in_flight: Arc::default(),
            status: Arc::new(status),
            active: Arc::default(),
        }
    }

    pub fn mode(&self) -> AttemptMode {
        self.mode.kind()
    }

    pub fn status(&self) -> OrchestratorStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorStatus> {
        self.status.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.status.borrow().busy
    }

    pub fn last_error(&self) -> Option<PurchaseError> {
        self.status.borrow().last_error.clone()
    }

    /// Starts a purchase of `item_id` for the current subject.
    ///
    /// Fails with [`PurchaseError::Unauthenticated`] before touching the
    /// gateway or the ledger when nobody is signed in.
    pub async fn initiate(
        &self,
        item_id: &str,
        amount: Decimal,
    ) -> Result<SettlementOutcome, PurchaseError> {
        self.tracked(self.settle(item_id, amount)).await
    }

    /// Runs the test path for a prepared attempt: waits the configured delay,
    /// then records the attempt under its own reference.
    ///
    /// The attempt must belong to the current subject.
    pub async fn simulate_test_purchase(
        &self,
        attempt: &PaymentAttempt,
    ) -> Result<Purchase, PurchaseError> {
        self.tracked(async {
            let session = self.require_session()?;
            if session.subject != attempt.subject {
                warn!(subject = %session.subject, attempt_subject = %attempt.subject, "simulated purchase for another subject refused");
                return Err(PurchaseError::Unauthenticated);
            }
            self.test_delay(attempt)?;
            let _claim = self.claim(&attempt.subject, &attempt.item_id)?;
            self.ensure_not_owned(&attempt.subject, &attempt.item_id)
                .await?;
            self.settle_test(attempt).await
        })
        .await
    }

    /// Verifies `reference` at the gateway and records the purchase once the
    /// verified amount matches `amount`.
    ///
    /// The verify-then-write sequence runs on its own task and finishes even
    /// if the returned future is dropped.
    pub async fn verify_and_record(
        &self,
        reference: &str,
        amount: Decimal,
        item_id: &str,
    ) -> Result<Purchase, PurchaseError> {
        self.tracked(async {
            let session = self.require_session()?;
            let amount = Amount::new(amount)?;
            let claim = self.claim(&session.subject, item_id)?;
            let attempt = PaymentAttempt {
                reference: reference.to_string(),
                mode: AttemptMode::Live,
                amount,
                item_id: item_id.to_string(),
                subject: session.subject.clone(),
                email: session.email.clone(),
            };
            self.settle_verified(claim, attempt, reference.to_string())
                .await
        })
        .await
    }

    /// Whether the current subject owns `item_id`. UI gating only.
    pub async fn check_purchase_status(&self, item_id: &str) -> bool {
        let Some(session) = self.session.current() else {
            return false;
        };
        match self.ledger.has_completed(&session.subject, item_id).await {
            Ok(owned) => owned,
            Err(err) => {
                warn!(subject = %session.subject, item = item_id, error = %err, "error checking purchase status");
                false
            }
        }
    }

    /// Completed purchases of the current subject, newest first.
    pub async fn my_purchases(&self) -> Result<Vec<Purchase>, PurchaseError> {
        let session = self.require_session()?;
        self.ledger
            .completed_for(&session.subject)
            .await
            .map_err(|err| {
                warn!(subject = %session.subject, error = %err, "error loading purchases");
                PurchaseError::Ledger
            })
    }

    /// Settlements that were paid for but are not recorded yet.
    pub async fn unrecorded(&self) -> Vec<UnrecordedSettlement> {
        self.ledger.pending().await
    }

    /// Retries every unrecorded settlement once.
    pub async fn reconcile(&self) -> ReconcileReport {
        let report = self.ledger.reconcile().await;
        if report.recorded + report.already_recorded > 0 || report.still_pending > 0 {
            info!(
                recorded = report.recorded,
                already_recorded = report.already_recorded,
                still_pending = report.still_pending,
                "reconciliation pass finished"
            );
        }
        report
    }

    async fn settle(
        &self,
        item_id: &str,
        amount: Decimal,
    ) -> Result<SettlementOutcome, PurchaseError> {
        let session = self.require_session()?;
        let amount = Amount::new(amount)?;
        let claim = self.claim(&session.subject, item_id)?;
        self.ensure_not_owned(&session.subject, item_id).await?;

        let attempt = PaymentAttempt::new(
            self.mode.kind(),
            session.subject.clone(),
            session.email.clone(),
            item_id,
            amount,
        );
        info!(subject = %attempt.subject, item = item_id, reference = %attempt.reference, amount = %attempt.amount, "purchase attempt started");

        match &self.mode {
            SettlementMode::Test { .. } => self
                .settle_test(&attempt)
                .await
                .map(SettlementOutcome::Completed),
            SettlementMode::Live { gateway, .. } => match gateway.open(&attempt, None).await? {
                CheckoutOutcome::Cancelled => Ok(SettlementOutcome::Cancelled),
                CheckoutOutcome::Success(reference) => self
                    .settle_verified(claim, attempt, reference)
                    .await
                    .map(SettlementOutcome::Completed),
            },
        }
    }

    fn test_delay(&self, attempt: &PaymentAttempt) -> Result<Duration, PurchaseError> {
        match &self.mode {
            SettlementMode::Test { delay } if attempt.mode == AttemptMode::Test => Ok(*delay),
            _ => {
                warn!(reference = %attempt.reference, "simulated purchase refused outside test mode");
                Err(PurchaseError::TestModeDisabled)
            }
        }
    }

    async fn settle_test(&self, attempt: &PaymentAttempt) -> Result<Purchase, PurchaseError> {
        let delay = self.test_delay(attempt)?;
        debug!(reference = %attempt.reference, delay_ms = delay.as_millis() as u64, "simulating payment processing");
        tokio::time::sleep(delay).await;

        match self
            .ledger
            .record_completed(attempt, &attempt.reference)
            .await
        {
            Ok(purchase) => {
                info!(purchase = %purchase.id, reference = %attempt.reference, "test purchase recorded");
                Ok(purchase)
            }
            Err(err) if err.is_duplicate() => Err(PurchaseError::AlreadyPurchased),
            Err(err) => {
                warn!(reference = %attempt.reference, error = %err, "test purchase could not be recorded");
                Err(PurchaseError::Ledger)
            }
        }
    }

    /// Hands verification and recording to a detached task that owns the
    /// in-flight claim until the row is written or the attempt is abandoned.
    async fn settle_verified(
        &self,
        claim: InFlightClaim,
        attempt: PaymentAttempt,
        reference: String,
    ) -> Result<Purchase, PurchaseError> {
        let SettlementMode::Live { gateway, verifier } = &self.mode else {
            warn!(reference = %reference, "verification requested without a live gateway");
            return Err(PurchaseError::GatewayNotConfigured);
        };

        let verifier = verifier.clone();
        let ledger = self.ledger.clone();
        let currency = gateway.settings().currency.clone();
        let task_reference = reference.clone();
        let task = tokio::spawn(async move {
            let result =
                verify_then_record(&verifier, &ledger, &attempt, &task_reference, &currency).await;
            drop(claim);
            result
        });

        task.await.unwrap_or_else(|err| {
            error!(reference = %reference, error = %err, "settlement task did not finish");
            Err(PurchaseError::VerificationFailed)
        })
    }

    async fn ensure_not_owned(&self, subject: &SubjectId, item_id: &str) -> Result<(), PurchaseError> {
        match self.ledger.has_completed(subject, item_id).await {
            Ok(false) => Ok(()),
            Ok(true) => {
                info!(subject = %subject, item = item_id, "item already owned, not charging again");
                Err(PurchaseError::AlreadyPurchased)
            }
            Err(err) => {
                warn!(subject = %subject, item = item_id, error = %err, "ownership check failed");
                Err(PurchaseError::Ledger)
            }
        }
    }

    fn require_session(&self) -> Result<Session, PurchaseError> {
        self.session.current().ok_or_else(|| {
            debug!("purchase requested without a session");
            PurchaseError::Unauthenticated
        })
    }

    fn claim(&self, subject: &SubjectId, item_id: &str) -> Result<InFlightClaim, PurchaseError> {
        let key = (subject.clone(), item_id.to_string());
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key.clone()) {
            info!(subject = %subject, item = item_id, "purchase already in progress");
            return Err(PurchaseError::AttemptInProgress);
        }
        Ok(InFlightClaim {
            registry: self.in_flight.clone(),
            key,
        })
    }

    /// Runs `op` with the busy flag raised and records its error, if any.
    async fn tracked<T, F>(&self, op: F) -> Result<T, PurchaseError>
    where
        F: Future<Output = Result<T, PurchaseError>>,
    {
        let _busy = self.begin();
        let result = op.await;
        let last_error = result.as_ref().err().cloned();
        self.status
            .send_modify(|status| status.last_error = last_error);
        result
    }

    fn begin(&self) -> BusyGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.status.send_modify(|status| {
            status.busy = true;
            status.last_error = None;
        });
        BusyGuard {
            status: self.status.clone(),
            active: self.active.clone(),
        }
    }
}

/// Verification must succeed before the ledger write is issued.
async fn verify_then_record(
    verifier: &SharedPaymentVerifier,
    ledger: &LedgerClient,
    attempt: &PaymentAttempt,
    reference: &str,
    currency: &str,
) -> Result<Purchase, PurchaseError> {
    let expected_minor = attempt.amount.to_minor_units()?;
    let verification = verifier
        .verify_transaction(reference)
        .await
        .map_err(|err| {
            error!(reference, error = %err, "payment verification call failed");
            PurchaseError::VerificationFailed
        })?;

    if !verification.is_success() {
        error!(reference, status = %verification.status, "payment not confirmed by gateway");
        return Err(PurchaseError::VerificationFailed);
    }
    if verification.amount_minor != expected_minor {
        error!(
            reference,
            expected = expected_minor,
            verified = verification.amount_minor,
            "verified amount does not match attempt"
        );
        return Err(PurchaseError::VerificationFailed);
    }
    if let Some(verified_currency) = &verification.currency
        && !verified_currency.eq_ignore_ascii_case(currency)
    {
        error!(reference, expected = currency, verified = %verified_currency, "verified currency does not match attempt");
        return Err(PurchaseError::VerificationFailed);
    }

    match ledger.record_completed(attempt, reference).await {
        Ok(purchase) => {
            info!(purchase = %purchase.id, reference, "live purchase verified and recorded");
            Ok(purchase)
        }
        Err(err) if err.is_duplicate() => {
            error!(reference, subject = %attempt.subject, item = %attempt.item_id, "payment confirmed for an item that is already owned, refund required");
            ledger.record_failed(attempt, reference).await;
            Err(PurchaseError::DuplicateCharge {
                reference: reference.to_string(),
            })
        }
        Err(err) => {
            ledger.enqueue_unrecorded(attempt.completed(reference), &err).await;
            Err(PurchaseError::Unrecorded {
                reference: reference.to_string(),
            })
        }
    }
}

struct InFlightClaim {
    registry: Arc<Mutex<HashSet<InFlightKey>>>,
    key: InFlightKey,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

struct BusyGuard {
    status: Arc<watch::Sender<OrchestratorStatus>>,
    active: Arc<AtomicUsize>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let remaining = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        self.status
            .send_if_modified(|status| std::mem::replace(&mut status.busy, remaining > 0) != (remaining > 0));
    }
}
