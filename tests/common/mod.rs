#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use marketplace_core::domain::ports::{
    CheckoutConfig, CheckoutOutcome, IdentityStore, PaymentVerifier, PaymentWidget, ProfileStore,
    PurchaseStore, Verification,
};
use marketplace_core::domain::purchase::{NewPurchase, Purchase};
use marketplace_core::domain::session::{Credential, Profile, ProfileUpdate, SubjectId};
use marketplace_core::error::{StoreError, StoreResult};
use marketplace_core::infrastructure::in_memory::{
    InMemoryIdentityStore, InMemoryProfileStore, InMemoryPurchaseStore,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub fn credential(subject: &str) -> Credential {
    Credential {
        subject: SubjectId::new(subject),
        email: format!("{}@example.com", subject.to_lowercase()),
        token: format!("token-{subject}"),
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        confirmed: true,
    }
}

pub fn profile(subject: &str) -> Profile {
    Profile {
        id: SubjectId::new(subject),
        full_name: Some(format!("Profile {subject}")),
        ..Default::default()
    }
}

/// Identity store whose bootstrap lookup can be slowed down or made to fail.
#[derive(Clone, Default)]
pub struct SlowIdentityStore {
    pub inner: InMemoryIdentityStore,
    pub bootstrap_delay: Duration,
    pub bootstrap_fails: bool,
}

impl SlowIdentityStore {
    pub fn new(bootstrap_delay: Duration) -> Self {
        Self {
            bootstrap_delay,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            bootstrap_fails: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl IdentityStore for SlowIdentityStore {
    async fn bootstrap_session(&self) -> StoreResult<Option<Credential>> {
        tokio::time::sleep(self.bootstrap_delay).await;
        if self.bootstrap_fails {
            return Err(StoreError::new("network unreachable"));
        }
        self.inner.bootstrap_session().await
    }

    fn subscribe(&self) -> broadcast::Receiver<Option<Credential>> {
        self.inner.subscribe()
    }

    async fn sign_in(&self, email: &str, secret: &str) -> StoreResult<Credential> {
        self.inner.sign_in(email, secret).await
    }

    async fn sign_up(
        &self,
        email: &str,
        secret: &str,
        display_name: &str,
    ) -> StoreResult<Credential> {
        self.inner.sign_up(email, secret, display_name).await
    }

    async fn sign_out(&self) -> StoreResult<()> {
        self.inner.sign_out().await
    }

    async fn update_secret(&self, new_secret: &str) -> StoreResult<()> {
        self.inner.update_secret(new_secret).await
    }
}

/// Profile store with per-subject lookup latency and a failure switch.
#[derive(Clone, Default)]
pub struct DelayedProfileStore {
    pub inner: InMemoryProfileStore,
    delays: Arc<Mutex<HashMap<SubjectId, Duration>>>,
    pub fail: Arc<AtomicBool>,
    pub lookups: Arc<AtomicUsize>,
}

impl DelayedProfileStore {
    pub fn delay(&self, subject: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(SubjectId::new(subject), delay);
    }
}

#[async_trait]
impl ProfileStore for DelayedProfileStore {
    async fn get_profile(&self, subject: &SubjectId) -> StoreResult<Option<Profile>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(subject).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::new("profiles table unavailable"));
        }
        self.inner.get_profile(subject).await
    }

    async fn upsert_profile(&self, subject: &SubjectId, update: &ProfileUpdate) -> StoreResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::new("profiles table unavailable"));
        }
        self.inner.upsert_profile(subject, update).await
    }
}

/// Purchase store that counts every call and can refuse writes.
#[derive(Clone, Default)]
pub struct CountingPurchaseStore {
    pub inner: InMemoryPurchaseStore,
    pub calls: Arc<AtomicUsize>,
    pub fail_inserts: Arc<AtomicBool>,
}

impl CountingPurchaseStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn rows(&self) -> Vec<Purchase> {
        self.inner.all().await
    }
}

#[async_trait]
impl PurchaseStore for CountingPurchaseStore {
    async fn insert_purchase(&self, purchase: NewPurchase) -> StoreResult<Purchase> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::new("connection reset by peer"));
        }
        self.inner.insert_purchase(purchase).await
    }

    async fn find_completed(&self, subject: &SubjectId, item_id: &str) -> StoreResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.find_completed(subject, item_id).await
    }

    async fn list_completed(&self, subject: &SubjectId) -> StoreResult<Vec<Purchase>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_completed(subject).await
    }
}

/// Verifier answering every lookup with the same scripted result.
pub struct ScriptedVerifier {
    result: Mutex<StoreResult<Verification>>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn confirming(amount_minor: i64) -> Self {
        Self::new(Ok(Verification {
            status: "success".into(),
            amount_minor,
            currency: Some("NGN".into()),
        }))
    }

    pub fn new(result: StoreResult<Verification>) -> Self {
        Self {
            result: Mutex::new(result),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentVerifier for ScriptedVerifier {
    async fn verify_transaction(&self, _reference: &str) -> StoreResult<Verification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.result.lock().unwrap().clone()
    }
}

/// Checkout widget that either pays or is closed by the subject.
pub struct ScriptedWidget {
    pays: bool,
    pub opened: AtomicUsize,
    pub last_config: Mutex<Option<CheckoutConfig>>,
}

impl ScriptedWidget {
    pub fn paying() -> Self {
        Self {
            pays: true,
            opened: AtomicUsize::new(0),
            last_config: Mutex::new(None),
        }
    }

    pub fn cancelling() -> Self {
        Self {
            pays: false,
            ..Self::paying()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentWidget for ScriptedWidget {
    async fn open(&self, config: &CheckoutConfig) -> StoreResult<CheckoutOutcome> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock().unwrap() = Some(config.clone());
        if self.pays {
            Ok(CheckoutOutcome::Success(config.reference.clone()))
        } else {
            Ok(CheckoutOutcome::Cancelled)
        }
    }
}

pub fn write_intents(path: &Path, rows: &[(&str, &str, &str, &str)]) -> std::io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_path(path)?;
    wtr.write_record(["subject", "email", "item", "amount"])?;
    for (subject, email, item, amount) in rows {
        wtr.write_record([subject, email, item, amount])?;
    }
    wtr.flush()?;
    Ok(())
}
