use super::purchase::{NewPurchase, Purchase};
use super::session::{Credential, Profile, ProfileUpdate, SubjectId};
use crate::error::StoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Identity/credential store. Issues and refreshes credentials and announces changes.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Looks up a persisted credential, if any.
    async fn bootstrap_session(&self) -> StoreResult<Option<Credential>>;

    /// Subscribes to sign-in, sign-out and refresh notifications.
    ///
    /// Dropping the receiver ends the subscription.
    fn subscribe(&self) -> broadcast::Receiver<Option<Credential>>;

    async fn sign_in(&self, email: &str, secret: &str) -> StoreResult<Credential>;
    async fn sign_up(&self, email: &str, secret: &str, display_name: &str)
    -> StoreResult<Credential>;
    async fn sign_out(&self) -> StoreResult<()>;
    async fn update_secret(&self, new_secret: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, subject: &SubjectId) -> StoreResult<Option<Profile>>;
    async fn upsert_profile(&self, subject: &SubjectId, update: &ProfileUpdate) -> StoreResult<()>;
}

/// Purchase rows in the data store.
///
/// Implementations must reject a second completed row for the same
/// (subject, item) pair with [`StoreError::duplicate`](crate::error::StoreError::duplicate).
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    async fn insert_purchase(&self, purchase: NewPurchase) -> StoreResult<Purchase>;
    async fn find_completed(&self, subject: &SubjectId, item_id: &str) -> StoreResult<bool>;
    /// Completed purchases of a subject, newest first.
    async fn list_completed(&self, subject: &SubjectId) -> StoreResult<Vec<Purchase>>;
}

/// Result of a server-side transaction lookup at the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub status: String,
    /// Amount the gateway actually settled, in minor units.
    pub amount_minor: i64,
    pub currency: Option<String>,
}

impl Verification {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Server-side verification call. Holds the secret gateway credential.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify_transaction(&self, reference: &str) -> StoreResult<Verification>;
}

/// Everything the hosted checkout widget needs to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutConfig {
    pub reference: String,
    pub email: String,
    pub amount_minor: i64,
    pub currency: String,
    pub public_key: String,
    pub metadata: BTreeMap<String, String>,
}

/// How the checkout widget resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    Success(String),
    Cancelled,
}

/// Client-side hosted checkout widget.
#[async_trait]
pub trait PaymentWidget: Send + Sync {
    async fn open(&self, config: &CheckoutConfig) -> StoreResult<CheckoutOutcome>;
}

pub type SharedIdentityStore = Arc<dyn IdentityStore>;
pub type SharedProfileStore = Arc<dyn ProfileStore>;
pub type SharedPurchaseStore = Arc<dyn PurchaseStore>;
pub type SharedPaymentVerifier = Arc<dyn PaymentVerifier>;
pub type SharedPaymentWidget = Arc<dyn PaymentWidget>;
