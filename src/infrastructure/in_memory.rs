use crate::domain::ports::{IdentityStore, ProfileStore, PurchaseStore};
use crate::domain::purchase::{NewPurchase, Purchase, PurchaseStatus};
use crate::domain::session::{Credential, Profile, ProfileUpdate, SubjectId};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

/// Buffered notifications per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 64;

/// Lifetime of credentials handed out by the in-memory identity store.
const CREDENTIAL_TTL_HOURS: i64 = 1;

#[derive(Debug, Clone)]
struct Account {
    subject: SubjectId,
    secret: String,
    confirmed: bool,
}

/// A thread-safe in-memory identity store.
///
/// Keeps accounts keyed by e-mail, the currently persisted credential, and a
/// broadcast channel for change notifications. Ideal for testing and for the
/// batch harness, where no hosted identity provider is available.
#[derive(Clone)]
pub struct InMemoryIdentityStore {
    accounts: Arc<RwLock<HashMap<String, Account>>>,
    current: Arc<RwLock<Option<Credential>>>,
    events: broadcast::Sender<Option<Credential>>,
    require_confirmation: bool,
}

impl Default for InMemoryIdentityStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            accounts: Arc::default(),
            current: Arc::default(),
            events,
            require_confirmation: false,
        }
    }
}

impl InMemoryIdentityStore {
    /// Creates a new, empty identity store with no persisted credential.
    pub fn new() -> Self {
        Self::default()
    }

    /// New sign-ups stay unconfirmed and cannot sign in until confirmed.
    pub fn requiring_confirmation(mut self) -> Self {
        self.require_confirmation = true;
        self
    }

    /// Registers a confirmed account.
    pub async fn add_account(&self, subject: SubjectId, email: &str, secret: &str) {
        self.accounts.write().await.insert(
            email.to_string(),
            Account {
                subject,
                secret: secret.to_string(),
                confirmed: true,
            },
        );
    }

    pub async fn confirm(&self, email: &str) {
        if let Some(account) = self.accounts.write().await.get_mut(email) {
            account.confirmed = true;
        }
    }

    /// Stores a credential as if it had survived a previous run.
    pub async fn persist(&self, credential: Option<Credential>) {
        *self.current.write().await = credential;
    }

    /// Pushes a change notification to every subscriber.
    pub fn notify(&self, credential: Option<Credential>) {
        // No subscribers is not an error.
        let _ = self.events.send(credential);
    }

    async fn issue(&self, subject: SubjectId, email: &str, confirmed: bool) -> Credential {
        let credential = Credential {
            subject,
            email: email.to_string(),
            token: Uuid::new_v4().simple().to_string(),
            expires_at: Some(Utc::now() + Duration::hours(CREDENTIAL_TTL_HOURS)),
            confirmed,
        };
        if confirmed {
            *self.current.write().await = Some(credential.clone());
            self.notify(Some(credential.clone()));
        }
        credential
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn bootstrap_session(&self) -> StoreResult<Option<Credential>> {
        let current = self.current.read().await;
        Ok(current.clone().filter(|c| !c.is_expired(Utc::now())))
    }

    fn subscribe(&self) -> broadcast::Receiver<Option<Credential>> {
        self.events.subscribe()
    }

    async fn sign_in(&self, email: &str, secret: &str) -> StoreResult<Credential> {
        let account = self.accounts.read().await.get(email).cloned();
        match account {
            Some(account) if account.secret == secret => {
                if !account.confirmed {
                    return Err(StoreError::with_code(
                        "email_not_confirmed",
                        "Email not confirmed",
                    ));
                }
                Ok(self.issue(account.subject, email, true).await)
            }
            _ => Err(StoreError::with_code(
                "invalid_credentials",
                "Invalid login credentials",
            )),
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        secret: &str,
        _display_name: &str,
    ) -> StoreResult<Credential> {
        let subject = {
            let mut accounts = self.accounts.write().await;
            if accounts.contains_key(email) {
                return Err(StoreError::with_code(
                    "user_already_exists",
                    "User already registered",
                ));
            }
            let subject = SubjectId::new(Uuid::new_v4().to_string());
            accounts.insert(
                email.to_string(),
                Account {
                    subject: subject.clone(),
                    secret: secret.to_string(),
                    confirmed: !self.require_confirmation,
                },
            );
            subject
        };
        Ok(self.issue(subject, email, !self.require_confirmation).await)
    }

    async fn sign_out(&self) -> StoreResult<()> {
        *self.current.write().await = None;
        self.notify(None);
        Ok(())
    }

    async fn update_secret(&self, new_secret: &str) -> StoreResult<()> {
        let current = self.current.read().await.clone();
        let Some(credential) = current else {
            return Err(StoreError::new("Auth session missing!"));
        };
        if let Some(account) = self.accounts.write().await.get_mut(&credential.email) {
            account.secret = new_secret.to_string();
        }
        self.notify(Some(credential));
        Ok(())
    }
}

/// A thread-safe in-memory store for profile rows.
#[derive(Default, Clone)]
pub struct InMemoryProfileStore {
    profiles: Arc<RwLock<HashMap<SubjectId, Profile>>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, profile: Profile) {
        self.profiles.write().await.insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_profile(&self, subject: &SubjectId) -> StoreResult<Option<Profile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(subject).cloned())
    }

    async fn upsert_profile(&self, subject: &SubjectId, update: &ProfileUpdate) -> StoreResult<()> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles.entry(subject.clone()).or_insert_with(|| Profile {
            id: subject.clone(),
            ..Default::default()
        });
        update.apply(profile);
        profile.updated_at = Some(Utc::now());
        Ok(())
    }
}

/// A thread-safe in-memory purchase ledger.
///
/// Enforces at most one completed row per (subject, item) pair, mirroring the
/// unique index a relational backend would carry.
#[derive(Default, Clone)]
pub struct InMemoryPurchaseStore {
    purchases: Arc<RwLock<Vec<Purchase>>>,
}

impl InMemoryPurchaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row, in insertion order.
    pub async fn all(&self) -> Vec<Purchase> {
        self.purchases.read().await.clone()
    }
}

#[async_trait]
impl PurchaseStore for InMemoryPurchaseStore {
    async fn insert_purchase(&self, purchase: NewPurchase) -> StoreResult<Purchase> {
        let mut purchases = self.purchases.write().await;
        if purchase.status == PurchaseStatus::Completed
            && purchases.iter().any(|p| {
                p.status == PurchaseStatus::Completed
                    && p.subject == purchase.subject
                    && p.item_id == purchase.item_id
            })
        {
            return Err(StoreError::duplicate(format!(
                "completed purchase already exists for {}/{}",
                purchase.subject, purchase.item_id
            )));
        }
        let row = purchase.into_purchase(Utc::now());
        purchases.push(row.clone());
        Ok(row)
    }

    async fn find_completed(&self, subject: &SubjectId, item_id: &str) -> StoreResult<bool> {
        let purchases = self.purchases.read().await;
        Ok(purchases.iter().any(|p| {
            p.status == PurchaseStatus::Completed && &p.subject == subject && p.item_id == item_id
        }))
    }

    async fn list_completed(&self, subject: &SubjectId) -> StoreResult<Vec<Purchase>> {
        let purchases = self.purchases.read().await;
        let mut rows: Vec<Purchase> = purchases
            .iter()
            .rev()
            .filter(|p| p.status == PurchaseStatus::Completed && &p.subject == subject)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}
