use crate::domain::ports::{ProfileStore, PurchaseStore};
use crate::domain::purchase::{NewPurchase, Purchase, PurchaseStatus};
use crate::domain::session::{Profile, ProfileUpdate, SubjectId};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for profile rows, keyed by subject.
pub const CF_PROFILES: &str = "profiles";
/// Column Family for purchase rows, keyed by purchase id.
pub const CF_PURCHASES: &str = "purchases";
/// Column Family acting as the unique index of completed purchases.
///
/// Key: `len(subject) as u32 BE ++ subject ++ item`, value: purchase id.
pub const CF_ENTITLEMENTS: &str = "entitlements";

/// A persistent store implementation using RocksDB.
///
/// Handles storage for both `Profile` and `Purchase` entities using separate
/// Column Families. Completed purchases are additionally indexed by
/// (subject, item) so a second completed row is rejected.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    // Serializes the check-then-write of the entitlement index.
    insert_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_PROFILES, CF_PURCHASES, CF_ENTITLEMENTS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            insert_lock: Arc::default(),
        })
    }

    fn cf(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::new(format!("{} column family not found", name)))
    }
}

// The length prefix keeps every subject's key range disjoint whatever bytes
// the ids contain.
fn entitlement_prefix(subject: &SubjectId) -> Vec<u8> {
    let subject = subject.as_str().as_bytes();
    let mut key = Vec::with_capacity(4 + subject.len());
    key.extend_from_slice(&(subject.len() as u32).to_be_bytes());
    key.extend_from_slice(subject);
    key
}

fn entitlement_key(subject: &SubjectId, item_id: &str) -> Vec<u8> {
    let mut key = entitlement_prefix(subject);
    key.extend_from_slice(item_id.as_bytes());
    key
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::new(format!("Serialization error: {}", e)))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| StoreError::new(format!("Deserialization error: {}", e)))
}

#[async_trait]
impl ProfileStore for RocksDBStore {
    async fn get_profile(&self, subject: &SubjectId) -> StoreResult<Option<Profile>> {
        let cf = self.cf(CF_PROFILES)?;
        match self.db.get_cf(cf, subject.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn upsert_profile(&self, subject: &SubjectId, update: &ProfileUpdate) -> StoreResult<()> {
        let _guard = self.insert_lock.lock().await;
        let cf = self.cf(CF_PROFILES)?;
        let mut profile = match self.db.get_cf(cf, subject.as_str().as_bytes())? {
            Some(bytes) => decode(&bytes)?,
            None => Profile {
                id: subject.clone(),
                ..Default::default()
            },
        };
        update.apply(&mut profile);
        profile.updated_at = Some(Utc::now());
        self.db
            .put_cf(cf, subject.as_str().as_bytes(), encode(&profile)?)?;
        Ok(())
    }
}

#[async_trait]
impl PurchaseStore for RocksDBStore {
    async fn insert_purchase(&self, purchase: NewPurchase) -> StoreResult<Purchase> {
        let _guard = self.insert_lock.lock().await;
        let purchases = self.cf(CF_PURCHASES)?;
        let entitlements = self.cf(CF_ENTITLEMENTS)?;
        let key = entitlement_key(&purchase.subject, &purchase.item_id);
        let completed = purchase.status == PurchaseStatus::Completed;

        if completed && self.db.get_pinned_cf(entitlements, &key)?.is_some() {
            return Err(StoreError::duplicate(format!(
                "completed purchase already exists for {}/{}",
                purchase.subject, purchase.item_id
            )));
        }

        let row = purchase.into_purchase(Utc::now());
        let mut batch = WriteBatch::default();
        batch.put_cf(purchases, row.id.as_bytes(), encode(&row)?);
        if completed {
            batch.put_cf(entitlements, &key, row.id.as_bytes());
        }
        self.db.write(batch)?;

        Ok(row)
    }

    async fn find_completed(&self, subject: &SubjectId, item_id: &str) -> StoreResult<bool> {
        let cf = self.cf(CF_ENTITLEMENTS)?;
        // Just check if the key exists without retrieving the row
        let result = self.db.get_pinned_cf(cf, entitlement_key(subject, item_id))?;
        Ok(result.is_some())
    }

    async fn list_completed(&self, subject: &SubjectId) -> StoreResult<Vec<Purchase>> {
        let entitlements = self.cf(CF_ENTITLEMENTS)?;
        let purchases = self.cf(CF_PURCHASES)?;
        let prefix = entitlement_prefix(subject);

        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator_cf(entitlements, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, purchase_id) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(bytes) = self.db.get_cf(purchases, &purchase_id)? {
                rows.push(decode::<Purchase>(&bytes)?);
            }
        }

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}
