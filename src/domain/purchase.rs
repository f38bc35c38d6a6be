use super::amount::Amount;
use super::session::SubjectId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurchaseStatus::Pending => write!(f, "pending"),
            PurchaseStatus::Completed => write!(f, "completed"),
            PurchaseStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A durable purchase row.
///
/// Rows are written already resolved and never mutated afterwards.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Purchase {
    pub id: Uuid,
    pub subject: SubjectId,
    pub item_id: String,
    pub amount: Decimal,
    pub status: PurchaseStatus,
    /// Gateway reference. Present for completed and failed rows.
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Row as submitted to the ledger; the store assigns id and timestamp.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct NewPurchase {
    pub subject: SubjectId,
    pub item_id: String,
    pub amount: Decimal,
    pub status: PurchaseStatus,
    pub reference: Option<String>,
}

impl NewPurchase {
    pub fn into_purchase(self, created_at: DateTime<Utc>) -> Purchase {
        Purchase {
            id: Uuid::new_v4(),
            subject: self.subject,
            item_id: self.item_id,
            amount: self.amount,
            status: self.status,
            reference: self.reference,
            created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum AttemptMode {
    Test,
    Live,
}

impl AttemptMode {
    fn prefix(self) -> &'static str {
        match self {
            AttemptMode::Test => "test",
            AttemptMode::Live => "live",
        }
    }
}

/// An in-flight settlement. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAttempt {
    pub reference: String,
    pub mode: AttemptMode,
    pub amount: Amount,
    pub item_id: String,
    pub subject: SubjectId,
    /// E-mail of the paying subject, forwarded to the checkout widget.
    pub email: String,
}

impl PaymentAttempt {
    /// Starts a new attempt with a freshly generated, globally unique reference.
    pub fn new(
        mode: AttemptMode,
        subject: SubjectId,
        email: impl Into<String>,
        item_id: impl Into<String>,
        amount: Amount,
    ) -> Self {
        Self {
            reference: format!("{}_{}", mode.prefix(), Uuid::new_v4().simple()),
            mode,
            amount,
            item_id: item_id.into(),
            subject,
            email: email.into(),
        }
    }

    /// The completed ledger row for this attempt, carrying the given gateway reference.
    pub fn completed(&self, reference: impl Into<String>) -> NewPurchase {
        NewPurchase {
            subject: self.subject.clone(),
            item_id: self.item_id.clone(),
            amount: self.amount.value(),
            status: PurchaseStatus::Completed,
            reference: Some(reference.into()),
        }
    }

    /// A failed row carrying the gateway reference of a charge that did not
    /// grant an entitlement.
    pub fn failed(&self, reference: impl Into<String>) -> NewPurchase {
        NewPurchase {
            status: PurchaseStatus::Failed,
            ..self.completed(reference)
        }
    }
}
