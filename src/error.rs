use miette::Diagnostic;
use thiserror::Error;

/// Failure reported by an external collaborator (identity store, data store,
/// payment gateway).
///
/// The message is whatever text the collaborator produced. It is logged but
/// never shown to users directly; see [`AuthError::from_store`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StoreError {
    pub code: Option<String>,
    pub message: String,
}

/// Error code the data store uses when a uniqueness constraint rejects a row.
pub const DUPLICATE_CODE: &str = "23505";

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::with_code(DUPLICATE_CODE, message)
    }

    pub fn is_duplicate(&self) -> bool {
        self.code.as_deref() == Some(DUPLICATE_CODE)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        Self::new(format!("RocksDB error: {}", err))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// User-facing authentication failures.
///
/// Store-specific error text is mapped onto this fixed set of categories.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password. Please check your credentials and try again.")]
    #[diagnostic(code(auth::invalid_credentials))]
    InvalidCredentials,

    #[error(
        "Your account is not yet activated. Please check your email and click the confirmation link."
    )]
    #[diagnostic(code(auth::email_not_confirmed))]
    EmailNotConfirmed,

    #[error("An account with this email already exists. Please try logging in instead.")]
    #[diagnostic(code(auth::already_registered))]
    AlreadyRegistered,

    #[error("No user logged in")]
    #[diagnostic(code(auth::not_signed_in))]
    NotSignedIn,

    #[error("{0}")]
    #[diagnostic(code(auth::invalid_input))]
    InvalidInput(&'static str),

    #[error("Authentication service is unavailable. Please try again later.")]
    #[diagnostic(code(auth::unavailable))]
    Unavailable,
}

impl AuthError {
    /// Maps collaborator error text onto a user-facing category.
    pub fn from_store(err: &StoreError) -> Self {
        let text = err.message.as_str();
        let code = err.code.as_deref().unwrap_or_default();
        if text.contains("Email not confirmed") || code == "email_not_confirmed" {
            AuthError::EmailNotConfirmed
        } else if text.contains("Invalid login credentials") || code == "invalid_credentials" {
            AuthError::InvalidCredentials
        } else if text.contains("User already registered") || code == "user_already_exists" {
            AuthError::AlreadyRegistered
        } else {
            AuthError::Unavailable
        }
    }
}

/// Failures of a purchase settlement, grouped by how the user should react.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum PurchaseError {
    #[error("Please login to make a purchase")]
    #[diagnostic(code(purchase::unauthenticated))]
    Unauthenticated,

    #[error("Amount must be positive")]
    #[diagnostic(code(purchase::invalid_amount))]
    InvalidAmount,

    #[error("You already own this item")]
    #[diagnostic(code(purchase::already_purchased))]
    AlreadyPurchased,

    #[error("A purchase for this item is already in progress")]
    #[diagnostic(code(purchase::in_progress))]
    AttemptInProgress,

    #[error("Test purchases are not enabled")]
    #[diagnostic(code(purchase::test_mode_disabled))]
    TestModeDisabled,

    #[error("Payment gateway not configured")]
    #[diagnostic(
        code(purchase::gateway_not_configured),
        help("Use test mode or contact support.")
    )]
    GatewayNotConfigured,

    #[error("Payment gateway unavailable. Please try again.")]
    #[diagnostic(code(purchase::gateway_unavailable))]
    GatewayUnavailable,

    #[error("Payment verification failed")]
    #[diagnostic(
        code(purchase::verification_failed),
        help("Please contact support if payment was deducted. Do not retry the payment.")
    )]
    VerificationFailed,

    #[error("Payment {reference} was confirmed but could not be recorded")]
    #[diagnostic(
        code(purchase::unrecorded),
        severity(Error),
        help("Your payment is safe and will be recorded automatically. Contact support quoting the reference if access does not appear.")
    )]
    Unrecorded { reference: String },

    #[error("Payment {reference} was taken for an item you already own")]
    #[diagnostic(
        code(purchase::duplicate_charge),
        severity(Error),
        help("Contact support quoting the reference to have this payment refunded.")
    )]
    DuplicateCharge { reference: String },

    #[error("Purchase records are temporarily unavailable")]
    #[diagnostic(code(purchase::ledger))]
    Ledger,
}

/// Startup configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} has an invalid value: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("{0} must be set for live payments")]
    Missing(&'static str),
}

/// Errors surfaced by the batch harness.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("Purchase error: {0}")]
    Purchase(#[from] PurchaseError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, AppError>;
