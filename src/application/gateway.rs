use crate::domain::ports::{CheckoutConfig, CheckoutOutcome, SharedPaymentWidget};
use crate::domain::purchase::PaymentAttempt;
use crate::error::PurchaseError;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Publishable key shipped in sample configuration files.
pub const PLACEHOLDER_PUBLIC_KEY: &str = "pk_test_your_public_key_here";

/// Publishable settings of the hosted checkout widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub public_key: Option<String>,
    pub currency: String,
}

impl GatewaySettings {
    /// True when the public key is present and not a sample placeholder.
    pub fn is_configured(&self) -> bool {
        match self.public_key.as_deref().map(str::trim) {
            Some(key) => {
                !key.is_empty() && key != PLACEHOLDER_PUBLIC_KEY && !key.contains("your_public_key")
            }
            None => false,
        }
    }
}

/// Wraps the hosted payment widget behind a single awaitable call.
///
/// Performs no business validation: amount and currency are the caller's
/// concern. It only refuses to open when the widget is not configured.
#[derive(Clone)]
pub struct GatewayAdapter {
    settings: GatewaySettings,
    widget: SharedPaymentWidget,
}

impl GatewayAdapter {
    pub fn new(settings: GatewaySettings, widget: SharedPaymentWidget) -> Self {
        Self { settings, widget }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Builds the widget configuration for an attempt.
    pub fn checkout_config(
        &self,
        attempt: &PaymentAttempt,
        item_name: Option<&str>,
    ) -> Result<CheckoutConfig, PurchaseError> {
        let public_key = match &self.settings.public_key {
            Some(key) if self.settings.is_configured() => key.trim().to_string(),
            _ => return Err(PurchaseError::GatewayNotConfigured),
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("item_id".to_string(), attempt.item_id.clone());
        metadata.insert("subject_id".to_string(), attempt.subject.to_string());
        if let Some(name) = item_name {
            metadata.insert("item_name".to_string(), name.to_string());
        }

        Ok(CheckoutConfig {
            reference: attempt.reference.clone(),
            email: attempt.email.clone(),
            amount_minor: attempt.amount.to_minor_units()?,
            currency: self.settings.currency.clone(),
            public_key,
            metadata,
        })
    }

    /// Opens the widget and waits for it to report success or cancellation.
    pub async fn open(
        &self,
        attempt: &PaymentAttempt,
        item_name: Option<&str>,
    ) -> Result<CheckoutOutcome, PurchaseError> {
        let config = match self.checkout_config(attempt, item_name) {
            Ok(config) => config,
            Err(err) => {
                warn!(reference = %attempt.reference, "payment gateway not configured, refusing to open checkout");
                return Err(err);
            }
        };

        let outcome = self.widget.open(&config).await.map_err(|err| {
            warn!(reference = %attempt.reference, error = %err, "checkout widget failed");
            PurchaseError::GatewayUnavailable
        })?;

        match &outcome {
            CheckoutOutcome::Success(reference) => {
                info!(reference = %reference, amount_minor = config.amount_minor, "payment successful")
            }
            CheckoutOutcome::Cancelled => info!(reference = %attempt.reference, "payment cancelled"),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::amount::Amount;
    use crate::domain::ports::PaymentWidget;
    use crate::domain::purchase::AttemptMode;
    use crate::domain::session::SubjectId;
    use crate::error::StoreResult;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct EchoWidget {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl PaymentWidget for EchoWidget {
        async fn open(&self, config: &CheckoutConfig) -> StoreResult<CheckoutOutcome> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(CheckoutOutcome::Success(config.reference.clone()))
        }
    }

    fn attempt() -> PaymentAttempt {
        PaymentAttempt::new(
            AttemptMode::Live,
            SubjectId::new("u1"),
            "ada@example.com",
            "a1",
            Amount::new(dec!(29.99)).unwrap(),
        )
    }

    fn settings(public_key: Option<&str>) -> GatewaySettings {
        GatewaySettings {
            public_key: public_key.map(str::to_string),
            currency: "NGN".into(),
        }
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(!settings(None).is_configured());
        assert!(!settings(Some("")).is_configured());
        assert!(!settings(Some(PLACEHOLDER_PUBLIC_KEY)).is_configured());
        assert!(!settings(Some("pk_live_your_public_key")).is_configured());
        assert!(settings(Some("pk_test_1a2b3c")).is_configured());
    }

    #[test]
    fn test_checkout_config() {
        let widget = Arc::new(EchoWidget::default());
        let adapter = GatewayAdapter::new(settings(Some("pk_test_1a2b3c")), widget);
        let attempt = attempt();

        let config = adapter.checkout_config(&attempt, Some("Research Agent")).unwrap();
        assert_eq!(config.amount_minor, 2999);
        assert_eq!(config.currency, "NGN");
        assert_eq!(config.reference, attempt.reference);
        assert_eq!(config.email, "ada@example.com");
        assert_eq!(config.metadata.get("item_id").map(String::as_str), Some("a1"));
        assert_eq!(config.metadata.get("subject_id").map(String::as_str), Some("u1"));
        assert_eq!(
            config.metadata.get("item_name").map(String::as_str),
            Some("Research Agent")
        );
    }

    #[tokio::test]
    async fn test_open_refuses_placeholder_without_calling_widget() {
        let widget = Arc::new(EchoWidget::default());
        let adapter = GatewayAdapter::new(settings(Some(PLACEHOLDER_PUBLIC_KEY)), widget.clone());

        let result = adapter.open(&attempt(), None).await;
        assert_eq!(result, Err(PurchaseError::GatewayNotConfigured));
        assert_eq!(widget.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_returns_widget_outcome() {
        let widget = Arc::new(EchoWidget::default());
        let adapter = GatewayAdapter::new(settings(Some("pk_test_1a2b3c")), widget.clone());
        let attempt = attempt();

        let outcome = adapter.open(&attempt, None).await.unwrap();
        assert_eq!(outcome, CheckoutOutcome::Success(attempt.reference.clone()));
        assert_eq!(widget.opened.load(Ordering::SeqCst), 1);
    }
}
