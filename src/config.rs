use crate::application::gateway::{GatewayAdapter, GatewaySettings};
use crate::application::orchestrator::SettlementMode;
use crate::domain::ports::SharedPaymentWidget;
use crate::error::{ConfigError, StoreResult};
use crate::infrastructure::paystack::PaystackVerifier;
use secrecy::SecretString;
use std::sync::Arc;
use std::env;
use std::time::Duration;

/// Default bound on the initial credential lookup.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);
/// Default artificial latency of a simulated purchase.
pub const DEFAULT_TEST_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_CURRENCY: &str = "NGN";

/// Which settlement path purchases take. Fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub enum PaymentModeConfig {
    /// Purchases are simulated and recorded without any external call.
    Test { delay: Duration },
    /// Purchases go through the hosted widget and are verified server-side.
    Live(LiveGatewayConfig),
}

impl PaymentModeConfig {
    /// Builds the settlement path. `widget` is only used in live mode.
    pub fn settlement_mode(&self, widget: SharedPaymentWidget) -> StoreResult<SettlementMode> {
        match self {
            PaymentModeConfig::Test { delay } => Ok(SettlementMode::Test { delay: *delay }),
            PaymentModeConfig::Live(live) => {
                let verifier = match &live.base_url {
                    Some(base_url) => PaystackVerifier::with_base_url(&live.secret_key, base_url)?,
                    None => PaystackVerifier::new(&live.secret_key)?,
                };
                let settings = GatewaySettings {
                    public_key: live.public_key.clone(),
                    currency: live.currency.clone(),
                };
                Ok(SettlementMode::Live {
                    gateway: GatewayAdapter::new(settings, widget),
                    verifier: Arc::new(verifier),
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveGatewayConfig {
    /// Publishable key handed to the checkout widget. May be absent; the
    /// gateway adapter refuses to open the widget in that case.
    pub public_key: Option<String>,
    pub secret_key: SecretString,
    pub currency: String,
    pub base_url: Option<String>,
}

/// Startup configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub auth_timeout: Duration,
    pub payment_mode: PaymentModeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            payment_mode: PaymentModeConfig::Test {
                delay: DEFAULT_TEST_DELAY,
            },
        }
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// Live payments must be requested explicitly with
    /// `MARKETPLACE_PAYMENT_MODE=live`; anything else is rejected rather than
    /// guessed from the shape of the keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let auth_timeout = millis(&lookup, "MARKETPLACE_AUTH_TIMEOUT_MS")?.unwrap_or(DEFAULT_AUTH_TIMEOUT);

        let mode = lookup("MARKETPLACE_PAYMENT_MODE").unwrap_or_else(|| "test".to_string());
        let payment_mode = match mode.trim().to_ascii_lowercase().as_str() {
            "test" => PaymentModeConfig::Test {
                delay: millis(&lookup, "MARKETPLACE_TEST_DELAY_MS")?.unwrap_or(DEFAULT_TEST_DELAY),
            },
            "live" => {
                let secret_key = lookup("PAYSTACK_SECRET_KEY")
                    .filter(|key| !key.trim().is_empty())
                    .ok_or(ConfigError::Missing("PAYSTACK_SECRET_KEY"))?;
                PaymentModeConfig::Live(LiveGatewayConfig {
                    public_key: lookup("PAYSTACK_PUBLIC_KEY"),
                    secret_key: SecretString::from(secret_key),
                    currency: lookup("PAYSTACK_CURRENCY")
                        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                    base_url: lookup("PAYSTACK_BASE_URL"),
                })
            }
            _ => {
                return Err(ConfigError::InvalidValue {
                    name: "MARKETPLACE_PAYMENT_MODE",
                    value: mode,
                });
            }
        };

        Ok(Self {
            auth_timeout,
            payment_mode,
        })
    }
}

fn millis<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidValue { name, value })
        })
        .transpose()
}
