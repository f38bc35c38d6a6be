//! Server-side transaction verification against the Paystack REST API.

use crate::domain::ports::{PaymentVerifier, Verification};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Base URL for the Paystack API.
pub const API_BASE_URL: &str = "https://api.paystack.co";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<VerifyData>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    currency: Option<String>,
}

/// Verifies transactions with the gateway's secret key.
///
/// The secret never leaves this type; it is only placed in the
/// `Authorization` header of outgoing requests.
#[derive(Debug, Clone)]
pub struct PaystackVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl PaystackVerifier {
    pub fn new(secret_key: &SecretString) -> StoreResult<Self> {
        Self::with_base_url(secret_key, API_BASE_URL)
    }

    /// Builds a verifier against a different API host (staging, local mock).
    pub fn with_base_url(secret_key: &SecretString, base_url: &str) -> StoreResult<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", secret_key.expose_secret()))
            .map_err(|e| StoreError::new(format!("invalid secret key header value: {e}")))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::new(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PaymentVerifier for PaystackVerifier {
    async fn verify_transaction(&self, reference: &str) -> StoreResult<Verification> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::new(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        debug!(status = %status, reference, "verification response received");

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| StoreError::new(format!("malformed verification response: {e}")))?;

        if !status.is_success() || !body.status {
            warn!(status = %status, message = %body.message, reference, "gateway rejected verification");
            return Err(StoreError::with_code(
                status.as_str().to_string(),
                body.message,
            ));
        }

        let data = body
            .data
            .ok_or_else(|| StoreError::new("verification response has no data"))?;

        Ok(Verification {
            status: data.status,
            amount_minor: data.amount,
            currency: data.currency,
        })
    }
}
