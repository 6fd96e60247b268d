//! Payment provider strategies.
//!
//! Each provider's request, response and webhook shapes live behind
//! [`PaymentStrategy`]. Nothing outside this module branches on which
//! provider it is talking to.

pub mod kashier;
pub mod paymob;
pub mod paypal;
mod token_cache;

pub use token_cache::TokenCache;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use edupay_sdk::objects::{
    Currency, PaymentMetadata, PaymentMethod, PaymentResponse, ProcessedWebhook, ProviderId,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::PaymentError;

/// One provider behind a uniform interface.
#[async_trait]
pub trait PaymentStrategy: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// Create the payment intent at the provider and return where to send
    /// the payer.
    async fn create_payment_url(
        &self,
        request: &ProviderPaymentRequest,
    ) -> Result<PaymentResponse, PaymentError>;

    /// Normalize a webhook into the canonical settlement event.
    ///
    /// A declined payment is a valid event with `success == false`. Only a
    /// payload that cannot be read at all is an error.
    fn process_webhook(&self, payload: &WebhookPayload) -> Result<ProcessedWebhook, PaymentError>;

    /// Provider specific authenticity check. Anything that cannot be checked
    /// is `false`.
    async fn verify_webhook(&self, payload: &WebhookPayload) -> bool;

    /// Payment a webhook only announces as waiting on the merchant, such as
    /// an approved order that still has to be captured. Such a webhook is
    /// answered with `get_payment_status` for the returned id instead of
    /// being normalized.
    fn payment_to_poll(&self, _payload: &WebhookPayload) -> Option<String> {
        None
    }

    /// Poll the provider for the state of a payment, normalized like a
    /// webhook.
    async fn get_payment_status(&self, payment_id: &str) -> Result<ProcessedWebhook, PaymentError>;
}

/// Billing data shown on the provider checkout page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Provider-neutral payment intent built by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPaymentRequest {
    /// Our reference for the intent, sent as the merchant order id.
    pub reference: Uuid,
    /// Major units, at most two fractional digits.
    pub amount: Decimal,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub description: String,
    pub billing: BillingDetails,
    pub metadata: PaymentMetadata,
}

/// An inbound webhook as received over HTTP.
///
/// The body is kept byte-for-byte since some providers sign the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookPayload {
    pub provider: ProviderId,
    /// Best-effort event type sniffed from the body.
    pub event_type: Option<String>,
    pub raw_body: Bytes,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
}

impl WebhookPayload {
    pub fn new(provider: ProviderId, raw_body: impl Into<Bytes>) -> Self {
        let raw_body = raw_body.into();
        let event_type = sniff_event_type(&raw_body);
        Self {
            provider,
            event_type,
            raw_body,
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn json(&self) -> Result<serde_json::Value, PaymentError> {
        serde_json::from_slice(&self.raw_body)
            .map_err(|e| PaymentError::malformed(self.provider, e))
    }
}

fn sniff_event_type(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    ["event_type", "type", "event"]
        .iter()
        .find_map(|key| value.get(key)?.as_str().map(str::to_owned))
}

/// Convert a major-unit amount into integer minor units (cents, piasters).
pub fn to_minor_units(provider: ProviderId, amount: Decimal) -> Result<i64, PaymentError> {
    let minor = amount * Decimal::ONE_HUNDRED;
    if minor.fract() != Decimal::ZERO {
        return Err(PaymentError::Validation(format!(
            "{provider} cannot charge {amount}: more than two fractional digits"
        )));
    }
    i64::try_from(minor)
        .map_err(|_| PaymentError::Validation(format!("{provider} cannot charge {amount}")))
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Major-unit amounts are sent as fixed two-decimal strings.
pub fn format_major_units(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// Parse an amount that a provider reported as a JSON number or string.
pub fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                let raw = n.to_string();
                raw.parse::<Decimal>()
                    .ok()
                    .or_else(|| Decimal::from_scientific(&raw).ok())
            }
        }
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a scalar JSON value as the string the provider meant.
pub fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Flatten a JSON object of scalars into a string map. Nested values and
/// nulls are dropped.
pub fn string_map(value: Option<&serde_json::Value>) -> BTreeMap<String, String> {
    value
        .and_then(serde_json::Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, value)| Some((key.clone(), scalar_to_string(value)?)))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Read a provider JSON response, turning transport errors and non-2xx
/// statuses into [`PaymentError::Upstream`].
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    provider: ProviderId,
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, PaymentError> {
    let response = response.map_err(|e| {
        if e.is_timeout() {
            PaymentError::Timeout {
                provider,
                operation: "request",
            }
        } else {
            PaymentError::upstream(provider, e)
        }
    })?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PaymentError::upstream(
            provider,
            format!("status {status}: {body}"),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| PaymentError::upstream(provider, format!("unreadable response: {e}")))
}

/// [`read_json`] for a call made with a cached bearer token. A 401 means
/// the provider no longer accepts the token, so it is dropped and the next
/// call fetches a fresh one.
pub(crate) async fn read_json_with_token<T: serde::de::DeserializeOwned>(
    provider: ProviderId,
    token: &TokenCache,
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, PaymentError> {
    if let Ok(response) = &response {
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            tracing::warn!(provider = %provider, "Provider rejected cached token, dropping it");
            token.invalidate().await;
        }
    }
    read_json(provider, response).await
}
