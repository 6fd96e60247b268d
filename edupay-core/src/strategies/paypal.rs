//! PayPal Orders v2.
//!
//! PayPal only echoes one short `custom_id` (127 characters) back in its
//! webhooks, so the purchase metadata travels in its compact form there.
//! Amounts are major-unit strings. Webhooks are authenticated by asking
//! PayPal's `verify-webhook-signature` API.

use async_trait::async_trait;
use edupay_sdk::objects::{
    Currency, PaymentMetadata, PaymentMethod, PaymentResponse, ProcessedWebhook, ProviderId,
    SettlementStatus,
};
use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{
    PaymentStrategy, ProviderPaymentRequest, TokenCache, WebhookPayload, decimal_from_json,
    format_major_units, http_client, read_json, read_json_with_token,
};
use crate::config::PayPalConfig;
use crate::error::PaymentError;

const PROVIDER: ProviderId = ProviderId::PayPal;

/// Longest `custom_id` PayPal accepts.
const CUSTOM_ID_MAX_LEN: usize = 127;

/// Webhook sent once the payer approved an order. The order still has to be
/// captured before PayPal settles it.
const ORDER_APPROVED: &str = "CHECKOUT.ORDER.APPROVED";

/// Refresh this long before PayPal's stated expiry.
const TOKEN_EXPIRY_SKEW: time::Duration = time::Duration::seconds(60);

const TRANSMISSION_HEADERS: [(&str, &str); 5] = [
    ("auth_algo", "paypal-auth-algo"),
    ("cert_url", "paypal-cert-url"),
    ("transmission_id", "paypal-transmission-id"),
    ("transmission_sig", "paypal-transmission-sig"),
    ("transmission_time", "paypal-transmission-time"),
];

pub struct PayPalStrategy {
    config: PayPalConfig,
    http_client: reqwest::Client,
    token: TokenCache,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct VerifySignatureResponse {
    verification_status: String,
}

impl PayPalStrategy {
    pub fn new(config: PayPalConfig, timeout: std::time::Duration) -> Self {
        Self {
            config,
            http_client: http_client(timeout),
            token: TokenCache::new(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<url::Url, PaymentError> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| PaymentError::upstream(PROVIDER, e))
    }

    async fn access_token(&self) -> Result<String, PaymentError> {
        let now = OffsetDateTime::now_utc();
        self.token
            .get_or_refresh(now, move || async move {
                debug!("Requesting PayPal access token");
                let response = self
                    .http_client
                    .post(self.endpoint("/v1/oauth2/token")?)
                    .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
                    .form(&[("grant_type", "client_credentials")])
                    .send()
                    .await;
                let token: AccessTokenResponse = read_json(PROVIDER, response).await?;
                let expires_at =
                    now + time::Duration::seconds(token.expires_in) - TOKEN_EXPIRY_SKEW;
                Ok((token.access_token, expires_at))
            })
            .await
    }

    async fn get_order(&self, token: &str, order_id: &str) -> Result<Value, PaymentError> {
        let response = self
            .http_client
            .get(self.endpoint(&format!("/v2/checkout/orders/{order_id}"))?)
            .bearer_auth(token)
            .send()
            .await;
        read_json_with_token(PROVIDER, &self.token, response).await
    }

    /// Capture an approved order. The request id makes repeated captures of
    /// the same order return the first result.
    async fn capture_order(&self, token: &str, order_id: &str) -> Result<Value, PaymentError> {
        info!(order_id, "Capturing approved PayPal order");
        let response = self
            .http_client
            .post(self.endpoint(&format!("/v2/checkout/orders/{order_id}/capture"))?)
            .bearer_auth(token)
            .header("PayPal-Request-Id", format!("capture-{order_id}"))
            .json(&json!({}))
            .send()
            .await;
        read_json_with_token(PROVIDER, &self.token, response).await
    }
}

#[async_trait]
impl PaymentStrategy for PayPalStrategy {
    fn provider(&self) -> ProviderId {
        PROVIDER
    }

    async fn create_payment_url(
        &self,
        request: &ProviderPaymentRequest,
    ) -> Result<PaymentResponse, PaymentError> {
        if !matches!(request.currency, Currency::Usd | Currency::Eur | Currency::Gbp) {
            return Err(PaymentError::Validation(format!(
                "paypal does not accept {}",
                request.currency
            )));
        }
        if request.method == PaymentMethod::Wallet {
            return Err(PaymentError::Validation(
                "paypal does not accept WALLET".to_owned(),
            ));
        }
        let custom_id = request.metadata.encode();
        if custom_id.len() > CUSTOM_ID_MAX_LEN {
            return Err(PaymentError::Validation(format!(
                "payment metadata too long for paypal ({} > {CUSTOM_ID_MAX_LEN})",
                custom_id.len()
            )));
        }

        let mut experience = json!({
            "return_url": self.config.return_url.as_str(),
            "cancel_url": self.config.cancel_url.as_str(),
            "user_action": "PAY_NOW",
            "shipping_preference": "NO_SHIPPING",
        });
        if let Some(brand) = &self.config.brand_name {
            experience["brand_name"] = json!(brand);
        }
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.reference.to_string(),
                "custom_id": custom_id,
                "description": request.description,
                "amount": {
                    "currency_code": request.currency.code(),
                    "value": format_major_units(request.amount),
                },
            }],
            "payment_source": {
                "paypal": {
                    "email_address": request.billing.email,
                    "experience_context": experience,
                }
            },
        });

        let token = self.access_token().await?;
        let response = self
            .http_client
            .post(self.endpoint("/v2/checkout/orders")?)
            .bearer_auth(&token)
            .header("PayPal-Request-Id", request.reference.to_string())
            .json(&body)
            .send()
            .await;
        let order: CreateOrderResponse =
            read_json_with_token(PROVIDER, &self.token, response).await?;

        let payment_url = order
            .links
            .iter()
            .find(|link| link.rel == "payer-action" || link.rel == "approve")
            .map(|link| link.href.clone())
            .ok_or_else(|| PaymentError::upstream(PROVIDER, "order has no approval link"))?;

        Ok(PaymentResponse {
            payment_url,
            payment_id: order.id,
            expires_at: None,
            provider: PROVIDER,
            metadata: request.metadata.to_map(),
        })
    }

    fn process_webhook(&self, payload: &WebhookPayload) -> Result<ProcessedWebhook, PaymentError> {
        let body = payload.json()?;
        let event_type = body
            .get("event_type")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::malformed(PROVIDER, "missing event_type"))?;
        let resource = body
            .get("resource")
            .ok_or_else(|| PaymentError::malformed(PROVIDER, "missing resource"))?;

        let status = match event_type {
            "PAYMENT.CAPTURE.COMPLETED" => SettlementStatus::Completed,
            "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => SettlementStatus::Failed,
            _ => SettlementStatus::Pending,
        };
        let payment_id = resource
            .pointer("/supplementary_data/related_ids/order_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| {
                event_type
                    .starts_with("CHECKOUT.ORDER.")
                    .then(|| resource.get("id")?.as_str().map(str::to_owned))
                    .flatten()
            });
        normalize_resource(resource, status, payment_id)
    }

    async fn verify_webhook(&self, payload: &WebhookPayload) -> bool {
        let mut fields = Vec::with_capacity(TRANSMISSION_HEADERS.len() + 1);
        for (field, header) in TRANSMISSION_HEADERS {
            let Some(value) = payload.header(header) else {
                warn!(header, "PayPal webhook without transmission header");
                return false;
            };
            fields.push(format!("{}:{}", json!(field), json!(value)));
        }
        fields.push(format!("\"webhook_id\":{}", json!(self.config.webhook_id)));
        // The event goes back byte-for-byte; a re-serialized event fails
        // verification.
        let Ok(event) = std::str::from_utf8(&payload.raw_body) else {
            return false;
        };
        if serde_json::from_str::<serde::de::IgnoredAny>(event).is_err() {
            return false;
        }
        let body = format!("{{{},\"webhook_event\":{}}}", fields.join(","), event);

        let token = match self.access_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Cannot verify PayPal webhook without access token");
                return false;
            }
        };
        let endpoint = match self.endpoint("/v1/notifications/verify-webhook-signature") {
            Ok(endpoint) => endpoint,
            Err(_) => return false,
        };
        let response = self
            .http_client
            .post(endpoint)
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;
        match read_json_with_token::<VerifySignatureResponse>(PROVIDER, &self.token, response).await {
            Ok(result) => result.verification_status == "SUCCESS",
            Err(e) => {
                warn!(error = %e, "PayPal signature verification call failed");
                false
            }
        }
    }

    /// An approved order is captured through the status poll, which then
    /// reports the capture.
    fn payment_to_poll(&self, payload: &WebhookPayload) -> Option<String> {
        if payload.event_type.as_deref() != Some(ORDER_APPROVED) {
            return None;
        }
        let body = payload.json().ok()?;
        body.pointer("/resource/id")?.as_str().map(str::to_owned)
    }

    async fn get_payment_status(&self, payment_id: &str) -> Result<ProcessedWebhook, PaymentError> {
        let token = self.access_token().await?;
        let mut order = self.get_order(&token, payment_id).await?;
        if order.get("status").and_then(Value::as_str) == Some("APPROVED") {
            order = self.capture_order(&token, payment_id).await?;
        }
        normalize_order(&order)
    }
}

/// Normalize a capture (or order) resource from a webhook.
fn normalize_resource(
    resource: &Value,
    status: SettlementStatus,
    payment_id: Option<String>,
) -> Result<ProcessedWebhook, PaymentError> {
    let transaction_id = resource
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "resource without id"))?
        .to_owned();
    let unit = resource
        .pointer("/purchase_units/0")
        .unwrap_or(&Value::Null);
    let amount = resource
        .get("amount")
        .or_else(|| unit.get("amount"))
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "resource without amount"))?;
    let custom_id = resource
        .get("custom_id")
        .or_else(|| unit.get("custom_id"))
        .and_then(Value::as_str);

    let (amount, currency) = parse_amount(amount)?;
    Ok(ProcessedWebhook {
        provider: PROVIDER,
        success: status == SettlementStatus::Completed,
        transaction_id,
        payment_id,
        amount,
        currency,
        status,
        metadata: parse_custom_id(custom_id),
    })
}

/// Normalize an order from the orders API. A captured order is reported by
/// its capture so that polls and webhooks share one transaction id.
fn normalize_order(order: &Value) -> Result<ProcessedWebhook, PaymentError> {
    let order_id = order
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "order without id"))?
        .to_owned();
    let unit = order
        .pointer("/purchase_units/0")
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "order without purchase unit"))?;
    let custom_id = unit.get("custom_id").and_then(Value::as_str);

    if let Some(capture) = unit.pointer("/payments/captures/0") {
        let status = match capture.get("status").and_then(Value::as_str) {
            Some("COMPLETED") => SettlementStatus::Completed,
            Some("DECLINED") | Some("FAILED") => SettlementStatus::Failed,
            _ => SettlementStatus::Pending,
        };
        let mut event = normalize_resource(capture, status, Some(order_id))?;
        if capture.get("custom_id").is_none() {
            event.metadata = parse_custom_id(custom_id);
        }
        return Ok(event);
    }

    let status = match order.get("status").and_then(Value::as_str) {
        Some("VOIDED") => SettlementStatus::Failed,
        _ => SettlementStatus::Pending,
    };
    let amount = unit
        .get("amount")
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "purchase unit without amount"))?;
    let (amount, currency) = parse_amount(amount)?;
    Ok(ProcessedWebhook {
        provider: PROVIDER,
        success: false,
        transaction_id: order_id.clone(),
        payment_id: Some(order_id),
        amount,
        currency,
        status,
        metadata: parse_custom_id(custom_id),
    })
}

fn parse_amount(amount: &Value) -> Result<(rust_decimal::Decimal, Currency), PaymentError> {
    let value = amount
        .get("value")
        .and_then(decimal_from_json)
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "amount without value"))?;
    let currency = amount
        .get("currency_code")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "amount without currency_code"))?
        .parse()
        .map_err(|e| PaymentError::malformed(PROVIDER, e))?;
    Ok((value, currency))
}

/// Unreadable custom ids are kept verbatim so settlement can report them.
fn parse_custom_id(custom_id: Option<&str>) -> PaymentMetadata {
    let Some(raw) = custom_id else {
        return PaymentMetadata::default();
    };
    PaymentMetadata::decode(raw).unwrap_or_else(|e| {
        warn!(error = %e, "Unreadable PayPal custom_id");
        let mut metadata = PaymentMetadata::default();
        metadata.extra.insert("customId".to_owned(), raw.to_owned());
        metadata
    })
}
