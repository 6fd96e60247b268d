//! Paymob Accept: cards and Egyptian mobile wallets.
//!
//! Creating a payment takes three calls (auth token, order registration,
//! payment key). Card payments are then completed in the hosted iframe,
//! wallet payments need a fourth `pay` call that returns the wallet's
//! redirect URL.
//!
//! Amounts travel in piasters (`amount_cents`). The transaction callback is
//! authenticated with an HMAC-SHA512 over a fixed list of transaction
//! fields, passed in the `hmac` query parameter.

use async_trait::async_trait;
use edupay_sdk::objects::{
    Currency, PaymentMetadata, PaymentMethod, PaymentResponse, ProcessedWebhook, ProviderId,
    SettlementStatus,
};
use edupay_sdk::signature::{HmacAlgorithm, verify_hex};
use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::{
    PaymentStrategy, ProviderPaymentRequest, TokenCache, WebhookPayload, from_minor_units,
    http_client, read_json, read_json_with_token, scalar_to_string, string_map, to_minor_units,
};
use crate::config::PaymobConfig;
use crate::error::PaymentError;

const PROVIDER: ProviderId = ProviderId::Paymob;

/// Paymob tokens live for an hour; refresh well before that.
const TOKEN_LIFETIME: time::Duration = time::Duration::minutes(50);

/// Transaction fields covered by the callback HMAC, in signing order.
const HMAC_FIELDS: [&str; 20] = [
    "amount_cents",
    "created_at",
    "currency",
    "error_occured",
    "has_parent_transaction",
    "id",
    "integration_id",
    "is_3d_secure",
    "is_auth",
    "is_capture",
    "is_refunded",
    "is_standalone_payment",
    "is_voided",
    "order.id",
    "owner",
    "pending",
    "source_data.pan",
    "source_data.sub_type",
    "source_data.type",
    "success",
];

pub struct PaymobStrategy {
    config: PaymobConfig,
    http_client: reqwest::Client,
    token: TokenCache,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct PaymentKeyResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct WalletPayResponse {
    #[serde(default)]
    redirect_url: Option<String>,
    #[serde(default)]
    iframe_redirection_url: Option<String>,
}

impl PaymobStrategy {
    pub fn new(config: PaymobConfig, timeout: std::time::Duration) -> Self {
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

    async fn auth_token(&self) -> Result<String, PaymentError> {
        let now = OffsetDateTime::now_utc();
        self.token
            .get_or_refresh(now, move || async move {
                debug!("Requesting Paymob auth token");
                let response = self
                    .http_client
                    .post(self.endpoint("/api/auth/tokens")?)
                    .json(&json!({ "api_key": self.config.api_key }))
                    .send()
                    .await;
                let auth: AuthResponse = read_json(PROVIDER, response).await?;
                Ok((auth.token, now + TOKEN_LIFETIME))
            })
            .await
    }

    async fn register_order(
        &self,
        token: &str,
        request: &ProviderPaymentRequest,
        amount_cents: i64,
    ) -> Result<i64, PaymentError> {
        let response = self
            .http_client
            .post(self.endpoint("/api/ecommerce/orders")?)
            .json(&json!({
                "auth_token": token,
                "delivery_needed": "false",
                "amount_cents": amount_cents,
                "currency": request.currency.code(),
                "merchant_order_id": request.reference.to_string(),
                "items": [],
            }))
            .send()
            .await;
        let order: OrderResponse = read_json_with_token(PROVIDER, &self.token, response).await?;
        Ok(order.id)
    }

    async fn payment_key(
        &self,
        token: &str,
        request: &ProviderPaymentRequest,
        amount_cents: i64,
        order_id: i64,
        integration_id: i64,
    ) -> Result<String, PaymentError> {
        let billing = &request.billing;
        let phone = billing.phone.clone().unwrap_or_else(|| "NA".to_owned());
        let response = self
            .http_client
            .post(self.endpoint("/api/acceptance/payment_keys")?)
            .json(&json!({
                "auth_token": token,
                "amount_cents": amount_cents,
                "expiration": self.config.payment_key_ttl.as_secs(),
                "order_id": order_id,
                "currency": request.currency.code(),
                "integration_id": integration_id,
                "lock_order_when_paid": "true",
                "billing_data": {
                    "first_name": billing.first_name,
                    "last_name": billing.last_name,
                    "email": billing.email,
                    "phone_number": phone,
                    "apartment": "NA",
                    "floor": "NA",
                    "street": "NA",
                    "building": "NA",
                    "shipping_method": "NA",
                    "postal_code": "NA",
                    "city": "NA",
                    "country": "EG",
                    "state": "NA",
                },
                "extras": request.metadata.to_map(),
            }))
            .send()
            .await;
        let key: PaymentKeyResponse =
            read_json_with_token(PROVIDER, &self.token, response).await?;
        Ok(key.token)
    }

    async fn wallet_redirect(&self, payment_token: &str, phone: &str) -> Result<String, PaymentError> {
        let response = self
            .http_client
            .post(self.endpoint("/api/acceptance/payments/pay")?)
            .json(&json!({
                "source": { "identifier": phone, "subtype": "WALLET" },
                "payment_token": payment_token,
            }))
            .send()
            .await;
        let pay: WalletPayResponse = read_json(PROVIDER, response).await?;
        pay.redirect_url
            .filter(|url| !url.is_empty())
            .or(pay.iframe_redirection_url.filter(|url| !url.is_empty()))
            .ok_or_else(|| PaymentError::upstream(PROVIDER, "wallet payment returned no redirect url"))
    }
}

#[async_trait]
impl PaymentStrategy for PaymobStrategy {
    fn provider(&self) -> ProviderId {
        PROVIDER
    }

    async fn create_payment_url(
        &self,
        request: &ProviderPaymentRequest,
    ) -> Result<PaymentResponse, PaymentError> {
        if request.currency != Currency::Egp {
            return Err(PaymentError::Validation(format!(
                "paymob does not accept {}",
                request.currency
            )));
        }
        let integration_id = match request.method {
            PaymentMethod::Card => self.config.card_integration_id,
            PaymentMethod::Wallet => self.config.wallet_integration_id.ok_or_else(|| {
                PaymentError::Validation("paymob wallet payments are not enabled".to_owned())
            })?,
            PaymentMethod::PayPal => {
                return Err(PaymentError::Validation(
                    "paymob does not accept PAYPAL".to_owned(),
                ));
            }
        };
        let wallet_phone = match request.method {
            PaymentMethod::Wallet => Some(request.billing.phone.clone().ok_or_else(|| {
                PaymentError::Validation("wallet payments need the payer's phone number".to_owned())
            })?),
            _ => None,
        };
        let amount_cents = to_minor_units(PROVIDER, request.amount)?;

        let token = self.auth_token().await?;
        let order_id = self.register_order(&token, request, amount_cents).await?;
        let payment_token = self
            .payment_key(&token, request, amount_cents, order_id, integration_id)
            .await?;

        let payment_url = match wallet_phone {
            Some(phone) => self.wallet_redirect(&payment_token, &phone).await?,
            None => {
                let mut url = self.endpoint(&format!(
                    "/api/acceptance/iframes/{}",
                    self.config.iframe_id
                ))?;
                url.query_pairs_mut()
                    .append_pair("payment_token", &payment_token);
                url.to_string()
            }
        };

        let ttl = i64::try_from(self.config.payment_key_ttl.as_secs()).unwrap_or(i64::MAX);
        Ok(PaymentResponse {
            payment_url,
            payment_id: order_id.to_string(),
            expires_at: Some(OffsetDateTime::now_utc().unix_timestamp().saturating_add(ttl)),
            provider: PROVIDER,
            metadata: request.metadata.to_map(),
        })
    }

    fn process_webhook(&self, payload: &WebhookPayload) -> Result<ProcessedWebhook, PaymentError> {
        let body = payload.json()?;
        let transaction = body
            .get("obj")
            .ok_or_else(|| PaymentError::malformed(PROVIDER, "missing obj"))?;
        normalize_transaction(transaction)
    }

    async fn verify_webhook(&self, payload: &WebhookPayload) -> bool {
        let Some(provided) = payload.query.get("hmac").map(String::as_str).or(payload.header("hmac")) else {
            warn!("Paymob callback without hmac");
            return false;
        };
        let Ok(body) = payload.json() else {
            return false;
        };
        let Some(transaction) = body.get("obj") else {
            return false;
        };
        let message = hmac_message(transaction);
        verify_hex(
            HmacAlgorithm::Sha512,
            self.config.hmac_secret.as_bytes(),
            message.as_bytes(),
            provided,
        )
    }

    async fn get_payment_status(&self, payment_id: &str) -> Result<ProcessedWebhook, PaymentError> {
        let order_id: i64 = payment_id
            .parse()
            .map_err(|_| PaymentError::Validation(format!("invalid paymob order id: {payment_id}")))?;
        let token = self.auth_token().await?;
        let response = self
            .http_client
            .post(self.endpoint("/api/ecommerce/orders/transaction_inquiry")?)
            .json(&json!({ "auth_token": token, "order_id": order_id }))
            .send()
            .await;
        let transaction: Value = read_json_with_token(PROVIDER, &self.token, response).await?;
        normalize_transaction(&transaction)
    }
}

/// Look up a dotted path in a transaction object.
///
/// `order` is sometimes sent as a bare id instead of an object, so
/// `order.id` falls back to the scalar.
fn lookup<'a>(transaction: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = transaction;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            scalar if segment == "id" => scalar,
            _ => return None,
        };
    }
    Some(current)
}

fn hmac_message(transaction: &Value) -> String {
    HMAC_FIELDS
        .iter()
        .map(|field| {
            lookup(transaction, field)
                .and_then(scalar_to_string)
                .unwrap_or_default()
        })
        .collect()
}

fn flag(transaction: &Value, field: &str) -> bool {
    transaction
        .get(field)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn normalize_transaction(transaction: &Value) -> Result<ProcessedWebhook, PaymentError> {
    let transaction_id = transaction
        .get("id")
        .and_then(scalar_to_string)
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "missing transaction id"))?;
    let amount_cents = transaction
        .get("amount_cents")
        .and_then(|v| v.as_i64().or_else(|| v.as_str()?.parse().ok()))
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "missing amount_cents"))?;
    let currency: Currency = transaction
        .get("currency")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "missing currency"))?
        .parse()
        .map_err(|e| PaymentError::malformed(PROVIDER, e))?;

    let status = if flag(transaction, "pending") {
        SettlementStatus::Pending
    } else if flag(transaction, "success")
        && !flag(transaction, "is_refunded")
        && !flag(transaction, "is_voided")
    {
        SettlementStatus::Completed
    } else {
        SettlementStatus::Failed
    };

    let extras = string_map(lookup(transaction, "payment_key_claims.extra"));
    let metadata = PaymentMetadata::from_map(&extras)
        .map_err(|e| PaymentError::malformed(PROVIDER, e))?;

    Ok(ProcessedWebhook {
        provider: PROVIDER,
        success: status == SettlementStatus::Completed,
        transaction_id,
        payment_id: lookup(transaction, "order.id").and_then(scalar_to_string),
        amount: from_minor_units(amount_cents),
        currency,
        status,
        metadata,
    })
}
