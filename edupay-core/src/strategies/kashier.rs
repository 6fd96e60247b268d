//! Kashier hosted checkout.
//!
//! The checkout URL is built locally and carries an order hash,
//! `HMAC-SHA256("/?payment={mid}.{orderId}.{amount}.{currency}", api_key)`.
//! Webhooks carry their own list of signed fields (`signatureKeys`); the
//! signature is an HMAC-SHA256 over those fields as a sorted query string,
//! sent in the `x-kashier-signature` header.

use async_trait::async_trait;
use edupay_sdk::objects::{
    Currency, PaymentMetadata, PaymentMethod, PaymentResponse, ProcessedWebhook, ProviderId,
    SettlementStatus,
};
use edupay_sdk::signature::{HmacAlgorithm, hmac_hex, verify_hex};
use itertools::Itertools;
use serde_json::Value;
use tracing::warn;

use super::{
    PaymentStrategy, ProviderPaymentRequest, WebhookPayload, decimal_from_json,
    format_major_units, http_client, read_json, scalar_to_string, string_map,
};
use crate::config::KashierConfig;
use crate::error::PaymentError;

const PROVIDER: ProviderId = ProviderId::Kashier;

pub const SIGNATURE_HEADER: &str = "x-kashier-signature";

pub struct KashierStrategy {
    config: KashierConfig,
    http_client: reqwest::Client,
}

impl KashierStrategy {
    pub fn new(config: KashierConfig, timeout: std::time::Duration) -> Self {
        Self {
            config,
            http_client: http_client(timeout),
        }
    }

    fn order_hash(&self, order_id: &str, amount: &str, currency: Currency) -> String {
        let path = format!(
            "/?payment={}.{}.{}.{}",
            self.config.merchant_id,
            order_id,
            amount,
            currency.code()
        );
        hmac_hex(
            HmacAlgorithm::Sha256,
            self.config.api_key.as_bytes(),
            path.as_bytes(),
        )
    }
}

#[async_trait]
impl PaymentStrategy for KashierStrategy {
    fn provider(&self) -> ProviderId {
        PROVIDER
    }

    async fn create_payment_url(
        &self,
        request: &ProviderPaymentRequest,
    ) -> Result<PaymentResponse, PaymentError> {
        if !matches!(
            request.currency,
            Currency::Egp | Currency::Usd | Currency::Eur | Currency::Gbp
        ) {
            return Err(PaymentError::Validation(format!(
                "kashier does not accept {}",
                request.currency
            )));
        }
        let allowed_methods = match request.method {
            PaymentMethod::Card => "card",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::PayPal => {
                return Err(PaymentError::Validation(
                    "kashier does not accept PAYPAL".to_owned(),
                ));
            }
        };
        let order_id = request.reference.to_string();
        let amount = format_major_units(request.amount);
        let hash = self.order_hash(&order_id, &amount, request.currency);
        let metadata = request.metadata.to_map();
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| PaymentError::Validation(format!("unserializable metadata: {e}")))?;

        let mut url = self.config.checkout_url.clone();
        url.query_pairs_mut()
            .append_pair("merchantId", &self.config.merchant_id)
            .append_pair("orderId", &order_id)
            .append_pair("amount", &amount)
            .append_pair("currency", request.currency.code())
            .append_pair("hash", &hash)
            .append_pair("mode", self.config.mode.as_str())
            .append_pair("merchantRedirect", self.config.redirect_url.as_str())
            .append_pair("serverWebhook", self.config.webhook_url.as_str())
            .append_pair("allowedMethods", allowed_methods)
            .append_pair("description", &request.description)
            .append_pair("metaData", &metadata_json)
            .append_pair("display", "en");

        Ok(PaymentResponse {
            payment_url: url.to_string(),
            payment_id: order_id,
            expires_at: None,
            provider: PROVIDER,
            metadata,
        })
    }

    fn process_webhook(&self, payload: &WebhookPayload) -> Result<ProcessedWebhook, PaymentError> {
        let body = payload.json()?;
        let event = body
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::malformed(PROVIDER, "missing event"))?;
        let data = body
            .get("data")
            .ok_or_else(|| PaymentError::malformed(PROVIDER, "missing data"))?;
        normalize_data(event, data)
    }

    async fn verify_webhook(&self, payload: &WebhookPayload) -> bool {
        let Some(provided) = payload.header(SIGNATURE_HEADER) else {
            warn!("Kashier webhook without signature header");
            return false;
        };
        let Ok(body) = payload.json() else {
            return false;
        };
        let Some(data) = body.get("data") else {
            return false;
        };
        let Some(message) = signature_message(data) else {
            return false;
        };
        verify_hex(
            HmacAlgorithm::Sha256,
            self.config.api_key.as_bytes(),
            message.as_bytes(),
            provided,
        )
    }

    async fn get_payment_status(&self, payment_id: &str) -> Result<ProcessedWebhook, PaymentError> {
        let url = self
            .config
            .api_url
            .join(&format!("/payments/orders/{}", urlencoding::encode(payment_id)))
            .map_err(|e| PaymentError::upstream(PROVIDER, e))?;
        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &self.config.secret_key)
            .query(&[("merchantId", self.config.merchant_id.as_str())])
            .send()
            .await;
        let body: Value = read_json(PROVIDER, response).await?;
        let data = body
            .get("response")
            .ok_or_else(|| PaymentError::malformed(PROVIDER, "inquiry without response"))?;
        normalize_data("pay", data)
    }
}

/// Sorted `key=value&...` string over the fields named in `signatureKeys`.
fn signature_message(data: &Value) -> Option<String> {
    let keys = data.get("signatureKeys")?.as_array()?;
    let message = keys
        .iter()
        .filter_map(Value::as_str)
        .sorted()
        .map(|key| {
            let value = data.get(key).and_then(scalar_to_string).unwrap_or_default();
            format!("{}={}", urlencoding::encode(key), urlencoding::encode(&value))
        })
        .join("&");
    Some(message)
}

/// Only a successful `pay` event moves money in. Other events (refunds,
/// authorizations) are acknowledged as pending so they never claim the
/// transaction id.
fn normalize_data(event: &str, data: &Value) -> Result<ProcessedWebhook, PaymentError> {
    let transaction_id = data
        .get("transactionId")
        .and_then(scalar_to_string)
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "missing transactionId"))?;
    let amount = data
        .get("amount")
        .and_then(decimal_from_json)
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "missing amount"))?;
    let currency: Currency = data
        .get("currency")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::malformed(PROVIDER, "missing currency"))?
        .parse()
        .map_err(|e| PaymentError::malformed(PROVIDER, e))?;

    let status = match (event, data.get("status").and_then(Value::as_str)) {
        ("pay", Some("SUCCESS")) => SettlementStatus::Completed,
        ("pay", Some("PENDING")) => SettlementStatus::Pending,
        ("pay", _) => SettlementStatus::Failed,
        _ => SettlementStatus::Pending,
    };

    // metaData arrives either as an object or as the JSON string we sent.
    let metadata_map = match data.get("metaData") {
        Some(Value::String(raw)) => string_map(serde_json::from_str::<Value>(raw).ok().as_ref()),
        other => string_map(other),
    };
    let metadata = PaymentMetadata::from_map(&metadata_map)
        .map_err(|e| PaymentError::malformed(PROVIDER, e))?;

    Ok(ProcessedWebhook {
        provider: PROVIDER,
        success: status == SettlementStatus::Completed,
        transaction_id,
        payment_id: data.get("merchantOrderId").and_then(scalar_to_string),
        amount,
        currency,
        status,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KashierMode;
    use crate::strategies::BillingDetails;
    use edupay_sdk::objects::{BillingCycle, PaymentPurpose};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const API_KEY: &str = "kashier-api-key";

    fn config(api: &str) -> KashierConfig {
        KashierConfig {
            checkout_url: "https://checkout.kashier.example/".parse().unwrap(),
            api_url: api.parse().unwrap(),
            merchant_id: "MID-1".to_owned(),
            api_key: API_KEY.to_owned(),
            secret_key: "secret-key".to_owned(),
            mode: KashierMode::Test,
            redirect_url: "https://learn.example/kashier/return".parse().unwrap(),
            webhook_url: "https://pay.learn.example/webhooks/kashier".parse().unwrap(),
        }
    }

    fn strategy() -> KashierStrategy {
        KashierStrategy::new(config("http://localhost"), Duration::from_secs(5))
    }

    fn data(status: &str) -> Value {
        json!({
            "merchantOrderId": "0190a1b2-0000-7000-8000-000000000001",
            "transactionId": "TX-77",
            "status": status,
            "amount": 100,
            "currency": "EGP",
            "method": "card",
            "metaData": {
                "v": "1",
                "purpose": "COURSE_PURCHASE",
                "userId": "U1",
                "courseId": "C1",
                "billingCycle": "MONTHLY"
            },
            "signatureKeys": ["merchantOrderId", "transactionId", "status", "amount", "currency", "method"]
        })
    }

    fn signed(event: &str, data: Value) -> WebhookPayload {
        let message = signature_message(&data).unwrap();
        let signature = hmac_hex(HmacAlgorithm::Sha256, API_KEY.as_bytes(), message.as_bytes());
        WebhookPayload::new(PROVIDER, json!({ "event": event, "data": data }).to_string())
            .with_header("X-Kashier-Signature", signature)
    }

    #[test]
    fn test_signature_message_is_sorted() {
        let message = signature_message(&data("SUCCESS")).unwrap();
        assert_eq!(
            message,
            "amount=100&currency=EGP&merchantOrderId=0190a1b2-0000-7000-8000-000000000001&method=card&status=SUCCESS&transactionId=TX-77"
        );
    }

    #[test]
    fn test_successful_pay_event() {
        let event = strategy().process_webhook(&signed("pay", data("SUCCESS"))).unwrap();
        assert!(event.success);
        assert_eq!(event.status, SettlementStatus::Completed);
        assert_eq!(event.amount, dec!(100));
        assert_eq!(event.transaction_id, "TX-77");
        assert_eq!(event.metadata.billing_cycle, Some(BillingCycle::Monthly));
        assert_eq!(event.metadata.course_id.as_deref(), Some("C1"));
    }

    #[test]
    fn test_failed_and_non_pay_events() {
        let failed = strategy().process_webhook(&signed("pay", data("FAILURE"))).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.status, SettlementStatus::Failed);

        let refund = strategy().process_webhook(&signed("refund", data("SUCCESS"))).unwrap();
        assert!(!refund.success);
        assert_eq!(refund.status, SettlementStatus::Pending);
    }

    #[test]
    fn test_metadata_as_json_string() {
        let mut d = data("SUCCESS");
        d["metaData"] = json!(r#"{"v":"1","purpose":"WALLET_CREDIT","userId":"U5"}"#);
        d["amount"] = json!("49.50");
        let event = strategy().process_webhook(&signed("pay", d)).unwrap();
        assert_eq!(event.metadata.purpose, Some(PaymentPurpose::WalletCredit));
        assert_eq!(event.metadata.user_id.as_deref(), Some("U5"));
        assert_eq!(event.amount, dec!(49.50));
    }

    #[tokio::test]
    async fn test_verify_webhook() {
        let strategy = strategy();
        assert!(strategy.verify_webhook(&signed("pay", data("SUCCESS"))).await);

        let mut forged = signed("pay", data("SUCCESS"));
        let mut tampered = data("SUCCESS");
        tampered["amount"] = json!(1);
        forged.raw_body = json!({ "event": "pay", "data": tampered }).to_string().into();
        assert!(!strategy.verify_webhook(&forged).await);

        let mut unsigned = signed("pay", data("SUCCESS"));
        unsigned.headers.clear();
        assert!(!strategy.verify_webhook(&unsigned).await);

        let mut wrong_key = signed("pay", data("SUCCESS"));
        wrong_key.headers.insert(SIGNATURE_HEADER.to_owned(), "00".repeat(32));
        assert!(!strategy.verify_webhook(&wrong_key).await);
    }

    #[tokio::test]
    async fn test_checkout_url() {
        let request = ProviderPaymentRequest {
            reference: "0190a1b2-0000-7000-8000-000000000001".parse().unwrap(),
            amount: dec!(100),
            currency: Currency::Egp,
            method: PaymentMethod::Card,
            description: "Course: Rust".to_owned(),
            billing: BillingDetails {
                first_name: "Mona".to_owned(),
                last_name: "Adel".to_owned(),
                email: "mona@example.com".to_owned(),
                phone: None,
            },
            metadata: PaymentMetadata::new(PaymentPurpose::WalletCredit, "U1"),
        };
        let response = strategy().create_payment_url(&request).await.unwrap();
        let url: url::Url = response.payment_url.parse().unwrap();
        let query: BTreeMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(response.payment_id, "0190a1b2-0000-7000-8000-000000000001");
        assert_eq!(query["merchantId"], "MID-1");
        assert_eq!(query["amount"], "100.00");
        assert_eq!(query["currency"], "EGP");
        assert_eq!(query["mode"], "test");
        let expected_hash = hmac_hex(
            HmacAlgorithm::Sha256,
            API_KEY.as_bytes(),
            b"/?payment=MID-1.0190a1b2-0000-7000-8000-000000000001.100.00.EGP",
        );
        assert_eq!(query["hash"], expected_hash);
        let metadata: BTreeMap<String, String> = serde_json::from_str(&query["metaData"]).unwrap();
        assert_eq!(metadata["purpose"], "WALLET_CREDIT");
        assert_eq!(metadata["userId"], "U1");
    }

    #[tokio::test]
    async fn test_status_poll() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/orders/ORDER-9"))
            .and(header("authorization", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "response": data("SUCCESS")
            })))
            .mount(&server)
            .await;
        let strategy = KashierStrategy::new(config(&server.uri()), Duration::from_secs(5));

        let event = strategy.get_payment_status("ORDER-9").await.unwrap();
        assert!(event.success);
        assert_eq!(event.transaction_id, "TX-77");
    }
}
