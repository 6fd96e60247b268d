//! HTTP client for the settlement server's gateway API.
//!
//! Gated behind the `client` cargo feature so crates that only need the
//! shared types do not pull in `reqwest`.

use reqwest::{Client, StatusCode};
use url::Url;

use crate::objects::{
    CreatePaymentEssential, CreatePaymentRequest, PayerIdentity, PaymentLookup, PaymentResponse,
    ProcessedWebhook, ProviderId, SettlementResponse,
};
use crate::signature::{SIGNATURE_HEADER, Signature, SignatureError, SignedObject};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("api error: status {status}, body: {body}")]
    Api { status: StatusCode, body: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Typed client used by the platform backend.
///
/// Every request body is signed with
/// `HMAC-SHA256("{timestamp}.{json}", gateway_secret)`.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: Client,
    base_url: Url,
    secret: Vec<u8>,
}

impl GatewayClient {
    pub fn new(base_url: Url, gateway_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            secret: gateway_secret.into(),
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /payments`
    pub async fn create_payment(
        &self,
        payer: PayerIdentity,
        request: CreatePaymentRequest,
    ) -> Result<PaymentResponse, ClientError> {
        self.post_signed("/payments", CreatePaymentEssential { payer, request })
            .await
    }

    /// `POST /payments/status`
    pub async fn payment_status(
        &self,
        provider: ProviderId,
        payment_id: impl Into<String>,
    ) -> Result<ProcessedWebhook, ClientError> {
        let lookup = PaymentLookup {
            provider,
            payment_id: payment_id.into(),
        };
        self.post_signed("/payments/status", lookup).await
    }

    /// `POST /payments/reconcile`
    pub async fn reconcile(
        &self,
        provider: ProviderId,
        payment_id: impl Into<String>,
    ) -> Result<SettlementResponse, ClientError> {
        let lookup = PaymentLookup {
            provider,
            payment_id: payment_id.into(),
        };
        self.post_signed("/payments/reconcile", lookup).await
    }

    async fn post_signed<B, R>(&self, path: &str, body: B) -> Result<R, ClientError>
    where
        B: Signature,
        R: serde::de::DeserializeOwned,
    {
        let signed = SignedObject::new(body, &self.secret)?;
        let url = self.base_url.join(path)?;

        let resp = self
            .http
            .post(url)
            .header(SIGNATURE_HEADER, signed.to_header())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(signed.json)
            .send()
            .await?;

        parse_response(resp).await
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Json)
}
