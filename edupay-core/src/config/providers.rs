//! Provider credentials and endpoints.

use std::time::Duration;

use url::Url;

#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub paymob: PaymobConfig,
    pub paypal: PayPalConfig,
    pub kashier: KashierConfig,
}

#[derive(Debug, Clone)]
pub struct PaymobConfig {
    pub base_url: Url,
    pub api_key: String,
    /// Secret used for the transaction callback HMAC.
    pub hmac_secret: String,
    pub card_integration_id: i64,
    /// Mobile wallet integration. Wallet payments are refused without it.
    pub wallet_integration_id: Option<i64>,
    pub iframe_id: String,
    /// Lifetime of the payment key, and so of the returned URL.
    pub payment_key_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub base_url: Url,
    pub client_id: String,
    pub client_secret: String,
    /// Id of the webhook registered in the PayPal dashboard, needed for
    /// signature verification.
    pub webhook_id: String,
    pub return_url: Url,
    pub cancel_url: Url,
    pub brand_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KashierMode {
    Test,
    Live,
}

impl KashierMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            KashierMode::Test => "test",
            KashierMode::Live => "live",
        }
    }
}

#[derive(Debug, Clone)]
pub struct KashierConfig {
    pub checkout_url: Url,
    pub api_url: Url,
    pub merchant_id: String,
    /// Payment API key: signs the checkout hash and the webhooks.
    pub api_key: String,
    /// Secret key for the order inquiry API.
    pub secret_key: String,
    pub mode: KashierMode,
    pub redirect_url: Url,
    /// Where Kashier posts the transaction callback.
    pub webhook_url: Url,
}
