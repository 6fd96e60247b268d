//! TOML file configuration structures.
//!
//! These structs directly map to the `edupay-config.toml` file format.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    pub collaborators: CollaboratorsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Shared secret of the platform backend that calls the payment API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub secret: String,
}

/// Provider sections. Each one is optional in the file so that a missing
/// provider is reported by name instead of as a parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub paymob: Option<PaymobConfig>,
    pub paypal: Option<PayPalConfig>,
    pub kashier: Option<KashierConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymobConfig {
    /// Defaults to [`DEFAULT_PAYMOB_URL`].
    #[serde(default)]
    pub base_url: Option<Url>,
    pub api_key: String,
    pub hmac_secret: String,
    pub card_integration_id: i64,
    #[serde(default)]
    pub wallet_integration_id: Option<i64>,
    pub iframe_id: String,
    /// Seconds the payment key stays valid.
    #[serde(default = "default_payment_key_ttl")]
    pub payment_key_ttl: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayPalConfig {
    /// Defaults to the sandbox, [`DEFAULT_PAYPAL_URL`].
    #[serde(default)]
    pub base_url: Option<Url>,
    pub client_id: String,
    pub client_secret: String,
    pub webhook_id: String,
    pub return_url: Url,
    pub cancel_url: Url,
    #[serde(default)]
    pub brand_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KashierMode {
    #[default]
    Test,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KashierConfig {
    #[serde(default)]
    pub checkout_url: Option<Url>,
    #[serde(default)]
    pub api_url: Option<Url>,
    pub merchant_id: String,
    pub api_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub mode: KashierMode,
    pub redirect_url: Url,
    pub webhook_url: Url,
}

/// Base URLs of the ledger, enrollment and catalog services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    pub ledger_url: Url,
    pub enrollment_url: Url,
    pub catalog_url: Url,
    #[serde(default)]
    pub service_token: Option<String>,
}

/// Timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_provider_timeout")]
    pub provider: u64,
    #[serde(default = "default_downstream_timeout")]
    pub downstream: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider_timeout(),
            downstream: default_downstream_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Seconds after which an unfinished settlement claim may be taken over.
    #[serde(default = "default_claim_lease")]
    pub claim_lease: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            claim_lease: default_claim_lease(),
        }
    }
}

pub const DEFAULT_PAYMOB_URL: &str = "https://accept.paymob.com/";
pub const DEFAULT_PAYPAL_URL: &str = "https://api-m.sandbox.paypal.com/";
pub const DEFAULT_KASHIER_CHECKOUT_URL: &str = "https://checkout.kashier.io/";
pub const DEFAULT_KASHIER_API_URL: &str = "https://test-api.kashier.io/";

fn default_payment_key_ttl() -> u64 {
    3600
}

fn default_provider_timeout() -> u64 {
    15
}

fn default_downstream_timeout() -> u64 {
    10
}

fn default_claim_lease() -> u64 {
    120
}
