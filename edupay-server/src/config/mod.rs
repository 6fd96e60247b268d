//! Configuration module for edupay-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;
pub mod runtime;

use crate::config::file::{
    DEFAULT_KASHIER_API_URL, DEFAULT_KASHIER_CHECKOUT_URL, DEFAULT_PAYMOB_URL, DEFAULT_PAYPAL_URL,
    FileConfig, KashierConfig as FileKashierConfig, KashierMode as FileKashierMode,
    PayPalConfig as FilePayPalConfig, PaymobConfig as FilePaymobConfig,
};
use crate::config::runtime::{
    CollaboratorsConfig, GatewayConfig, KashierConfig, KashierMode, PayPalConfig, PaymobConfig,
    ProvidersConfig, ServerConfig, SettlementConfig, TimeoutsConfig,
};
use edupay_core::settlement::MAX_DOWNSTREAM_CALLS;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub providers: ProvidersConfig,
    pub collaborators: CollaboratorsConfig,
    pub timeouts: TimeoutsConfig,
    pub settlement: SettlementConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read, override, validate and convert the configuration file.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_str(&config_content)
    }

    fn load_str(&self, content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;
        build_loaded_config(file_config)
    }
}

fn validation(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn require_non_empty(value: &str, name: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(validation(format!("{name} must not be empty")));
    }
    Ok(())
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    require_non_empty(&config.gateway.secret, "gateway.secret")?;

    if let Some(paymob) = &config.providers.paymob {
        require_non_empty(&paymob.api_key, "providers.paymob.api_key")?;
        require_non_empty(&paymob.hmac_secret, "providers.paymob.hmac_secret")?;
        require_non_empty(&paymob.iframe_id, "providers.paymob.iframe_id")?;
        if paymob.payment_key_ttl == 0 {
            return Err(validation("providers.paymob.payment_key_ttl must be positive"));
        }
    }
    if let Some(paypal) = &config.providers.paypal {
        require_non_empty(&paypal.client_id, "providers.paypal.client_id")?;
        require_non_empty(&paypal.client_secret, "providers.paypal.client_secret")?;
        require_non_empty(&paypal.webhook_id, "providers.paypal.webhook_id")?;
    }
    if let Some(kashier) = &config.providers.kashier {
        require_non_empty(&kashier.merchant_id, "providers.kashier.merchant_id")?;
        require_non_empty(&kashier.api_key, "providers.kashier.api_key")?;
        require_non_empty(&kashier.secret_key, "providers.kashier.secret_key")?;
    }

    let missing: Vec<&str> = [
        ("paymob", config.providers.paymob.is_none()),
        ("paypal", config.providers.paypal.is_none()),
        ("kashier", config.providers.kashier.is_none()),
    ]
    .into_iter()
    .filter_map(|(name, missing)| missing.then_some(name))
    .collect();
    if !missing.is_empty() {
        return Err(validation(format!(
            "missing provider sections: {}",
            missing.join(", ")
        )));
    }

    if config.timeouts.provider == 0 || config.timeouts.downstream == 0 {
        return Err(validation("timeouts must be positive"));
    }
    let slowest_settlement = u64::from(MAX_DOWNSTREAM_CALLS) * config.timeouts.downstream;
    if config.settlement.claim_lease <= slowest_settlement {
        return Err(validation(format!(
            "settlement.claim_lease ({}s) must exceed {MAX_DOWNSTREAM_CALLS} x timeouts.downstream ({slowest_settlement}s)",
            config.settlement.claim_lease
        )));
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let providers = file_config.providers;
    let (Some(paymob), Some(paypal), Some(kashier)) =
        (providers.paymob, providers.paypal, providers.kashier)
    else {
        return Err(validation("missing provider sections"));
    };

    Ok(LoadedConfig {
        server: ServerConfig {
            listen: file_config.server.listen,
        },
        gateway: GatewayConfig::new(file_config.gateway.secret.into_bytes()),
        providers: ProvidersConfig {
            paymob: convert_paymob(paymob)?,
            paypal: convert_paypal(paypal)?,
            kashier: convert_kashier(kashier)?,
        },
        collaborators: CollaboratorsConfig {
            ledger_url: file_config.collaborators.ledger_url,
            enrollment_url: file_config.collaborators.enrollment_url,
            catalog_url: file_config.collaborators.catalog_url,
            service_token: file_config.collaborators.service_token,
        },
        timeouts: TimeoutsConfig {
            provider: Duration::from_secs(file_config.timeouts.provider),
            downstream: Duration::from_secs(file_config.timeouts.downstream),
        },
        settlement: SettlementConfig {
            claim_lease: Duration::from_secs(file_config.settlement.claim_lease),
        },
    })
}

fn url_or_default(value: Option<Url>, default: &str) -> Result<Url, ConfigError> {
    match value {
        Some(url) => Ok(url),
        None => Url::parse(default).map_err(|e| validation(format!("default url {default}: {e}"))),
    }
}

fn convert_paymob(p: FilePaymobConfig) -> Result<PaymobConfig, ConfigError> {
    Ok(PaymobConfig {
        base_url: url_or_default(p.base_url, DEFAULT_PAYMOB_URL)?,
        api_key: p.api_key,
        hmac_secret: p.hmac_secret,
        card_integration_id: p.card_integration_id,
        wallet_integration_id: p.wallet_integration_id,
        iframe_id: p.iframe_id,
        payment_key_ttl: Duration::from_secs(p.payment_key_ttl),
    })
}

fn convert_paypal(p: FilePayPalConfig) -> Result<PayPalConfig, ConfigError> {
    Ok(PayPalConfig {
        base_url: url_or_default(p.base_url, DEFAULT_PAYPAL_URL)?,
        client_id: p.client_id,
        client_secret: p.client_secret,
        webhook_id: p.webhook_id,
        return_url: p.return_url,
        cancel_url: p.cancel_url,
        brand_name: p.brand_name,
    })
}

fn convert_kashier(k: FileKashierConfig) -> Result<KashierConfig, ConfigError> {
    Ok(KashierConfig {
        checkout_url: url_or_default(k.checkout_url, DEFAULT_KASHIER_CHECKOUT_URL)?,
        api_url: url_or_default(k.api_url, DEFAULT_KASHIER_API_URL)?,
        merchant_id: k.merchant_id,
        api_key: k.api_key,
        secret_key: k.secret_key,
        mode: match k.mode {
            FileKashierMode::Test => KashierMode::Test,
            FileKashierMode::Live => KashierMode::Live,
        },
        redirect_url: k.redirect_url,
        webhook_url: k.webhook_url,
    })
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file::tests::EXAMPLE;

    fn loader() -> ConfigLoader {
        ConfigLoader::new("edupay-config.toml", None)
    }

    #[test]
    fn test_load_converts_sections() {
        let config = loader().load_str(EXAMPLE).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.gateway.secret_bytes(), b"backend-secret");
        assert_eq!(config.providers.paymob.card_integration_id, 4100);
        assert_eq!(
            config.providers.paymob.payment_key_ttl,
            Duration::from_secs(3600)
        );
        assert_eq!(config.providers.kashier.mode, KashierMode::Live);
        assert_eq!(config.timeouts.provider, Duration::from_secs(20));
        assert_eq!(config.timeouts.downstream, Duration::from_secs(10));
        assert_eq!(config.settlement.claim_lease, Duration::from_secs(300));
        assert_eq!(
            config.providers.paymob.base_url.as_str(),
            "https://accept.paymob.com/"
        );
        assert_eq!(
            config.providers.kashier.api_url.as_str(),
            "https://test-api.kashier.io/"
        );
    }

    #[test]
    fn test_configured_url_overrides_default() {
        let custom = EXAMPLE.replace(
            "[providers.paymob]\n",
            "[providers.paymob]\nbase_url = \"https://paymob.internal/\"\n",
        );
        let config = loader().load_str(&custom).unwrap();
        assert_eq!(
            config.providers.paymob.base_url.as_str(),
            "https://paymob.internal/"
        );
    }

    #[test]
    fn test_claim_lease_must_outlast_a_settlement() {
        // 6 downstream calls of 10s each may take a minute
        let short = EXAMPLE.replace("claim_lease = 300", "claim_lease = 60");
        let err = loader().load_str(&short).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError(ref m) if m.contains("claim_lease")),
            "{err}"
        );

        let enough = EXAMPLE.replace("claim_lease = 300", "claim_lease = 61");
        assert!(loader().load_str(&enough).is_ok());
    }

    #[test]
    fn test_listen_override() {
        let listen: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let config = ConfigLoader::new("edupay-config.toml", Some(listen))
            .load_str(EXAMPLE)
            .unwrap();
        assert_eq!(config.server.listen, listen);
    }

    #[test]
    fn test_missing_provider_is_rejected() {
        let without_paypal = EXAMPLE.replace("[providers.paypal]", "[unused.paypal]");
        let err = loader().load_str(&without_paypal).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError(ref m) if m.contains("paypal")),
            "{err}"
        );
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        let empty = EXAMPLE.replace(r#"secret = "backend-secret""#, r#"secret = """#);
        assert!(matches!(
            loader().load_str(&empty),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let zero = EXAMPLE.replace("provider = 20", "provider = 0");
        assert!(matches!(
            loader().load_str(&zero),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
