use serde::{Deserialize, Serialize};

/// All payment providers supported by edupay.
///
/// The set is closed: adding a provider means adding a variant here and a
/// strategy for it in `edupay-core`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Card and mobile-wallet gateway.
    Paymob,
    #[serde(rename = "paypal")]
    PayPal,
    Kashier,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::Paymob, ProviderId::PayPal, ProviderId::Kashier];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Paymob => "paymob",
            ProviderId::PayPal => "paypal",
            ProviderId::Kashier => "kashier",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown payment provider: {0}")]
pub struct UnknownProvider(pub String);

impl std::str::FromStr for ProviderId {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paymob" => Ok(ProviderId::Paymob),
            "paypal" => Ok(ProviderId::PayPal),
            "kashier" => Ok(ProviderId::Kashier),
            _ => Err(UnknownProvider(s.to_owned())),
        }
    }
}

/// How the payer intends to pay. Each provider accepts a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    /// Mobile wallet (Vodafone Cash, Orange Money, ...).
    Wallet,
    #[serde(rename = "PAYPAL")]
    PayPal,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::Wallet => "WALLET",
            PaymentMethod::PayPal => "PAYPAL",
        }
    }
}
