//! Payment intent request/response objects.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::objects::providers::{PaymentMethod, ProviderId};
use crate::signature::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Egp,
    Usd,
    Eur,
    Gbp,
    Sar,
    Aed,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Egp => "EGP",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Sar => "SAR",
            Currency::Aed => "AED",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl std::str::FromStr for Currency {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EGP" => Ok(Currency::Egp),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            "SAR" => Ok(Currency::Sar),
            "AED" => Ok(Currency::Aed),
            _ => Err(UnknownVariant {
                kind: "currency",
                value: s.to_owned(),
            }),
        }
    }
}

/// What the money is for. Drives the settlement branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentPurpose {
    WalletCredit,
    Subscription,
    CoursePurchase,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::WalletCredit => "WALLET_CREDIT",
            PaymentPurpose::Subscription => "SUBSCRIPTION",
            PaymentPurpose::CoursePurchase => "COURSE_PURCHASE",
        }
    }
}

impl std::str::FromStr for PaymentPurpose {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WALLET_CREDIT" => Ok(PaymentPurpose::WalletCredit),
            "SUBSCRIPTION" => Ok(PaymentPurpose::Subscription),
            "COURSE_PURCHASE" => Ok(PaymentPurpose::CoursePurchase),
            _ => Err(UnknownVariant {
                kind: "payment purpose",
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycle {
    OneTime,
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::OneTime => "ONE_TIME",
            BillingCycle::Monthly => "MONTHLY",
            BillingCycle::Quarterly => "QUARTERLY",
            BillingCycle::Yearly => "YEARLY",
        }
    }

    /// Number of months one billing period covers, `None` for one-time purchases.
    pub fn months(&self) -> Option<u8> {
        match self {
            BillingCycle::OneTime => None,
            BillingCycle::Monthly => Some(1),
            BillingCycle::Quarterly => Some(3),
            BillingCycle::Yearly => Some(12),
        }
    }
}

impl std::str::FromStr for BillingCycle {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONE_TIME" => Ok(BillingCycle::OneTime),
            "MONTHLY" => Ok(BillingCycle::Monthly),
            "QUARTERLY" => Ok(BillingCycle::Quarterly),
            "YEARLY" => Ok(BillingCycle::Yearly),
            _ => Err(UnknownVariant {
                kind: "billing cycle",
                value: s.to_owned(),
            }),
        }
    }
}

/// The authenticated payer, supplied by the session layer of the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayerIdentity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
}

/// Request to start a payment with one of the providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub amount: Decimal,
    pub currency: Currency,
    pub provider: ProviderId,
    pub method: PaymentMethod,
    pub purpose: PaymentPurpose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_cycle: Option<BillingCycle>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Signed body of `POST /payments`.
///
/// The payer identity travels inside the signed body so the settlement
/// server never has to trust an unsigned header for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentEssential {
    pub payer: PayerIdentity,
    pub request: CreatePaymentRequest,
}

impl Signature for CreatePaymentEssential {}

/// Signed body of `POST /payments/status` and `POST /payments/reconcile`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLookup {
    pub provider: ProviderId,
    pub payment_id: String,
}

impl Signature for PaymentLookup {}

/// Returned synchronously once the provider accepted the payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    /// Where the payer has to be redirected.
    pub payment_url: String,
    /// Provider-assigned identifier of the intent (order id).
    pub payment_id: String,
    /// Unix timestamp after which the payment URL stops working.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub provider: ProviderId,
    /// The metadata that was attached to the intent at the provider.
    pub metadata: BTreeMap<String, String>,
}
