//! Canonical settlement event and the outcome of applying it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::objects::metadata::PaymentMetadata;
use crate::objects::payment::{BillingCycle, Currency, PaymentPurpose};
use crate::objects::providers::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SettlementStatus {
    Completed,
    Failed,
    Pending,
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementStatus::Completed => write!(f, "COMPLETED"),
            SettlementStatus::Failed => write!(f, "FAILED"),
            SettlementStatus::Pending => write!(f, "PENDING"),
        }
    }
}

/// Provider-neutral settlement event produced from a webhook or a status poll.
///
/// `amount` is always in major units regardless of how the provider
/// reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedWebhook {
    pub provider: ProviderId,
    pub success: bool,
    /// Provider transaction id. Together with `provider` this is the
    /// idempotency key of the settlement.
    pub transaction_id: String,
    /// Provider order / intent id, when the payload carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: SettlementStatus,
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessType {
    PaidOnce,
    Subscription,
}

impl AccessType {
    pub fn for_cycle(cycle: BillingCycle) -> Self {
        match cycle {
            BillingCycle::OneTime => AccessType::PaidOnce,
            _ => AccessType::Subscription,
        }
    }
}

/// What an applied settlement did downstream. Stored with the idempotency
/// record and replayed for duplicate deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSummary {
    pub purpose: PaymentPurpose,
    pub amount: Decimal,
    pub currency: Currency,
    pub user_id: String,
    pub credited_wallet_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ledger_transaction_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_type: Option<AccessType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_id: Option<String>,
    /// Unix timestamp at which subscription access ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_ends_at: Option<i64>,
}

/// Result of `POST /webhooks/{provider}` and `POST /payments/reconcile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementResponse {
    Applied {
        transaction_id: String,
        summary: SettlementSummary,
    },
    Rejected {
        transaction_id: String,
    },
    Pending {
        transaction_id: String,
    },
    Duplicate {
        transaction_id: String,
        status: String,
    },
}
