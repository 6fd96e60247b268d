//! Contracts of the services settlement depends on.
//!
//! The wallet ledger, the enrollment service and the identity/course catalog
//! are owned by other services. The core only talks to them through these
//! traits; `edupay-server` provides HTTP implementations.

use async_trait::async_trait;
use edupay_sdk::objects::{AccessType, BillingCycle, Currency};
use rust_decimal::Decimal;
use thiserror::Error;
use time::OffsetDateTime;

use crate::utils::billing_window;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Transport failure or 5xx from the collaborator.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    /// The collaborator refused the request (4xx other than 404).
    #[error("{service} rejected the request with status {status}: {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Unavailable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WalletOwner {
    User(String),
    Organization(String),
}

/// A ledger movement. `reference` is the provider transaction id, which the
/// ledger uses to deduplicate repeated calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub wallet_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub reference: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub transaction_id: String,
}

#[async_trait]
pub trait WalletLedger: Send + Sync {
    async fn wallet_of(&self, owner: &WalletOwner) -> Result<String, CollaboratorError>;

    /// Credit a wallet. Idempotent by `entry.reference`.
    async fn credit(&self, entry: LedgerEntry) -> Result<LedgerReceipt, CollaboratorError>;

    /// Record a purchase against a wallet. Idempotent by `entry.reference`.
    async fn debit(&self, entry: LedgerEntry) -> Result<LedgerReceipt, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRequest {
    pub user_id: String,
    pub course_id: String,
    pub access_type: AccessType,
    pub billing_cycle: BillingCycle,
    pub starts_at: OffsetDateTime,
    /// `None` for one-time purchases, which never expire.
    pub ends_at: Option<OffsetDateTime>,
    pub payment_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub enrollment_id: String,
}

#[async_trait]
pub trait EnrollmentService: Send + Sync {
    /// Grant access to the course. Idempotent by `request.payment_reference`:
    /// repeating a request that already enrolled the user returns the
    /// existing enrollment.
    async fn enroll_user_to_course(
        &self,
        request: EnrollmentRequest,
    ) -> Result<Enrollment, CollaboratorError>;

    /// End of the access window that starts at `from`.
    fn calculate_end_date(&self, cycle: BillingCycle, from: OffsetDateTime) -> Option<OffsetDateTime> {
        billing_window::end_date(cycle, from)
    }
}

/// Billing data of a payer, as needed by the providers' checkout forms.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayerProfile {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub wallet_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseBilling {
    pub course_id: String,
    pub organization_id: String,
    pub title: String,
}

/// Read-only identity and course lookups.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn payer(&self, user_id: &str) -> Result<PayerProfile, CollaboratorError>;

    async fn course(&self, course_id: &str) -> Result<CourseBilling, CollaboratorError>;
}
