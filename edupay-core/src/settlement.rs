//! Applies canonical settlement events to the wallet ledger and enrollment
//! exactly once per `(provider, transaction_id)`.
//!
//! A key moves from unseen to `APPLIED` or `REJECTED` once. Deliveries claim
//! the key before any side effect; the terminal record is written only after
//! every downstream call succeeded, so a failed delivery leaves the key
//! unsettled and the provider's redelivery runs the whole sequence again.
//! Ledger and enrollment calls carry the transaction id as reference and
//! are idempotent downstream.
//!
//! One run of side effects is bounded below the claim lease, so a claim
//! never goes stale while its holder is still applying it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use edupay_sdk::objects::{
    AccessType, BillingCycle, PaymentPurpose, ProcessedWebhook, ProviderId, SettlementResponse,
    SettlementStatus, SettlementSummary,
};
use rust_decimal::Decimal;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::collaborators::{
    CatalogLookup, CollaboratorError, EnrollmentRequest, EnrollmentService, LedgerEntry,
    WalletLedger, WalletOwner,
};
use crate::config::{SettlementConfig, TimeoutsConfig};
use crate::error::PaymentError;
use crate::orchestrator::PaymentOrchestrator;
use crate::store::{
    Claim, ClaimToken, IdempotencyStore, RecordStatus, SettlementKey, SettlementRecord, StoreError,
};
use crate::strategies::WebhookPayload;

/// Most collaborator calls one settlement makes: a course purchase looks up
/// the course and two wallets, credits, debits and enrolls.
pub const MAX_DOWNSTREAM_CALLS: u32 = 6;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("unsupported payment purpose: {0}")]
    UnsupportedPurpose(String),

    /// The event cannot be applied as received. Needs manual reconciliation.
    #[error("malformed settlement {transaction_id}: missing or invalid {field}")]
    Malformed {
        transaction_id: String,
        field: &'static str,
    },

    #[error("downstream call failed: {0}")]
    Downstream(#[from] CollaboratorError),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("idempotency store failed: {0}")]
    Store(#[from] StoreError),

    /// Another delivery of the same transaction holds the claim.
    #[error("settlement {0} is already being handled")]
    InFlight(SettlementKey),
}

impl SettlementError {
    /// Whether the provider should redeliver.
    pub fn is_retryable(&self) -> bool {
        match self {
            SettlementError::Payment(e) => e.is_retryable(),
            SettlementError::Downstream(e) => e.is_retryable(),
            SettlementError::Timeout { .. }
            | SettlementError::Store(_)
            | SettlementError::InFlight(_) => true,
            SettlementError::UnsupportedPurpose(_) | SettlementError::Malformed { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Applied(SettlementSummary),
    Rejected,
    /// Provider reported the payment as still in progress. Nothing recorded.
    Pending,
    /// The key was settled by an earlier delivery.
    Duplicate(SettlementRecord),
}

/// A settlement event together with what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub event: ProcessedWebhook,
    pub outcome: SettlementOutcome,
}

impl Settlement {
    pub fn to_response(&self) -> SettlementResponse {
        let transaction_id = self.event.transaction_id.clone();
        match &self.outcome {
            SettlementOutcome::Applied(summary) => SettlementResponse::Applied {
                transaction_id,
                summary: summary.clone(),
            },
            SettlementOutcome::Rejected => SettlementResponse::Rejected { transaction_id },
            SettlementOutcome::Pending => SettlementResponse::Pending { transaction_id },
            SettlementOutcome::Duplicate(record) => SettlementResponse::Duplicate {
                transaction_id,
                status: record.status.as_str().to_owned(),
            },
        }
    }
}

/// Services the dispatcher calls while applying a settlement.
#[derive(Clone)]
pub struct Downstream {
    pub ledger: Arc<dyn WalletLedger>,
    pub enrollment: Arc<dyn EnrollmentService>,
    pub catalog: Arc<dyn CatalogLookup>,
}

pub struct SettlementDispatcher {
    orchestrator: Arc<PaymentOrchestrator>,
    store: Arc<dyn IdempotencyStore>,
    downstream: Downstream,
    downstream_timeout: Duration,
    claim_lease: Duration,
    apply_budget: Duration,
}

impl SettlementDispatcher {
    pub fn new(
        orchestrator: Arc<PaymentOrchestrator>,
        store: Arc<dyn IdempotencyStore>,
        downstream: Downstream,
        timeouts: &TimeoutsConfig,
        settlement: &SettlementConfig,
    ) -> Self {
        Self {
            orchestrator,
            store,
            downstream,
            downstream_timeout: timeouts.downstream,
            claim_lease: settlement.claim_lease,
            apply_budget: apply_budget(settlement.claim_lease),
        }
    }

    pub fn orchestrator(&self) -> &Arc<PaymentOrchestrator> {
        &self.orchestrator
    }

    /// Verify, normalize and settle an inbound provider callback.
    pub async fn handle_webhook(&self, payload: &WebhookPayload) -> Result<Settlement, SettlementError> {
        let event = self.orchestrator.process_webhook(payload).await?;
        self.settle(event).await
    }

    /// Poll the provider for a payment and settle whatever it reports.
    ///
    /// Recovers payments whose webhook never arrived. Goes through the same
    /// idempotent path, so reconciling an already settled payment is a no-op.
    pub async fn reconcile(
        &self,
        provider: ProviderId,
        payment_id: &str,
    ) -> Result<Settlement, SettlementError> {
        let event = self
            .orchestrator
            .get_payment_status(provider, payment_id)
            .await?;
        info!(
            provider = %provider,
            payment_id = %payment_id,
            transaction_id = %event.transaction_id,
            status = %event.status,
            "Reconciling payment"
        );
        self.settle(event).await
    }

    pub async fn settle(&self, event: ProcessedWebhook) -> Result<Settlement, SettlementError> {
        if event.transaction_id.trim().is_empty() {
            return Err(self.malformed(&event, "transactionId"));
        }
        let key = SettlementKey::new(event.provider, &event.transaction_id);

        if let Some(record) = self.store.get(&key).await? {
            return Ok(duplicate(event, record));
        }
        if event.status == SettlementStatus::Pending {
            info!(
                provider = %event.provider,
                transaction_id = %event.transaction_id,
                "Payment still pending, nothing to settle"
            );
            return Ok(Settlement {
                event,
                outcome: SettlementOutcome::Pending,
            });
        }

        let token = match self.store.claim(&key, self.claim_lease).await? {
            Claim::Acquired(token) => token,
            Claim::InFlight => return Err(SettlementError::InFlight(key)),
            Claim::Settled(record) => return Ok(duplicate(event, record)),
        };

        if !event.success {
            self.store
                .complete(&key, token, RecordStatus::Rejected, None)
                .await?;
            info!(
                provider = %event.provider,
                transaction_id = %event.transaction_id,
                purpose = ?event.metadata.purpose,
                "Recorded failed payment"
            );
            return Ok(Settlement {
                event,
                outcome: SettlementOutcome::Rejected,
            });
        }

        let applied = match tokio::time::timeout(self.apply_budget, self.apply(&event)).await {
            Ok(result) => result,
            Err(_) => Err(SettlementError::Timeout {
                operation: "settlement",
            }),
        };
        let summary = match applied {
            Ok(summary) => summary,
            Err(e) => {
                self.release(&key, token).await;
                return Err(e);
            }
        };
        self.store
            .complete(&key, token, RecordStatus::Applied, Some(summary.clone()))
            .await?;
        info!(
            provider = %event.provider,
            transaction_id = %event.transaction_id,
            purpose = ?summary.purpose,
            amount = %summary.amount,
            currency = summary.currency.code(),
            "Applied settlement"
        );
        Ok(Settlement {
            event,
            outcome: SettlementOutcome::Applied(summary),
        })
    }

    async fn release(&self, key: &SettlementKey, token: ClaimToken) {
        match self.store.release(key, token).await {
            Ok(true) => {}
            Ok(false) => warn!(key = %key, token = %token, "Settlement claim was already taken over"),
            Err(e) => warn!(key = %key, error = %e, "Failed to release settlement claim"),
        }
    }

    async fn apply(&self, event: &ProcessedWebhook) -> Result<SettlementSummary, SettlementError> {
        if event.amount <= Decimal::ZERO {
            return Err(self.malformed(event, "amount"));
        }
        let purpose = event
            .metadata
            .purpose
            .ok_or_else(|| self.malformed(event, "purpose"))?;
        match purpose {
            PaymentPurpose::CoursePurchase => self.apply_course_purchase(event).await,
            PaymentPurpose::WalletCredit => self.apply_wallet_credit(event).await,
            PaymentPurpose::Subscription => {
                error!(
                    provider = %event.provider,
                    transaction_id = %event.transaction_id,
                    purpose = purpose.as_str(),
                    "No settlement path for payment purpose"
                );
                Err(SettlementError::UnsupportedPurpose(purpose.as_str().to_owned()))
            }
        }
    }

    async fn apply_course_purchase(
        &self,
        event: &ProcessedWebhook,
    ) -> Result<SettlementSummary, SettlementError> {
        let metadata = &event.metadata;
        let user_id = required(metadata.user_id.as_deref()).ok_or_else(|| self.malformed(event, "userId"))?;
        let course_id =
            required(metadata.course_id.as_deref()).ok_or_else(|| self.malformed(event, "courseId"))?;
        let billing_cycle = metadata
            .billing_cycle
            .ok_or_else(|| self.malformed(event, "billingCycle"))?;
        let access_type = AccessType::for_cycle(billing_cycle);
        let starts_at = OffsetDateTime::now_utc();
        let ends_at = self
            .downstream
            .enrollment
            .calculate_end_date(billing_cycle, starts_at);
        if billing_cycle != BillingCycle::OneTime && ends_at.is_none() {
            return Err(self.malformed(event, "billingCycle"));
        }

        let course = self
            .downstream("course lookup", self.downstream.catalog.course(course_id))
            .await?;
        let organization_wallet = self
            .downstream(
                "organization wallet lookup",
                self.downstream
                    .ledger
                    .wallet_of(&WalletOwner::Organization(course.organization_id.clone())),
            )
            .await?;
        let credit = self
            .downstream(
                "ledger credit",
                self.downstream.ledger.credit(LedgerEntry {
                    wallet_id: organization_wallet.clone(),
                    amount: event.amount,
                    currency: event.currency,
                    reference: event.transaction_id.clone(),
                    description: format!("Course sale: {}", course.title),
                }),
            )
            .await?;
        let user_wallet = self.user_wallet(user_id, metadata.wallet_id.as_deref()).await?;
        let debit = self
            .downstream(
                "ledger debit",
                self.downstream.ledger.debit(LedgerEntry {
                    wallet_id: user_wallet,
                    amount: event.amount,
                    currency: event.currency,
                    reference: event.transaction_id.clone(),
                    description: format!("Course purchase: {}", course.title),
                }),
            )
            .await?;
        let enrollment = self
            .downstream(
                "enrollment",
                self.downstream
                    .enrollment
                    .enroll_user_to_course(EnrollmentRequest {
                        user_id: user_id.to_owned(),
                        course_id: course_id.to_owned(),
                        access_type,
                        billing_cycle,
                        starts_at,
                        ends_at,
                        payment_reference: event.transaction_id.clone(),
                    }),
            )
            .await?;

        Ok(SettlementSummary {
            purpose: PaymentPurpose::CoursePurchase,
            amount: event.amount,
            currency: event.currency,
            user_id: user_id.to_owned(),
            credited_wallet_id: organization_wallet,
            ledger_transaction_ids: vec![credit.transaction_id, debit.transaction_id],
            course_id: Some(course_id.to_owned()),
            access_type: Some(access_type),
            enrollment_id: Some(enrollment.enrollment_id),
            access_ends_at: ends_at.map(OffsetDateTime::unix_timestamp),
        })
    }

    async fn apply_wallet_credit(
        &self,
        event: &ProcessedWebhook,
    ) -> Result<SettlementSummary, SettlementError> {
        let metadata = &event.metadata;
        let user_id = required(metadata.user_id.as_deref()).ok_or_else(|| self.malformed(event, "userId"))?;
        let wallet_id = self.user_wallet(user_id, metadata.wallet_id.as_deref()).await?;
        let credit = self
            .downstream(
                "ledger credit",
                self.downstream.ledger.credit(LedgerEntry {
                    wallet_id: wallet_id.clone(),
                    amount: event.amount,
                    currency: event.currency,
                    reference: event.transaction_id.clone(),
                    description: format!("Wallet top-up via {}", event.provider),
                }),
            )
            .await?;

        Ok(SettlementSummary {
            purpose: PaymentPurpose::WalletCredit,
            amount: event.amount,
            currency: event.currency,
            user_id: user_id.to_owned(),
            credited_wallet_id: wallet_id,
            ledger_transaction_ids: vec![credit.transaction_id],
            course_id: None,
            access_type: None,
            enrollment_id: None,
            access_ends_at: None,
        })
    }

    /// The wallet named in the metadata, or the user's wallet at the ledger.
    async fn user_wallet(
        &self,
        user_id: &str,
        wallet_id: Option<&str>,
    ) -> Result<String, SettlementError> {
        match required(wallet_id) {
            Some(wallet_id) => Ok(wallet_id.to_owned()),
            None => {
                self.downstream(
                    "user wallet lookup",
                    self.downstream
                        .ledger
                        .wallet_of(&WalletOwner::User(user_id.to_owned())),
                )
                .await
            }
        }
    }

    async fn downstream<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, SettlementError> {
        match tokio::time::timeout(self.downstream_timeout, future).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SettlementError::Timeout { operation }),
        }
    }

    fn malformed(&self, event: &ProcessedWebhook, field: &'static str) -> SettlementError {
        error!(
            provider = %event.provider,
            transaction_id = %event.transaction_id,
            payment_id = ?event.payment_id,
            purpose = ?event.metadata.purpose,
            amount = %event.amount,
            field,
            "Settlement cannot be applied, needs manual reconciliation"
        );
        SettlementError::Malformed {
            transaction_id: event.transaction_id.clone(),
            field,
        }
    }
}

/// Four fifths of the lease, leaving room for the claim and completion
/// round trips.
fn apply_budget(claim_lease: Duration) -> Duration {
    claim_lease - claim_lease / 5
}

fn required(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn duplicate(event: ProcessedWebhook, record: SettlementRecord) -> Settlement {
    info!(
        provider = %event.provider,
        transaction_id = %event.transaction_id,
        status = record.status.as_str(),
        "Settlement already recorded, skipping"
    );
    Settlement {
        event,
        outcome: SettlementOutcome::Duplicate(record),
    }
}
