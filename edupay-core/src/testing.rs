//! In-process fakes of providers and collaborators.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use edupay_sdk::objects::{
    BillingCycle, Currency, PaymentMetadata, PaymentPurpose, PaymentResponse, ProcessedWebhook,
    ProviderId, SettlementStatus,
};
use rust_decimal_macros::dec;
use time::OffsetDateTime;

use crate::collaborators::{
    CatalogLookup, CollaboratorError, CourseBilling, Enrollment, EnrollmentRequest,
    EnrollmentService, LedgerEntry, LedgerReceipt, PayerProfile, WalletLedger, WalletOwner,
};
use crate::error::PaymentError;
use crate::strategies::{PaymentStrategy, ProviderPaymentRequest, WebhookPayload};
use crate::utils::billing_window;

/// A successful Paymob course purchase of EGP 100 by `U1` for `C1`.
pub(crate) fn completed_course_event(transaction_id: &str) -> ProcessedWebhook {
    ProcessedWebhook {
        provider: ProviderId::Paymob,
        success: true,
        transaction_id: transaction_id.to_owned(),
        payment_id: Some("ORD-1".to_owned()),
        amount: dec!(100),
        currency: Currency::Egp,
        status: SettlementStatus::Completed,
        metadata: PaymentMetadata {
            wallet_id: Some("W-U1".to_owned()),
            course_id: Some("C1".to_owned()),
            billing_cycle: Some(BillingCycle::OneTime),
            ..PaymentMetadata::new(PaymentPurpose::CoursePurchase, "U1")
        },
    }
}

pub(crate) struct FakeStrategy {
    provider: ProviderId,
    signature_valid: AtomicBool,
    event: Mutex<Option<ProcessedWebhook>>,
    delay: Mutex<Option<Duration>>,
    last_request: Mutex<Option<ProviderPaymentRequest>>,
    processed: AtomicUsize,
    poll_on_webhook: Mutex<Option<String>>,
    polled: Mutex<Vec<String>>,
}

impl FakeStrategy {
    pub(crate) fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            signature_valid: AtomicBool::new(true),
            event: Mutex::new(None),
            delay: Mutex::new(None),
            last_request: Mutex::new(None),
            processed: AtomicUsize::new(0),
            poll_on_webhook: Mutex::new(None),
            polled: Mutex::new(Vec::new()),
        }
    }

    /// Answer every webhook by polling `payment_id`.
    pub(crate) fn set_poll_on_webhook(&self, payment_id: &str) {
        *self.poll_on_webhook.lock().unwrap() = Some(payment_id.to_owned());
    }

    /// Payment ids passed to `get_payment_status`.
    pub(crate) fn polled(&self) -> Vec<String> {
        self.polled.lock().unwrap().clone()
    }

    pub(crate) fn set_signature_valid(&self, valid: bool) {
        self.signature_valid.store(valid, Ordering::SeqCst);
    }

    /// Event returned by both `process_webhook` and `get_payment_status`.
    pub(crate) fn set_event(&self, event: ProcessedWebhook) {
        *self.event.lock().unwrap() = Some(event);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn last_request(&self) -> Option<ProviderPaymentRequest> {
        self.last_request.lock().unwrap().clone()
    }

    pub(crate) fn processed_count(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn event(&self) -> Result<ProcessedWebhook, PaymentError> {
        self.event
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PaymentError::malformed(self.provider, "no event configured"))
    }
}

#[async_trait]
impl PaymentStrategy for FakeStrategy {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    async fn create_payment_url(
        &self,
        request: &ProviderPaymentRequest,
    ) -> Result<PaymentResponse, PaymentError> {
        self.pause().await;
        *self.last_request.lock().unwrap() = Some(request.clone());
        Ok(PaymentResponse {
            payment_url: format!("https://pay.example/{}", request.reference),
            payment_id: request.reference.to_string(),
            expires_at: None,
            provider: self.provider,
            metadata: request.metadata.to_map(),
        })
    }

    fn process_webhook(&self, _payload: &WebhookPayload) -> Result<ProcessedWebhook, PaymentError> {
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.event()
    }

    async fn verify_webhook(&self, _payload: &WebhookPayload) -> bool {
        self.pause().await;
        self.signature_valid.load(Ordering::SeqCst)
    }

    fn payment_to_poll(&self, _payload: &WebhookPayload) -> Option<String> {
        self.poll_on_webhook.lock().unwrap().clone()
    }

    async fn get_payment_status(&self, payment_id: &str) -> Result<ProcessedWebhook, PaymentError> {
        self.pause().await;
        self.polled.lock().unwrap().push(payment_id.to_owned());
        self.event()
    }
}

/// Payer `{id}` with wallet `W-{id}`; course `{id}` owned by `ORG-{id}`.
/// The id `missing` is unknown to both lookups.
#[derive(Debug, Default)]
pub(crate) struct FakeCatalog;

#[async_trait]
impl CatalogLookup for FakeCatalog {
    async fn payer(&self, user_id: &str) -> Result<PayerProfile, CollaboratorError> {
        if user_id == "missing" {
            return Err(CollaboratorError::NotFound {
                what: "user",
                id: user_id.to_owned(),
            });
        }
        Ok(PayerProfile {
            user_id: user_id.to_owned(),
            first_name: "Test".to_owned(),
            last_name: "Payer".to_owned(),
            email: format!("{user_id}@example.com"),
            phone: Some("+201000000000".to_owned()),
            wallet_id: Some(format!("W-{user_id}")),
        })
    }

    async fn course(&self, course_id: &str) -> Result<CourseBilling, CollaboratorError> {
        if course_id == "missing" {
            return Err(CollaboratorError::NotFound {
                what: "course",
                id: course_id.to_owned(),
            });
        }
        Ok(CourseBilling {
            course_id: course_id.to_owned(),
            organization_id: format!("ORG-{course_id}"),
            title: format!("Course {course_id}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LedgerOp {
    Credit,
    Debit,
}

/// Ledger that deduplicates by `(op, wallet, reference)` like the real one.
#[derive(Debug, Default)]
pub(crate) struct FakeLedger {
    entries: Mutex<Vec<(LedgerOp, LedgerEntry)>>,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeLedger {
    /// Fail the next `n` credit/debit calls as unavailable.
    pub(crate) fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Credit/debit calls received, including duplicates and failures.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn entries(&self, op: LedgerOp) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, e)| e.clone())
            .collect()
    }

    async fn record(&self, op: LedgerOp, entry: LedgerEntry) -> Result<LedgerReceipt, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollaboratorError::Unavailable {
                service: "ledger",
                message: "injected failure".to_owned(),
            });
        }
        let mut entries = self.entries.lock().unwrap();
        let position = entries.iter().position(|(o, e)| {
            *o == op && e.wallet_id == entry.wallet_id && e.reference == entry.reference
        });
        let index = match position {
            Some(index) => index,
            None => {
                entries.push((op, entry));
                entries.len() - 1
            }
        };
        Ok(LedgerReceipt {
            transaction_id: format!("LTX-{index}"),
        })
    }
}

#[async_trait]
impl WalletLedger for FakeLedger {
    async fn wallet_of(&self, owner: &WalletOwner) -> Result<String, CollaboratorError> {
        Ok(match owner {
            WalletOwner::User(id) => format!("W-{id}"),
            WalletOwner::Organization(id) => format!("OW-{id}"),
        })
    }

    async fn credit(&self, entry: LedgerEntry) -> Result<LedgerReceipt, CollaboratorError> {
        self.record(LedgerOp::Credit, entry).await
    }

    async fn debit(&self, entry: LedgerEntry) -> Result<LedgerReceipt, CollaboratorError> {
        self.record(LedgerOp::Debit, entry).await
    }
}

/// Enrollment service that deduplicates by `payment_reference` like the
/// real one.
#[derive(Debug, Default)]
pub(crate) struct FakeEnrollment {
    enrollments: Mutex<Vec<EnrollmentRequest>>,
    failing: AtomicBool,
    lose_next_response: AtomicBool,
    open_ended: AtomicBool,
}

impl FakeEnrollment {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Enroll on the next call but report it as unavailable, as when the
    /// response is lost on the way back.
    pub(crate) fn lose_next_response(&self) {
        self.lose_next_response.store(true, Ordering::SeqCst);
    }

    /// Compute no end date for any billing cycle.
    pub(crate) fn set_open_ended(&self, open_ended: bool) {
        self.open_ended.store(open_ended, Ordering::SeqCst);
    }

    pub(crate) fn enrollments(&self) -> Vec<EnrollmentRequest> {
        self.enrollments.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnrollmentService for FakeEnrollment {
    async fn enroll_user_to_course(
        &self,
        request: EnrollmentRequest,
    ) -> Result<Enrollment, CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable {
                service: "enrollment",
                message: "injected failure".to_owned(),
            });
        }
        let enrollment_id = {
            let mut enrollments = self.enrollments.lock().unwrap();
            let position = enrollments
                .iter()
                .position(|e| e.payment_reference == request.payment_reference);
            let index = match position {
                Some(index) => index,
                None => {
                    enrollments.push(request);
                    enrollments.len() - 1
                }
            };
            format!("E-{}", index + 1)
        };
        if self.lose_next_response.swap(false, Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable {
                service: "enrollment",
                message: "response lost".to_owned(),
            });
        }
        Ok(Enrollment { enrollment_id })
    }

    fn calculate_end_date(&self, cycle: BillingCycle, from: OffsetDateTime) -> Option<OffsetDateTime> {
        if self.open_ended.load(Ordering::SeqCst) {
            return None;
        }
        billing_window::end_date(cycle, from)
    }
}

/// Extras used by tests that build metadata maps by hand.
pub(crate) fn metadata_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}
