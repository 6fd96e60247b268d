//! Provider-neutral entry point for creating payments and reading
//! provider callbacks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use edupay_sdk::objects::{
    BillingCycle, CreatePaymentRequest, PayerIdentity, PaymentMetadata, PaymentPurpose,
    PaymentResponse, ProcessedWebhook, ProviderId,
};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborators::CatalogLookup;
use crate::error::PaymentError;
use crate::registry::StrategyRegistry;
use crate::strategies::{BillingDetails, ProviderPaymentRequest, WebhookPayload};

pub struct PaymentOrchestrator {
    registry: StrategyRegistry,
    catalog: Arc<dyn CatalogLookup>,
    provider_timeout: Duration,
}

impl PaymentOrchestrator {
    pub fn new(
        registry: StrategyRegistry,
        catalog: Arc<dyn CatalogLookup>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            catalog,
            provider_timeout,
        }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Registered providers, for diagnostics.
    pub fn available_providers(&self) -> Vec<ProviderId> {
        self.registry.providers()
    }

    /// Validate the request, attach the purchase metadata and create the
    /// intent at the requested provider.
    pub async fn create_payment_url(
        &self,
        payer: &PayerIdentity,
        request: CreatePaymentRequest,
    ) -> Result<PaymentResponse, PaymentError> {
        let billing_cycle = validate_request(&request)?;
        let strategy = self.registry.resolve(request.provider)?;

        let profile = self
            .with_timeout(request.provider, "payer lookup", self.catalog.payer(&payer.user_id))
            .await?
            .map_err(PaymentError::Lookup)?;
        let description = match &request.course_id {
            Some(course_id) => {
                let course = self
                    .with_timeout(request.provider, "course lookup", self.catalog.course(course_id))
                    .await?
                    .map_err(PaymentError::Lookup)?;
                format!("Course: {}", course.title)
            }
            None => match request.purpose {
                PaymentPurpose::WalletCredit => "Wallet top-up".to_owned(),
                PaymentPurpose::Subscription => "Subscription".to_owned(),
                PaymentPurpose::CoursePurchase => "Course purchase".to_owned(),
            },
        };

        let metadata = PaymentMetadata {
            wallet_id: payer.wallet_id.clone().or(profile.wallet_id.clone()),
            course_id: request.course_id.clone(),
            billing_cycle,
            extra: request.metadata.clone(),
            ..PaymentMetadata::new(request.purpose, payer.user_id.clone())
        };
        let provider_request = ProviderPaymentRequest {
            reference: Uuid::now_v7(),
            amount: request.amount,
            currency: request.currency,
            method: request.method,
            description,
            billing: BillingDetails {
                first_name: profile.first_name,
                last_name: profile.last_name,
                email: profile.email,
                phone: profile.phone,
            },
            metadata,
        };

        let response = self
            .with_timeout(
                request.provider,
                "create payment",
                strategy.create_payment_url(&provider_request),
            )
            .await??;
        info!(
            provider = %request.provider,
            payment_id = %response.payment_id,
            reference = %provider_request.reference,
            purpose = ?request.purpose,
            "Created payment intent"
        );
        Ok(response)
    }

    /// Authenticate and normalize a provider callback.
    ///
    /// A payload that fails verification is logged and never normalized.
    /// A verified payload the strategy wants polled is answered with the
    /// provider's current state of that payment.
    pub async fn process_webhook(
        &self,
        payload: &WebhookPayload,
    ) -> Result<ProcessedWebhook, PaymentError> {
        let strategy = self.registry.resolve(payload.provider)?;
        let verified = self
            .with_timeout(payload.provider, "verify webhook", strategy.verify_webhook(payload))
            .await?;
        if !verified {
            warn!(
                provider = %payload.provider,
                event_type = ?payload.event_type,
                "Dropping webhook that failed signature verification"
            );
            return Err(PaymentError::WebhookAuthenticity(payload.provider));
        }
        if let Some(payment_id) = strategy.payment_to_poll(payload) {
            info!(
                provider = %payload.provider,
                payment_id = %payment_id,
                event_type = ?payload.event_type,
                "Webhook announces a payment awaiting action, polling provider"
            );
            return self
                .with_timeout(
                    payload.provider,
                    "payment status",
                    strategy.get_payment_status(&payment_id),
                )
                .await?;
        }
        strategy.process_webhook(payload)
    }

    /// Poll the provider for a payment's state.
    pub async fn get_payment_status(
        &self,
        provider: ProviderId,
        payment_id: &str,
    ) -> Result<ProcessedWebhook, PaymentError> {
        let strategy = self.registry.resolve(provider)?;
        self.with_timeout(provider, "payment status", strategy.get_payment_status(payment_id))
            .await?
    }

    async fn with_timeout<T>(
        &self,
        provider: ProviderId,
        operation: &'static str,
        future: impl Future<Output = T>,
    ) -> Result<T, PaymentError> {
        tokio::time::timeout(self.provider_timeout, future)
            .await
            .map_err(|_| PaymentError::Timeout {
                provider,
                operation,
            })
    }
}

/// Check the request invariants and settle the billing cycle.
///
/// Course purchases without a cycle are one-time purchases.
fn validate_request(request: &CreatePaymentRequest) -> Result<Option<BillingCycle>, PaymentError> {
    if request.amount <= Decimal::ZERO {
        return Err(PaymentError::Validation("amount must be positive".to_owned()));
    }
    if request.amount.normalize().scale() > 2 {
        return Err(PaymentError::Validation(
            "amount must have at most two fractional digits".to_owned(),
        ));
    }
    match request.purpose {
        PaymentPurpose::CoursePurchase => {
            if request.course_id.as_deref().is_none_or(str::is_empty) {
                return Err(PaymentError::Validation(
                    "COURSE_PURCHASE requires a courseId".to_owned(),
                ));
            }
            Ok(Some(request.billing_cycle.unwrap_or(BillingCycle::OneTime)))
        }
        PaymentPurpose::Subscription => match request.billing_cycle {
            Some(cycle) => Ok(Some(cycle)),
            None => Err(PaymentError::Validation(
                "SUBSCRIPTION requires a billingCycle".to_owned(),
            )),
        },
        PaymentPurpose::WalletCredit => Ok(request.billing_cycle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCatalog, FakeStrategy};
    use edupay_sdk::objects::{Currency, PaymentMethod};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn orchestrator(strategy: Arc<FakeStrategy>) -> PaymentOrchestrator {
        let mut registry = StrategyRegistry::new();
        registry.register_strategy(strategy);
        PaymentOrchestrator::new(registry, Arc::new(FakeCatalog::default()), Duration::from_secs(5))
    }

    fn payer() -> PayerIdentity {
        PayerIdentity {
            user_id: "U1".to_owned(),
            wallet_id: None,
        }
    }

    fn course_request() -> CreatePaymentRequest {
        CreatePaymentRequest {
            amount: dec!(100),
            currency: Currency::Egp,
            provider: ProviderId::Paymob,
            method: PaymentMethod::Card,
            purpose: PaymentPurpose::CoursePurchase,
            course_id: Some("C1".to_owned()),
            billing_cycle: None,
            metadata: BTreeMap::from([("coupon".to_owned(), "SPRING".to_owned())]),
        }
    }

    #[tokio::test]
    async fn test_metadata_is_merged_into_intent() {
        let strategy = Arc::new(FakeStrategy::new(ProviderId::Paymob));
        let orchestrator = orchestrator(strategy.clone());

        let response = orchestrator
            .create_payment_url(&payer(), course_request())
            .await
            .unwrap();
        assert_eq!(response.provider, ProviderId::Paymob);
        let metadata = &response.metadata;
        assert_eq!(metadata.get("userId").map(String::as_str), Some("U1"));
        assert_eq!(metadata.get("courseId").map(String::as_str), Some("C1"));
        assert_eq!(metadata.get("billingCycle").map(String::as_str), Some("ONE_TIME"));
        assert_eq!(metadata.get("purpose").map(String::as_str), Some("COURSE_PURCHASE"));
        // wallet id comes from the payer profile when the session has none
        assert_eq!(metadata.get("walletId").map(String::as_str), Some("W-U1"));
        assert_eq!(metadata.get("coupon").map(String::as_str), Some("SPRING"));

        let sent = strategy.last_request().unwrap();
        assert_eq!(sent.description, "Course: Course C1");
        assert_eq!(sent.billing.email, "U1@example.com");
    }

    #[tokio::test]
    async fn test_request_validation() {
        let orchestrator = orchestrator(Arc::new(FakeStrategy::new(ProviderId::Paymob)));

        let mut missing_course = course_request();
        missing_course.course_id = None;
        let mut missing_cycle = course_request();
        missing_cycle.purpose = PaymentPurpose::Subscription;
        let mut zero = course_request();
        zero.amount = dec!(0);
        let mut fractional = course_request();
        fractional.amount = dec!(10.001);

        for request in [missing_course, missing_cycle, zero, fractional] {
            assert!(matches!(
                orchestrator.create_payment_url(&payer(), request).await,
                Err(PaymentError::Validation(_))
            ));
        }

        let mut trailing_zeros = course_request();
        trailing_zeros.amount = dec!(10.500);
        assert!(orchestrator.create_payment_url(&payer(), trailing_zeros).await.is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_provider() {
        let orchestrator = orchestrator(Arc::new(FakeStrategy::new(ProviderId::Paymob)));
        let mut request = course_request();
        request.provider = ProviderId::Kashier;
        assert!(matches!(
            orchestrator.create_payment_url(&payer(), request).await,
            Err(PaymentError::UnsupportedProvider(ProviderId::Kashier))
        ));
    }

    #[tokio::test]
    async fn test_unknown_course_fails_lookup() {
        let orchestrator = orchestrator(Arc::new(FakeStrategy::new(ProviderId::Paymob)));
        let mut request = course_request();
        request.course_id = Some("missing".to_owned());
        assert!(matches!(
            orchestrator.create_payment_url(&payer(), request).await,
            Err(PaymentError::Lookup(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_signature_fails_closed() {
        let strategy = Arc::new(FakeStrategy::new(ProviderId::Paymob));
        strategy.set_signature_valid(false);
        let orchestrator = orchestrator(strategy.clone());

        let payload = WebhookPayload::new(ProviderId::Paymob, "{}");
        assert!(matches!(
            orchestrator.process_webhook(&payload).await,
            Err(PaymentError::WebhookAuthenticity(ProviderId::Paymob))
        ));
        assert_eq!(strategy.processed_count(), 0);
    }

    #[tokio::test]
    async fn test_verified_webhook_is_returned_unmodified() {
        let strategy = Arc::new(FakeStrategy::new(ProviderId::Paymob));
        let event = crate::testing::completed_course_event("T1");
        strategy.set_event(event.clone());
        let orchestrator = orchestrator(strategy);

        let payload = WebhookPayload::new(ProviderId::Paymob, "{}");
        assert_eq!(orchestrator.process_webhook(&payload).await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let strategy = Arc::new(FakeStrategy::new(ProviderId::Paymob));
        strategy.set_delay(Duration::from_millis(200));
        let mut registry = StrategyRegistry::new();
        registry.register_strategy(strategy);
        let orchestrator = PaymentOrchestrator::new(
            registry,
            Arc::new(FakeCatalog::default()),
            Duration::from_millis(20),
        );

        let err = orchestrator
            .create_payment_url(&payer(), course_request())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_available_providers() {
        let orchestrator = orchestrator(Arc::new(FakeStrategy::new(ProviderId::Kashier)));
        assert_eq!(orchestrator.available_providers(), vec![ProviderId::Kashier]);
    }
}
