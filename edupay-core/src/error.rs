//! Errors of the payment layer (strategies, registry, orchestrator).

use edupay_sdk::objects::ProviderId;
use thiserror::Error;

use crate::collaborators::CollaboratorError;

#[derive(Debug, Error)]
pub enum PaymentError {
    /// The request can never succeed as sent (bad amount, unsupported
    /// currency or method for the provider, missing course reference, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no strategy registered for provider {0}")]
    UnsupportedProvider(ProviderId),

    /// The provider API failed or answered with something unusable.
    #[error("{provider} request failed: {message}")]
    Upstream {
        provider: ProviderId,
        message: String,
    },

    #[error("{provider} {operation} timed out")]
    Timeout {
        provider: ProviderId,
        operation: &'static str,
    },

    /// Webhook signature did not verify. Never applied.
    #[error("webhook authenticity check failed for {0}")]
    WebhookAuthenticity(ProviderId),

    /// The webhook or status payload could not be parsed at all.
    #[error("malformed {provider} payload: {message}")]
    MalformedPayload {
        provider: ProviderId,
        message: String,
    },

    /// Payer or course lookup failed while building the intent.
    #[error("lookup failed: {0}")]
    Lookup(#[from] CollaboratorError),
}

impl PaymentError {
    pub fn upstream(provider: ProviderId, message: impl std::fmt::Display) -> Self {
        Self::Upstream {
            provider,
            message: message.to_string(),
        }
    }

    pub fn malformed(provider: ProviderId, message: impl std::fmt::Display) -> Self {
        Self::MalformedPayload {
            provider,
            message: message.to_string(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Upstream { .. } | PaymentError::Timeout { .. } => true,
            PaymentError::Lookup(e) => e.is_retryable(),
            PaymentError::Validation(_)
            | PaymentError::UnsupportedProvider(_)
            | PaymentError::WebhookAuthenticity(_)
            | PaymentError::MalformedPayload { .. } => false,
        }
    }
}
