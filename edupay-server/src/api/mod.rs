//! HTTP API.
//!
//! - Payments API (`/payments/*`): called by the platform backend, signed
//!   with `Edupay-Signature`.
//! - Webhooks (`/webhooks/{provider}`): called by the providers, verified by
//!   the provider strategy.

use axum::{
    Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use edupay_core::collaborators::CollaboratorError;
use edupay_core::error::PaymentError;
use edupay_core::settlement::SettlementError;

use crate::state::AppState;

pub mod extractors;
mod payments;
mod webhooks;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(payments::router())
        .merge(webhooks::router())
}

/// Errors of the payment and webhook handlers.
///
/// Retryable failures map to 503 so providers redeliver; failures that can
/// never succeed map to 4xx.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

fn payment_status(error: &PaymentError) -> StatusCode {
    match error {
        PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
        PaymentError::UnsupportedProvider(_) => StatusCode::NOT_FOUND,
        PaymentError::WebhookAuthenticity(_) => StatusCode::UNAUTHORIZED,
        PaymentError::Lookup(CollaboratorError::NotFound { .. }) => StatusCode::NOT_FOUND,
        e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            ApiError::Payment(e) => payment_status(e),
            ApiError::Settlement(SettlementError::Payment(e)) => payment_status(e),
            ApiError::Settlement(SettlementError::InFlight(_)) => StatusCode::CONFLICT,
            ApiError::Settlement(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Settlement(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request refused");
        }
        (status, self.to_string()).into_response()
    }
}
