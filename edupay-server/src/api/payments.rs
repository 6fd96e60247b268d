//! Payments API handlers.
//!
//! These endpoints are called by the platform backend and require
//! a signed body verified via the `Edupay-Signature` header.
//!
//! # Endpoints
//!
//! - `POST /payments`           - create a payment intent at a provider
//! - `POST /payments/status`    - poll a provider for a payment's state
//! - `POST /payments/reconcile` - poll and settle a payment whose webhook was missed

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use edupay_sdk::objects::{CreatePaymentEssential, PaymentLookup};

use crate::api::ApiError;
use crate::api::extractors::SignedBody;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/status", post(payment_status))
        .route("/payments/reconcile", post(reconcile_payment))
}

/// `POST /payments`: returns 201 with the provider redirect URL.
async fn create_payment(
    State(state): State<AppState>,
    SignedBody(payload): SignedBody<CreatePaymentEssential>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .orchestrator()
        .create_payment_url(&payload.payer, payload.request)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `POST /payments/status`: the canonical event as the provider reports it
/// now. Nothing is settled.
async fn payment_status(
    State(state): State<AppState>,
    SignedBody(lookup): SignedBody<PaymentLookup>,
) -> Result<impl IntoResponse, ApiError> {
    let event = state
        .orchestrator()
        .get_payment_status(lookup.provider, &lookup.payment_id)
        .await?;
    Ok(Json(event))
}

/// `POST /payments/reconcile`: settle the polled state through the
/// idempotent settlement path.
async fn reconcile_payment(
    State(state): State<AppState>,
    SignedBody(lookup): SignedBody<PaymentLookup>,
) -> Result<impl IntoResponse, ApiError> {
    let settlement = state
        .dispatcher
        .reconcile(lookup.provider, &lookup.payment_id)
        .await?;
    Ok(Json(settlement.to_response()))
}
