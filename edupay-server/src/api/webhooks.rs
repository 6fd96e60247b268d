//! Provider webhook endpoint.
//!
//! `POST /webhooks/{provider}` forwards the raw body, headers and query
//! string to the provider strategy for verification and settles the event.
//! Any non-2xx answer makes the provider redeliver.

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use edupay_core::strategies::WebhookPayload;
use edupay_sdk::objects::ProviderId;

use crate::api::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/{provider}", post(receive_webhook))
}

async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let provider: ProviderId = provider
        .parse()
        .map_err(|_| ApiError::UnknownProvider(provider.clone()))?;

    let payload = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .fold(
            WebhookPayload::new(provider, body).with_query(query),
            |payload, (name, value)| payload.with_header(name, value),
        );

    let settlement = state.dispatcher.handle_webhook(&payload).await.inspect_err(|e| {
        tracing::warn!(
            provider = %provider,
            event_type = ?payload.event_type,
            retryable = e.is_retryable(),
            error = %e,
            "Webhook not settled"
        );
    })?;
    tracing::info!(
        provider = %provider,
        transaction_id = %settlement.event.transaction_id,
        status = %settlement.event.status,
        purpose = ?settlement.event.metadata.purpose,
        "Webhook handled"
    );
    Ok(Json(settlement.to_response()))
}
