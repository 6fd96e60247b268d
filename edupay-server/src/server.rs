//! Axum server setup and router configuration.

use crate::api;
use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use edupay_sdk::objects::ProviderId;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/providers", get(list_providers))
        .merge(api::router())
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct ProvidersResponse {
    providers: Vec<ProviderId>,
    missing: Vec<ProviderId>,
}

/// Registered payment providers.
async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.orchestrator().registry();
    Json(ProvidersResponse {
        providers: registry.providers(),
        missing: registry.missing_providers(),
    })
}

/// Run the server with graceful shutdown support.
pub async fn run_server(router: Router, addr: SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::HttpCollaborators;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use edupay_core::config::{
        CollaboratorsConfig, GatewayConfig, KashierConfig, KashierMode, SettlementConfig,
        TimeoutsConfig,
    };
    use edupay_core::orchestrator::PaymentOrchestrator;
    use edupay_core::registry::StrategyRegistry;
    use edupay_core::settlement::{Downstream, SettlementDispatcher};
    use edupay_core::store::MemorySettlementStore;
    use edupay_core::strategies::kashier::{KashierStrategy, SIGNATURE_HEADER as KASHIER_HEADER};
    use edupay_sdk::objects::{PaymentLookup, SettlementResponse};
    use edupay_sdk::signature::{
        HmacAlgorithm, SIGNATURE_HEADER, SignedObject, hmac_hex,
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GATEWAY_SECRET: &[u8] = b"backend-secret";
    const KASHIER_KEY: &str = "kashier-api-key";

    fn kashier_config() -> KashierConfig {
        KashierConfig {
            checkout_url: "https://checkout.kashier.example/".parse().unwrap(),
            api_url: "http://127.0.0.1:9/".parse().unwrap(),
            merchant_id: "MID-1".to_owned(),
            api_key: KASHIER_KEY.to_owned(),
            secret_key: "secret-key".to_owned(),
            mode: KashierMode::Test,
            redirect_url: "https://learn.example/return".parse().unwrap(),
            webhook_url: "https://pay.learn.example/webhooks/kashier".parse().unwrap(),
        }
    }

    /// Router with only Kashier registered and collaborators at `server`.
    fn app(server: &MockServer) -> Router {
        let base: url::Url = format!("{}/", server.uri()).parse().unwrap();
        let collaborators = HttpCollaborators::new(
            &CollaboratorsConfig {
                ledger_url: base.join("ledger/").unwrap(),
                enrollment_url: base.join("enrollment/").unwrap(),
                catalog_url: base.join("catalog/").unwrap(),
                service_token: None,
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let catalog = Arc::new(collaborators.catalog);

        let mut registry = StrategyRegistry::new();
        registry.register_strategy(Arc::new(KashierStrategy::new(
            kashier_config(),
            Duration::from_secs(5),
        )));
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            registry,
            catalog.clone(),
            Duration::from_secs(5),
        ));
        let dispatcher = SettlementDispatcher::new(
            orchestrator,
            Arc::new(MemorySettlementStore::new()),
            Downstream {
                ledger: Arc::new(collaborators.ledger),
                enrollment: Arc::new(collaborators.enrollment),
                catalog,
            },
            &TimeoutsConfig::default(),
            &SettlementConfig::default(),
        );
        build_router(AppState::new(
            Arc::new(dispatcher),
            GatewayConfig::new(GATEWAY_SECRET.to_vec()),
        ))
    }

    async fn mount_wallet_credit(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/ledger/users/U1/wallet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "walletId": "W-U1" })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ledger/wallets/W-U1/credit"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "transactionId": "LTX-1" })),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    fn kashier_webhook(signature: &str) -> Request<Body> {
        let body = json!({
            "event": "pay",
            "data": {
                "merchantOrderId": "O-1",
                "transactionId": "TX-1",
                "status": "SUCCESS",
                "amount": "50.00",
                "currency": "EGP",
                "metaData": { "v": "1", "purpose": "WALLET_CREDIT", "userId": "U1" },
                "signatureKeys": ["amount", "currency", "merchantOrderId", "status", "transactionId"]
            }
        });
        Request::post("/webhooks/kashier")
            .header("content-type", "application/json")
            .header(KASHIER_HEADER, signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn valid_signature() -> String {
        let message = "amount=50.00&currency=EGP&merchantOrderId=O-1&status=SUCCESS&transactionId=TX-1";
        hmac_hex(HmacAlgorithm::Sha256, KASHIER_KEY.as_bytes(), message.as_bytes())
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_providers() {
        let server = MockServer::start().await;
        let app = app(&server);

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");

        let response = app
            .oneshot(Request::get("/providers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["providers"], json!(["kashier"]));
        assert_eq!(body["missing"], json!(["paymob", "paypal"]));
    }

    #[tokio::test]
    async fn test_webhook_settles_once() {
        let server = MockServer::start().await;
        mount_wallet_credit(&server).await;
        let app = app(&server);

        let response = app
            .clone()
            .oneshot(kashier_webhook(&valid_signature()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: SettlementResponse = serde_json::from_value(body_json(response).await).unwrap();
        match body {
            SettlementResponse::Applied {
                transaction_id,
                summary,
            } => {
                assert_eq!(transaction_id, "TX-1");
                assert_eq!(summary.credited_wallet_id, "W-U1");
                assert_eq!(summary.ledger_transaction_ids, vec!["LTX-1".to_owned()]);
            }
            other => panic!("expected applied, got {other:?}"),
        }

        let response = app.oneshot(kashier_webhook(&valid_signature())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["outcome"], "duplicate");
        assert_eq!(body["status"], "APPLIED");
        // the credit mock expects exactly one call
    }

    #[tokio::test]
    async fn test_webhook_with_bad_signature_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let app = app(&server);

        let forged = hmac_hex(HmacAlgorithm::Sha256, b"wrong-key", b"anything");
        let response = app.oneshot(kashier_webhook(&forged)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_webhook_retryable_failure_is_503() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ledger/users/U1/wallet"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let app = app(&server);

        let response = app.oneshot(kashier_webhook(&valid_signature())).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_and_unregistered_providers() {
        let server = MockServer::start().await;
        let app = app(&server);

        let response = app
            .clone()
            .oneshot(Request::post("/webhooks/stripe").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(Request::post("/webhooks/paypal").body(Body::from("{}")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_signed_payment_routes() {
        let server = MockServer::start().await;
        let app = app(&server);
        let lookup = PaymentLookup {
            provider: ProviderId::Paymob,
            payment_id: "ORD-1".to_owned(),
        };

        let unsigned = Request::post("/payments/status")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&lookup).unwrap()))
            .unwrap();
        let response = app.clone().oneshot(unsigned).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let wrong_key = SignedObject::new(lookup.clone(), b"not-the-secret").unwrap();
        let request = Request::post("/payments/status")
            .header(SIGNATURE_HEADER, wrong_key.to_header())
            .body(Body::from(wrong_key.json.clone()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // correctly signed, but paymob is not registered in this router
        let signed = SignedObject::new(lookup, GATEWAY_SECRET).unwrap();
        let request = Request::post("/payments/status")
            .header(SIGNATURE_HEADER, signed.to_header())
            .body(Body::from(signed.json.clone()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
