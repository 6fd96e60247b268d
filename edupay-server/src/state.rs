//! Application state shared across all request handlers.

use edupay_core::config::GatewayConfig;
use edupay_core::orchestrator::PaymentOrchestrator;
use edupay_core::settlement::SettlementDispatcher;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Settles webhooks and reconciliations.
    pub dispatcher: Arc<SettlementDispatcher>,
    /// Secret of the platform backend, for signed requests.
    pub gateway: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(dispatcher: Arc<SettlementDispatcher>, gateway: GatewayConfig) -> Self {
        Self {
            dispatcher,
            gateway: Arc::new(gateway),
        }
    }

    pub fn orchestrator(&self) -> &PaymentOrchestrator {
        self.dispatcher.orchestrator()
    }
}
