use std::collections::HashMap;
use std::sync::Arc;

use edupay_sdk::objects::ProviderId;
use tracing::info;

use crate::error::PaymentError;
use crate::strategies::PaymentStrategy;

/// Lookup table from provider id to its strategy.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<ProviderId, Arc<dyn PaymentStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy under its own provider id. A later registration
    /// for the same provider replaces the earlier one, which is returned.
    pub fn register_strategy(
        &mut self,
        strategy: Arc<dyn PaymentStrategy>,
    ) -> Option<Arc<dyn PaymentStrategy>> {
        let provider = strategy.provider();
        let previous = self.strategies.insert(provider, strategy);
        if previous.is_some() {
            info!(provider = %provider, "Replaced payment strategy");
        }
        previous
    }

    pub fn resolve(&self, provider: ProviderId) -> Result<Arc<dyn PaymentStrategy>, PaymentError> {
        self.strategies
            .get(&provider)
            .cloned()
            .ok_or(PaymentError::UnsupportedProvider(provider))
    }

    /// Registered providers, in a stable order.
    pub fn providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<_> = self.strategies.keys().copied().collect();
        providers.sort();
        providers
    }

    /// Providers of the closed set that have no strategy.
    pub fn missing_providers(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|provider| !self.strategies.contains_key(provider))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_providers().is_empty()
    }
}
