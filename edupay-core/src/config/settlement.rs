//! Timeouts and settlement tuning.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutsConfig {
    /// Bound on every provider API call.
    pub provider: Duration,
    /// Bound on every ledger, enrollment and catalog call.
    pub downstream: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            provider: Duration::from_secs(15),
            downstream: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementConfig {
    /// A `processing` claim older than this may be taken over by another
    /// delivery of the same transaction.
    pub claim_lease: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            claim_lease: Duration::from_secs(120),
        }
    }
}
