//! Base URLs of the services settlement talks to.

use url::Url;

#[derive(Debug, Clone)]
pub struct CollaboratorsConfig {
    /// Wallet ledger service.
    pub ledger_url: Url,
    /// Enrollment service.
    pub enrollment_url: Url,
    /// Identity and course catalog (read-only billing data).
    pub catalog_url: Url,
    /// Bearer token sent to all three, if they require one.
    pub service_token: Option<String>,
}
