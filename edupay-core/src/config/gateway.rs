//! Gateway API configuration.

/// Shared secret of the trusted platform backend.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Secret key bytes for HMAC signing.
    pub secret: Box<[u8]>,
}

impl GatewayConfig {
    pub fn new(secret: impl Into<Box<[u8]>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }
}
