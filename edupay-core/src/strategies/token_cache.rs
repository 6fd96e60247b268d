use std::future::Future;

use time::OffsetDateTime;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: OffsetDateTime,
}

/// Bearer token cache owned by one strategy instance.
///
/// A token is served while `now < expires_at` and refreshed once
/// `now >= expires_at`. The lock is held across the refresh so concurrent
/// callers wait for one refresh instead of each fetching their own token.
#[derive(Debug, Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token, or call `refresh` for a new
    /// `(token, expires_at)` pair and cache it.
    pub async fn get_or_refresh<F, Fut, E>(&self, now: OffsetDateTime, refresh: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, OffsetDateTime), E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref() {
            if now < token.expires_at {
                return Ok(token.value.clone());
            }
        }
        let (value, expires_at) = refresh().await?;
        *slot = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });
        Ok(value)
    }

    /// Drop the cached token, e.g. after the provider rejected it.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
