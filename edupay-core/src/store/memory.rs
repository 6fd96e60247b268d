use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use edupay_sdk::objects::SettlementSummary;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Claim, ClaimToken, IdempotencyStore, RecordStatus, SettlementKey, SettlementRecord, StoreError};

#[derive(Debug, Clone)]
enum Entry {
    Processing {
        claimed_at: Instant,
        token: ClaimToken,
    },
    Done(SettlementRecord),
}

/// Process-local store for tests and single-instance development.
#[derive(Debug, Default)]
pub struct MemorySettlementStore {
    entries: Mutex<HashMap<SettlementKey, Entry>>,
}

impl MemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemorySettlementStore {
    async fn get(&self, key: &SettlementKey) -> Result<Option<SettlementRecord>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(match entries.get(key) {
            Some(Entry::Done(record)) => Some(record.clone()),
            _ => None,
        })
    }

    async fn claim(&self, key: &SettlementKey, lease: Duration) -> Result<Claim, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(Entry::Done(record)) => return Ok(Claim::Settled(record.clone())),
            Some(Entry::Processing { claimed_at, .. }) if now.duration_since(*claimed_at) < lease => {
                return Ok(Claim::InFlight);
            }
            _ => {}
        }
        let token = ClaimToken::new();
        entries.insert(
            key.clone(),
            Entry::Processing {
                claimed_at: now,
                token,
            },
        );
        Ok(Claim::Acquired(token))
    }

    async fn complete(
        &self,
        key: &SettlementKey,
        token: ClaimToken,
        status: RecordStatus,
        summary: Option<SettlementSummary>,
    ) -> Result<SettlementRecord, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(Entry::Processing { token: held, .. }) if *held == token => {
                let record = SettlementRecord {
                    key: key.clone(),
                    status,
                    applied_at: OffsetDateTime::now_utc(),
                    outcome_summary: summary,
                };
                entries.insert(key.clone(), Entry::Done(record.clone()));
                Ok(record)
            }
            _ => Err(StoreError::NotClaimed(key.clone())),
        }
    }

    async fn release(&self, key: &SettlementKey, token: ClaimToken) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(Entry::Processing { token: held, .. }) if *held == token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
