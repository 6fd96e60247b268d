//! Idempotency records of settled transactions.
//!
//! Every delivery of a settlement event first claims its
//! `(provider, transaction_id)` key. Only the claim holder runs side
//! effects; it then either completes the record (terminal, one-shot) or
//! releases the claim so a redelivery can retry. Both take the
//! [`ClaimToken`] handed out by `claim`, so a holder whose claim was taken
//! over after the lease can no longer touch the key.

mod memory;
mod postgres;

pub use memory::MemorySettlementStore;
pub use postgres::PgSettlementStore;

use std::time::Duration;

use async_trait::async_trait;
use compact_str::CompactString;
use edupay_sdk::objects::{ProviderId, SettlementSummary};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SettlementKey {
    pub provider: ProviderId,
    pub transaction_id: CompactString,
}

impl SettlementKey {
    pub fn new(provider: ProviderId, transaction_id: &str) -> Self {
        Self {
            provider,
            transaction_id: CompactString::from(transaction_id),
        }
    }
}

impl std::fmt::Display for SettlementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.transaction_id)
    }
}

/// Identifies one acquisition of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken(Uuid);

impl ClaimToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Terminal state of a settled key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    /// Side effects ran to completion.
    Applied,
    /// The provider reported the payment as failed. Nothing ran.
    Rejected,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Applied => "APPLIED",
            RecordStatus::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    pub key: SettlementKey,
    pub status: RecordStatus,
    pub applied_at: OffsetDateTime,
    pub outcome_summary: Option<SettlementSummary>,
}

/// Result of trying to claim a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller holds the claim and must complete or release it with
    /// this token.
    Acquired(ClaimToken),
    /// Another delivery holds a live claim.
    InFlight,
    /// The key already reached a terminal state.
    Settled(SettlementRecord),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid stored outcome: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown provider in settlement record: {0}")]
    UnknownProvider(String),

    /// Complete was called without holding the claim (it expired and was
    /// taken over by another token, or was never acquired).
    #[error("no live claim for {0}")]
    NotClaimed(SettlementKey),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &SettlementKey) -> Result<Option<SettlementRecord>, StoreError>;

    /// Claim `key` for processing. A `processing` claim older than `lease`
    /// counts as abandoned and is taken over.
    async fn claim(&self, key: &SettlementKey, lease: Duration) -> Result<Claim, StoreError>;

    /// Move a claimed key to its terminal state. Fails with `NotClaimed`
    /// unless `token` still holds the claim.
    async fn complete(
        &self,
        key: &SettlementKey,
        token: ClaimToken,
        status: RecordStatus,
        summary: Option<SettlementSummary>,
    ) -> Result<SettlementRecord, StoreError>;

    /// Give up a claim without recording anything. Returns `false` when
    /// `token` no longer holds the claim, which is then left alone.
    async fn release(&self, key: &SettlementKey, token: ClaimToken) -> Result<bool, StoreError>;
}
