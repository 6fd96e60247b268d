use std::time::Duration;

use async_trait::async_trait;
use edupay_sdk::objects::{ProviderId, SettlementSummary};
use kanau::processor::Processor;
use sqlx::PgPool;

use super::{Claim, ClaimToken, IdempotencyStore, RecordStatus, SettlementKey, SettlementRecord, StoreError};
use crate::entities::settlement_records::{
    ClaimSettlement, CompleteSettlement, GetSettlementRecord, ReleaseSettlement,
    SettlementRecordRow, SettlementRecordStatus,
};
use crate::framework::DatabaseProcessor;

/// Settlement records in the `settlement_records` table.
pub struct PgSettlementStore {
    processor: DatabaseProcessor,
}

impl PgSettlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            processor: DatabaseProcessor { pool },
        }
    }
}

fn to_record(row: SettlementRecordRow) -> Result<Option<SettlementRecord>, StoreError> {
    let status = match row.status {
        SettlementRecordStatus::Processing => return Ok(None),
        SettlementRecordStatus::Applied => RecordStatus::Applied,
        SettlementRecordStatus::Rejected => RecordStatus::Rejected,
    };
    let provider: ProviderId = row
        .provider
        .parse()
        .map_err(|_| StoreError::UnknownProvider(row.provider.clone()))?;
    let outcome_summary = row
        .outcome_summary
        .map(serde_json::from_value::<SettlementSummary>)
        .transpose()?;
    Ok(Some(SettlementRecord {
        key: SettlementKey::new(provider, &row.transaction_id),
        status,
        applied_at: row.applied_at.unwrap_or(row.claimed_at),
        outcome_summary,
    }))
}

#[async_trait]
impl IdempotencyStore for PgSettlementStore {
    async fn get(&self, key: &SettlementKey) -> Result<Option<SettlementRecord>, StoreError> {
        let row = self
            .processor
            .process(GetSettlementRecord {
                provider: key.provider.as_str().to_owned(),
                transaction_id: key.transaction_id.to_string(),
            })
            .await?;
        match row {
            Some(row) => to_record(row),
            None => Ok(None),
        }
    }

    async fn claim(&self, key: &SettlementKey, lease: Duration) -> Result<Claim, StoreError> {
        let token = ClaimToken::new();
        let acquired = self
            .processor
            .process(ClaimSettlement {
                provider: key.provider.as_str().to_owned(),
                transaction_id: key.transaction_id.to_string(),
                lease_secs: lease.as_secs_f64(),
                token: token.as_uuid(),
            })
            .await?;
        if acquired {
            return Ok(Claim::Acquired(token));
        }
        // Someone else holds the row. A terminal row means settled, anything
        // else is a live claim. A row released in between reads as in flight
        // and the provider's redelivery will claim it.
        Ok(match self.get(key).await? {
            Some(record) => Claim::Settled(record),
            None => Claim::InFlight,
        })
    }

    async fn complete(
        &self,
        key: &SettlementKey,
        token: ClaimToken,
        status: RecordStatus,
        summary: Option<SettlementSummary>,
    ) -> Result<SettlementRecord, StoreError> {
        let status = match status {
            RecordStatus::Applied => SettlementRecordStatus::Applied,
            RecordStatus::Rejected => SettlementRecordStatus::Rejected,
        };
        let outcome_summary = summary.map(serde_json::to_value).transpose()?;
        let row = self
            .processor
            .process(CompleteSettlement {
                provider: key.provider.as_str().to_owned(),
                transaction_id: key.transaction_id.to_string(),
                token: token.as_uuid(),
                status,
                outcome_summary,
            })
            .await?
            .ok_or_else(|| StoreError::NotClaimed(key.clone()))?;
        to_record(row)?.ok_or_else(|| StoreError::NotClaimed(key.clone()))
    }

    async fn release(&self, key: &SettlementKey, token: ClaimToken) -> Result<bool, StoreError> {
        let released = self
            .processor
            .process(ReleaseSettlement {
                provider: key.provider.as_str().to_owned(),
                transaction_id: key.transaction_id.to_string(),
                token: token.as_uuid(),
            })
            .await?;
        Ok(released > 0)
    }
}
