use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;
use uuid::Uuid;

/// Settlement record status for database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "settlement_status")]
pub enum SettlementRecordStatus {
    Processing,
    Applied,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SettlementRecordRow {
    pub provider: String,
    pub transaction_id: String,
    pub status: SettlementRecordStatus,
    pub claimed_at: OffsetDateTime,
    pub claim_token: Option<Uuid>,
    pub applied_at: Option<OffsetDateTime>,
    pub outcome_summary: Option<serde_json::Value>,
}

const RECORD_COLUMNS: &str =
    "provider, transaction_id, status, claimed_at, claim_token, applied_at, outcome_summary";

#[derive(Debug, Clone)]
pub struct GetSettlementRecord {
    pub provider: String,
    pub transaction_id: String,
}

impl Processor<GetSettlementRecord> for DatabaseProcessor {
    type Output = Option<SettlementRecordRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetSettlementRecord")]
    async fn process(
        &self,
        query: GetSettlementRecord,
    ) -> Result<Option<SettlementRecordRow>, sqlx::Error> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM settlement_records \
            WHERE provider = $1 AND transaction_id = $2"
        );
        sqlx::query_as::<_, SettlementRecordRow>(&sql)
            .bind(query.provider)
            .bind(query.transaction_id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Insert a `processing` row, or take over a `processing` row whose claim is
/// older than the lease.
///
/// Returns `true` when `token` now holds the claim. Terminal rows are
/// never touched.
pub struct ClaimSettlement {
    pub provider: String,
    pub transaction_id: String,
    pub lease_secs: f64,
    pub token: Uuid,
}

impl Processor<ClaimSettlement> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClaimSettlement")]
    async fn process(&self, claim: ClaimSettlement) -> Result<bool, sqlx::Error> {
        let claimed = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO settlement_records (provider, transaction_id, status, claimed_at, claim_token)
            VALUES ($1, $2, 'processing', now(), $4)
            ON CONFLICT (provider, transaction_id) DO UPDATE
            SET claimed_at = now(), claim_token = EXCLUDED.claim_token
            WHERE settlement_records.status = 'processing'
              AND settlement_records.claimed_at < now() - make_interval(secs => $3)
            RETURNING transaction_id
            "#,
        )
        .bind(claim.provider)
        .bind(claim.transaction_id)
        .bind(claim.lease_secs)
        .bind(claim.token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(claimed.is_some())
    }
}

#[derive(Debug, Clone)]
/// Move a `processing` row held by `token` to its terminal status.
pub struct CompleteSettlement {
    pub provider: String,
    pub transaction_id: String,
    pub token: Uuid,
    pub status: SettlementRecordStatus,
    pub outcome_summary: Option<serde_json::Value>,
}

impl Processor<CompleteSettlement> for DatabaseProcessor {
    type Output = Option<SettlementRecordRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CompleteSettlement")]
    async fn process(
        &self,
        complete: CompleteSettlement,
    ) -> Result<Option<SettlementRecordRow>, sqlx::Error> {
        let sql = format!(
            "UPDATE settlement_records \
            SET status = $3, applied_at = now(), outcome_summary = $4 \
            WHERE provider = $1 AND transaction_id = $2 AND status = 'processing' \
            AND claim_token = $5 \
            RETURNING {RECORD_COLUMNS}"
        );
        sqlx::query_as::<_, SettlementRecordRow>(&sql)
            .bind(complete.provider)
            .bind(complete.transaction_id)
            .bind(complete.status)
            .bind(complete.outcome_summary)
            .bind(complete.token)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Drop a `processing` row held by `token` so the next delivery can claim
/// it again.
pub struct ReleaseSettlement {
    pub provider: String,
    pub transaction_id: String,
    pub token: Uuid,
}

impl Processor<ReleaseSettlement> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ReleaseSettlement")]
    async fn process(&self, release: ReleaseSettlement) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM settlement_records \
            WHERE provider = $1 AND transaction_id = $2 AND status = 'processing' \
            AND claim_token = $3",
        )
        .bind(release.provider)
        .bind(release.transaction_id)
        .bind(release.token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
