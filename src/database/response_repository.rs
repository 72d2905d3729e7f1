use crate::database::error::{DatabaseError, DbResult};
use crate::error::AppResult;
use crate::payments::traits::ResponseStore;
use crate::payments::types::{
    NewNotification, NewTransactionResponse, NotificationRecord, TransactionResponse,
    TransactionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

const RESPONSE_COLUMNS: &str = "id, account_id, payment_id, transaction_id, transaction_type, \
     amount, currency, psp_reference, status, additional_data, created_at, tenant_id";

/// Row of `adyen_responses`
#[derive(Debug, Clone, FromRow)]
struct ResponseRow {
    id: Uuid,
    account_id: Uuid,
    payment_id: Uuid,
    transaction_id: Uuid,
    transaction_type: String,
    amount: Option<Decimal>,
    currency: Option<String>,
    psp_reference: Option<String>,
    status: String,
    additional_data: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    tenant_id: Uuid,
}

impl TryFrom<ResponseRow> for TransactionResponse {
    type Error = DatabaseError;

    fn try_from(row: ResponseRow) -> DbResult<Self> {
        Ok(TransactionResponse {
            id: row.id,
            account_id: row.account_id,
            payment_id: row.payment_id,
            transaction_id: row.transaction_id,
            transaction_type: row
                .transaction_type
                .parse()
                .map_err(|e| DatabaseError::decode("transaction_type", format!("{}", e)))?,
            amount: row.amount,
            currency: row.currency,
            psp_reference: row.psp_reference,
            status: row
                .status
                .parse()
                .map_err(|e| DatabaseError::decode("status", format!("{}", e)))?,
            additional_data: row.additional_data,
            created_at: row.created_at,
            tenant_id: row.tenant_id,
        })
    }
}

/// Postgres-backed response store
#[derive(Clone)]
pub struct PgResponseStore {
    pool: PgPool,
}

impl PgResponseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Audit rows for one gateway reference, newest first
    pub async fn notifications_for_reference(
        &self,
        psp_reference: &str,
        limit: i64,
    ) -> DbResult<Vec<NotificationRecord>> {
        sqlx::query_as::<_, NotificationRecord>(
            "SELECT id, account_id, payment_id, transaction_id, success, event_code, \
                    merchant_account_code, merchant_reference, original_reference, reason, \
                    psp_reference, amount, currency, additional_data, tenant_id, created_at
             FROM adyen_notifications
             WHERE psp_reference = $1 OR original_reference = $1
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(psp_reference)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl ResponseStore for PgResponseStore {
    async fn record_response(&self, response: NewTransactionResponse) -> AppResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO adyen_responses
                 (id, account_id, payment_id, transaction_id, transaction_type, amount, currency,
                  psp_reference, status, additional_data, created_at, tenant_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), $11)
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(response.account_id)
        .bind(response.payment_id)
        .bind(response.transaction_id)
        .bind(response.transaction_type.as_str())
        .bind(response.amount)
        .bind(response.currency)
        .bind(response.psp_reference)
        .bind(response.status.as_str())
        .bind(response.additional_data)
        .bind(response.tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::from_sqlx(e)
                .with_context(format!("transaction {}", response.transaction_id))
        })?;

        Ok(id)
    }

    async fn find_by_correlation_ref(
        &self,
        psp_reference: &str,
    ) -> AppResult<Vec<TransactionResponse>> {
        let rows = sqlx::query_as::<_, ResponseRow>(&format!(
            "SELECT {} FROM adyen_responses WHERE psp_reference = $1 ORDER BY created_at ASC, seq ASC",
            RESPONSE_COLUMNS
        ))
        .bind(psp_reference)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let responses = rows
            .into_iter()
            .map(TransactionResponse::try_from)
            .collect::<DbResult<Vec<_>>>()?;
        Ok(responses)
    }

    async fn find_by_local_transaction_id(
        &self,
        transaction_id: Uuid,
    ) -> AppResult<Option<TransactionResponse>> {
        let row = sqlx::query_as::<_, ResponseRow>(&format!(
            "SELECT {} FROM adyen_responses WHERE transaction_id = $1 ORDER BY created_at ASC, seq ASC LIMIT 1",
            RESPONSE_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(TransactionResponse::try_from).transpose()?)
    }

    async fn update_status(
        &self,
        payment_id: Uuid,
        transaction_id: Uuid,
        psp_reference: Option<&str>,
        status: TransactionStatus,
        tenant_id: Uuid,
    ) -> AppResult<bool> {
        // single-row update with predicate: a no-op when the row already
        // holds this status and reference
        let result = sqlx::query(
            "UPDATE adyen_responses
             SET status = $4, psp_reference = COALESCE(psp_reference, $3)
             WHERE payment_id = $1 AND transaction_id = $2 AND tenant_id = $5
               AND (status IS DISTINCT FROM $4
                    OR (psp_reference IS NULL AND $3::TEXT IS NOT NULL))",
        )
        .bind(payment_id)
        .bind(transaction_id)
        .bind(psp_reference)
        .bind(status.as_str())
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::from_sqlx(e).with_context(format!(
                "payment {} transaction {}",
                payment_id, transaction_id
            ))
        })?;

        let changed = result.rows_affected() > 0;
        debug!(
            "update_status({}, {}, {}) changed={}",
            payment_id, transaction_id, status, changed
        );
        Ok(changed)
    }

    async fn record_notification(&self, notification: NewNotification) -> AppResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO adyen_notifications
                 (id, account_id, payment_id, transaction_id, success, event_code,
                  merchant_account_code, merchant_reference, original_reference, reason,
                  psp_reference, amount, currency, additional_data, tenant_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW())
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(notification.account_id)
        .bind(notification.payment_id)
        .bind(notification.transaction_id)
        .bind(notification.success)
        .bind(notification.event_code)
        .bind(notification.merchant_account_code)
        .bind(notification.merchant_reference)
        .bind(notification.original_reference)
        .bind(notification.reason)
        .bind(notification.psp_reference)
        .bind(notification.amount)
        .bind(notification.currency)
        .bind(notification.additional_data)
        .bind(notification.tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(id)
    }
}
