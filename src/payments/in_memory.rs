use crate::error::AppResult;
use crate::payments::traits::ResponseStore;
use crate::payments::types::{
    NewNotification, NewTransactionResponse, NotificationRecord, TransactionResponse,
    TransactionStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory response store.
///
/// Rows are kept in insertion order so reference lookups come back oldest
/// first. Used by tests and local runs without Postgres.
#[derive(Default, Clone)]
pub struct InMemoryResponseStore {
    responses: Arc<RwLock<Vec<TransactionResponse>>>,
    notifications: Arc<RwLock<Vec<NotificationRecord>>>,
}

impl InMemoryResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed row, e.g. one observed before this process started
    pub async fn insert_response(&self, response: TransactionResponse) {
        self.responses.write().await.push(response);
    }

    pub async fn responses(&self) -> Vec<TransactionResponse> {
        self.responses.read().await.clone()
    }

    pub async fn notifications(&self) -> Vec<NotificationRecord> {
        self.notifications.read().await.clone()
    }
}

#[async_trait]
impl ResponseStore for InMemoryResponseStore {
    async fn record_response(&self, response: NewTransactionResponse) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        self.responses.write().await.push(TransactionResponse {
            id,
            account_id: response.account_id,
            payment_id: response.payment_id,
            transaction_id: response.transaction_id,
            transaction_type: response.transaction_type,
            amount: response.amount,
            currency: response.currency,
            psp_reference: response.psp_reference,
            status: response.status,
            additional_data: response.additional_data,
            created_at: Utc::now(),
            tenant_id: response.tenant_id,
        });
        Ok(id)
    }

    async fn find_by_correlation_ref(
        &self,
        psp_reference: &str,
    ) -> AppResult<Vec<TransactionResponse>> {
        let responses = self.responses.read().await;
        let mut found: Vec<TransactionResponse> = responses
            .iter()
            .filter(|r| r.psp_reference.as_deref() == Some(psp_reference))
            .cloned()
            .collect();
        // stable: equal timestamps keep insertion order
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn find_by_local_transaction_id(
        &self,
        transaction_id: Uuid,
    ) -> AppResult<Option<TransactionResponse>> {
        let responses = self.responses.read().await;
        Ok(responses
            .iter()
            .find(|r| r.transaction_id == transaction_id)
            .cloned())
    }

    async fn update_status(
        &self,
        payment_id: Uuid,
        transaction_id: Uuid,
        psp_reference: Option<&str>,
        status: TransactionStatus,
        tenant_id: Uuid,
    ) -> AppResult<bool> {
        let mut responses = self.responses.write().await;
        let Some(row) = responses.iter_mut().find(|r| {
            r.payment_id == payment_id && r.transaction_id == transaction_id && r.tenant_id == tenant_id
        }) else {
            return Ok(false);
        };

        let attach_reference = row.psp_reference.is_none() && psp_reference.is_some();
        if row.status == status && !attach_reference {
            return Ok(false);
        }

        row.status = status;
        if attach_reference {
            row.psp_reference = psp_reference.map(str::to_string);
        }
        Ok(true)
    }

    async fn record_notification(&self, notification: NewNotification) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        self.notifications.write().await.push(NotificationRecord {
            id,
            account_id: notification.account_id,
            payment_id: notification.payment_id,
            transaction_id: notification.transaction_id,
            success: notification.success,
            event_code: notification.event_code,
            merchant_account_code: notification.merchant_account_code,
            merchant_reference: notification.merchant_reference,
            original_reference: notification.original_reference,
            reason: notification.reason,
            psp_reference: notification.psp_reference,
            amount: notification.amount,
            currency: notification.currency,
            additional_data: notification.additional_data,
            tenant_id: notification.tenant_id,
            created_at: Utc::now(),
        });
        Ok(id)
    }
}
