use crate::billing::{
    BillingPlatform, NewChargeback, Payment, PaymentMethod, PaymentTransaction, StatusChange,
};
use crate::error::{AppError, AppResult};
use crate::payments::types::{TransactionStatus, TransactionType};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory billing platform.
///
/// Honours the collaborator contract: re-applying a status is a no-op and
/// chargebacks are deduplicated on their external key. Counts update calls
/// and records every effective transition so callers can assert on them.
#[derive(Default, Clone)]
pub struct InMemoryBillingPlatform {
    payments: Arc<RwLock<HashMap<Uuid, Payment>>>,
    payment_methods: Arc<RwLock<HashMap<Uuid, PaymentMethod>>>,
    transitions: Arc<RwLock<Vec<(Uuid, TransactionStatus)>>>,
    update_calls: Arc<AtomicUsize>,
}

impl InMemoryBillingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_payment(&self, payment: Payment) {
        self.payments.write().await.insert(payment.id, payment);
    }

    pub async fn insert_payment_method(&self, method: PaymentMethod) {
        self.payment_methods.write().await.insert(method.id, method);
    }

    /// Add a transaction to an existing payment
    pub async fn push_transaction(&self, payment_id: Uuid, transaction: PaymentTransaction) -> AppResult<()> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(&payment_id)
            .ok_or_else(|| AppError::not_found("Payment", payment_id))?;
        payment.transactions.push(transaction);
        Ok(())
    }

    pub async fn payment(&self, payment_id: Uuid) -> Option<Payment> {
        self.payments.read().await.get(&payment_id).cloned()
    }

    /// Effective status changes, in the order they happened
    pub async fn transitions(&self) -> Vec<(Uuid, TransactionStatus)> {
        self.transitions.read().await.clone()
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingPlatform for InMemoryBillingPlatform {
    async fn get_payment(&self, payment_id: Uuid, _tenant_id: Uuid) -> AppResult<Payment> {
        self.payments
            .read()
            .await
            .get(&payment_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("Payment", payment_id))
    }

    async fn update_transaction_status(
        &self,
        change: StatusChange,
        _tenant_id: Uuid,
    ) -> AppResult<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);

        let mut payments = self.payments.write().await;
        let transaction = payments
            .get_mut(&change.payment_id)
            .and_then(|p| p.transactions.iter_mut().find(|t| t.id == change.transaction_id))
            .ok_or_else(|| AppError::not_found("PaymentTransaction", change.transaction_id))?;

        if transaction.gateway_reference.is_none() {
            transaction.gateway_reference = change.gateway_reference;
        }
        if transaction.status != change.status {
            transaction.status = change.status;
            self.transitions
                .write()
                .await
                .push((change.transaction_id, change.status));
        }
        Ok(())
    }

    async fn get_payment_method(
        &self,
        payment_method_id: Uuid,
        _tenant_id: Uuid,
    ) -> AppResult<PaymentMethod> {
        self.payment_methods
            .read()
            .await
            .get(&payment_method_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("PaymentMethod", payment_method_id))
    }

    async fn create_chargeback(
        &self,
        payment_id: Uuid,
        chargeback: NewChargeback,
        _tenant_id: Uuid,
    ) -> AppResult<PaymentTransaction> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(&payment_id)
            .ok_or_else(|| AppError::not_found("Payment", payment_id))?;

        if let Some(existing) = payment.transaction_by_key(&chargeback.external_key) {
            return Ok(existing.clone());
        }

        let transaction = PaymentTransaction {
            id: Uuid::new_v4(),
            external_key: chargeback.external_key,
            transaction_type: TransactionType::Chargeback,
            status: TransactionStatus::Success,
            amount: chargeback.amount,
            currency: chargeback.currency,
            gateway_reference: chargeback.gateway_reference,
            created_at: Utc::now(),
        };
        payment.transactions.push(transaction.clone());
        self.transitions
            .write()
            .await
            .push((transaction.id, TransactionStatus::Success));
        Ok(transaction)
    }
}
