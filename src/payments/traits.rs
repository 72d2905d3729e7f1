//! Ports used by the payment processor and the notification core
//!
//! Storage, the gateway and signature verification are all reached through
//! these traits so the core logic can run against in-memory doubles.

use crate::error::AppResult;
use crate::payments::types::{
    GatewayPaymentRequest, GatewayResponse, ModificationRequest, NewNotification,
    NewTransactionResponse, TransactionResponse, TransactionStatus,
};
use crate::tenant::HmacAlgorithm;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Persistence for gateway responses and inbound notifications
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Insert a response row for an operation this service initiated.
    ///
    /// Callers must treat an error as fatal for the operation: claiming
    /// gateway success without a local row leaves gateway state orphaned.
    async fn record_response(&self, response: NewTransactionResponse) -> AppResult<Uuid>;

    /// All rows carrying this gateway reference, oldest first
    async fn find_by_correlation_ref(
        &self,
        psp_reference: &str,
    ) -> AppResult<Vec<TransactionResponse>>;

    async fn find_by_local_transaction_id(
        &self,
        transaction_id: Uuid,
    ) -> AppResult<Option<TransactionResponse>>;

    /// Overwrite the status of one response row and attach its gateway
    /// reference if it has none yet.
    ///
    /// Returns `false` when the row already held that state.
    async fn update_status(
        &self,
        payment_id: Uuid,
        transaction_id: Uuid,
        psp_reference: Option<&str>,
        status: TransactionStatus,
        tenant_id: Uuid,
    ) -> AppResult<bool>;

    /// Unconditional audit insert
    async fn record_notification(&self, notification: NewNotification) -> AppResult<Uuid>;
}

/// Gateway operations used by the payment processor
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Authorize (or, with `capture_immediately`, purchase) a payment
    async fn authorize(&self, request: &GatewayPaymentRequest) -> AppResult<GatewayResponse>;

    async fn capture(&self, request: &ModificationRequest) -> AppResult<GatewayResponse>;

    async fn refund(&self, request: &ModificationRequest) -> AppResult<GatewayResponse>;

    async fn cancel(&self, request: &ModificationRequest) -> AppResult<GatewayResponse>;

    /// Refund without a prior payment
    async fn credit(&self, request: &GatewayPaymentRequest) -> AppResult<GatewayResponse>;
}

/// Verifies notification signatures
pub trait Signer: Send + Sync {
    /// `secret` is the tenant's key material as configured (hex for HMAC keys)
    fn verify(
        &self,
        algorithm: HmacAlgorithm,
        signing_payload: &str,
        signature: &str,
        secret: &str,
    ) -> bool;
}

pub type ResponseStoreRef = Arc<dyn ResponseStore>;
pub type GatewayClientRef = Arc<dyn GatewayClient>;
pub type SignerRef = Arc<dyn Signer>;
