//! Gateway-facing payment operations
//!
//! Each operation calls the gateway once, records exactly one response row
//! and returns a [`PaymentTransactionInfo`]. A response row that cannot be
//! written fails the operation even when the gateway accepted it.

use crate::billing::PaymentMethod;
use crate::error::{AppError, AppResult};
use crate::payments::traits::{GatewayClientRef, ResponseStoreRef};
use crate::payments::types::{
    GatewayPaymentRequest, GatewayResponse, ModificationRequest, NewTransactionResponse,
    PaymentTransactionInfo, TransactionStatus, TransactionType,
};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Identifiers of the billing-platform operation being executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentContext {
    pub account_id: Uuid,
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub tenant_id: Uuid,
    pub merchant_account: String,
}

/// Payment data for authorize, purchase and credit
#[derive(Debug, Clone)]
pub struct PaymentDetails {
    pub amount: Decimal,
    pub currency: String,
    /// Gateway payment-method object for one-off payments
    pub payment_method: serde_json::Value,
    /// Stored payment method from the billing platform, if any
    pub stored_method: Option<PaymentMethod>,
}

/// Maps a synchronous gateway result code to a local status
pub fn status_for_result_code(result_code: &str) -> TransactionStatus {
    match result_code {
        "Authorised" => TransactionStatus::Success,
        "Received" | "received" | "Pending" | "RedirectShopper" | "IdentifyShopper"
        | "ChallengeShopper" | "PresentToShopper" => TransactionStatus::Pending,
        code if code.starts_with('[') && code.ends_with("-received]") => {
            TransactionStatus::Pending
        }
        "Refused" | "Cancelled" => TransactionStatus::PaymentFailure,
        _ => TransactionStatus::Error,
    }
}

pub struct PaymentProcessor {
    gateway: GatewayClientRef,
    store: ResponseStoreRef,
}

impl PaymentProcessor {
    pub fn new(gateway: GatewayClientRef, store: ResponseStoreRef) -> Self {
        Self { gateway, store }
    }

    pub async fn authorize(
        &self,
        context: &PaymentContext,
        details: &PaymentDetails,
    ) -> AppResult<PaymentTransactionInfo> {
        let request = Self::payment_request(context, details, false);
        let result = self.gateway.authorize(&request).await;
        self.complete(context, TransactionType::Authorize, Some(details.amount), Some(&details.currency), result)
            .await
    }

    /// Authorize and capture in one call
    pub async fn purchase(
        &self,
        context: &PaymentContext,
        details: &PaymentDetails,
    ) -> AppResult<PaymentTransactionInfo> {
        let request = Self::payment_request(context, details, true);
        let result = self.gateway.authorize(&request).await;
        self.complete(context, TransactionType::Purchase, Some(details.amount), Some(&details.currency), result)
            .await
    }

    /// Pay out without a prior payment
    pub async fn credit(
        &self,
        context: &PaymentContext,
        details: &PaymentDetails,
    ) -> AppResult<PaymentTransactionInfo> {
        let request = Self::payment_request(context, details, false);
        let result = self.gateway.credit(&request).await;
        self.complete(context, TransactionType::Credit, Some(details.amount), Some(&details.currency), result)
            .await
    }

    pub async fn capture(
        &self,
        context: &PaymentContext,
        original_transaction_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> AppResult<PaymentTransactionInfo> {
        let request = self
            .modification(context, original_transaction_id, Some((amount, currency)))
            .await?;
        let result = self.gateway.capture(&request).await;
        self.complete(context, TransactionType::Capture, Some(amount), Some(currency), result)
            .await
    }

    pub async fn refund(
        &self,
        context: &PaymentContext,
        original_transaction_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> AppResult<PaymentTransactionInfo> {
        let request = self
            .modification(context, original_transaction_id, Some((amount, currency)))
            .await?;
        let result = self.gateway.refund(&request).await;
        self.complete(context, TransactionType::Refund, Some(amount), Some(currency), result)
            .await
    }

    pub async fn void(
        &self,
        context: &PaymentContext,
        original_transaction_id: Uuid,
    ) -> AppResult<PaymentTransactionInfo> {
        let request = self
            .modification(context, original_transaction_id, None)
            .await?;
        let result = self.gateway.cancel(&request).await;
        self.complete(context, TransactionType::Void, None, None, result)
            .await
    }

    fn payment_request(
        context: &PaymentContext,
        details: &PaymentDetails,
        capture_immediately: bool,
    ) -> GatewayPaymentRequest {
        let stored = details
            .stored_method
            .as_ref()
            .filter(|method| method.is_recurring)
            .and_then(|method| method.recurring_reference.as_deref());

        let payment_method = match stored {
            Some(reference) => serde_json::json!({
                "type": "scheme",
                "storedPaymentMethodId": reference,
            }),
            None => details.payment_method.clone(),
        };

        GatewayPaymentRequest {
            merchant_account: context.merchant_account.clone(),
            reference: context.transaction_id.to_string(),
            amount: details.amount,
            currency: details.currency.clone(),
            payment_method,
            shopper_reference: Some(context.account_id.to_string()),
            recurring: stored.is_some(),
            capture_immediately,
        }
    }

    async fn modification(
        &self,
        context: &PaymentContext,
        original_transaction_id: Uuid,
        amount: Option<(Decimal, &str)>,
    ) -> AppResult<ModificationRequest> {
        let original = self
            .store
            .find_by_local_transaction_id(original_transaction_id)
            .await?
            .ok_or_else(|| AppError::not_found("TransactionResponse", original_transaction_id))?;

        let original_reference = original.psp_reference.ok_or_else(|| {
            AppError::validation(format!(
                "transaction {} has no gateway reference yet",
                original_transaction_id
            ))
        })?;

        Ok(ModificationRequest {
            merchant_account: context.merchant_account.clone(),
            original_reference,
            reference: context.transaction_id.to_string(),
            amount: amount.map(|(amount, _)| amount),
            currency: amount.map(|(_, currency)| currency.to_string()),
        })
    }

    async fn complete(
        &self,
        context: &PaymentContext,
        transaction_type: TransactionType,
        amount: Option<Decimal>,
        currency: Option<&str>,
        result: AppResult<GatewayResponse>,
    ) -> AppResult<PaymentTransactionInfo> {
        let (status, psp_reference, result_code, gateway_error, payload) = match result {
            Ok(response) => {
                let status = status_for_result_code(&response.result_code);
                if status == TransactionStatus::Error {
                    warn!(
                        "{} {} returned unexpected result {}",
                        transaction_type, context.transaction_id, response.result_code
                    );
                }
                (
                    status,
                    response.psp_reference,
                    Some(response.result_code),
                    response.refusal_reason,
                    Some(response.raw),
                )
            }
            Err(e) => {
                error!(
                    "{} {} failed at the gateway: {}",
                    transaction_type, context.transaction_id, e
                );
                let message = e.to_string();
                (
                    TransactionStatus::Error,
                    None,
                    None,
                    Some(message.clone()),
                    Some(serde_json::json!({ "error": message })),
                )
            }
        };

        self.store
            .record_response(NewTransactionResponse {
                account_id: context.account_id,
                payment_id: context.payment_id,
                transaction_id: context.transaction_id,
                transaction_type,
                amount,
                currency: currency.map(str::to_string),
                psp_reference: psp_reference.clone(),
                status,
                additional_data: payload,
                tenant_id: context.tenant_id,
            })
            .await
            .map_err(|e| {
                error!(
                    "Could not record {} response for transaction {}: {}",
                    transaction_type, context.transaction_id, e
                );
                e
            })?;

        info!(
            "{} {} for payment {}: {} ({:?})",
            transaction_type, context.transaction_id, context.payment_id, status, psp_reference
        );

        Ok(PaymentTransactionInfo {
            payment_id: context.payment_id,
            transaction_id: context.transaction_id,
            transaction_type,
            amount,
            currency: currency.map(str::to_string),
            status,
            gateway_reference: psp_reference,
            gateway_result_code: result_code,
            gateway_error,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::PaymentMethodFamily;
    use crate::error::AppErrorKind;
    use crate::payments::in_memory::InMemoryResponseStore;
    use crate::payments::traits::{GatewayClient, ResponseStore};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    /// Gateway double answering every call with a fixed result code
    struct FixedGateway {
        result_code: &'static str,
        fail: bool,
        requests: Mutex<Vec<serde_json::Value>>,
    }

    impl FixedGateway {
        fn new(result_code: &'static str) -> Self {
            Self {
                result_code,
                fail: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn respond<T: serde::Serialize>(&self, request: &T) -> AppResult<GatewayResponse> {
            self.requests
                .lock()
                .unwrap()
                .push(serde_json::to_value(request).unwrap());
            if self.fail {
                return Err(AppError::new(AppErrorKind::External(
                    crate::error::ExternalError::PaymentProvider {
                        provider: "Adyen".to_string(),
                        message: "connection reset".to_string(),
                        is_retryable: true,
                    },
                )));
            }
            Ok(GatewayResponse {
                psp_reference: Some("PSP-1".to_string()),
                result_code: self.result_code.to_string(),
                refusal_reason: None,
                raw: serde_json::json!({ "resultCode": self.result_code }),
            })
        }
    }

    #[async_trait]
    impl GatewayClient for FixedGateway {
        async fn authorize(&self, request: &GatewayPaymentRequest) -> AppResult<GatewayResponse> {
            self.respond(request)
        }
        async fn capture(&self, request: &ModificationRequest) -> AppResult<GatewayResponse> {
            self.respond(request)
        }
        async fn refund(&self, request: &ModificationRequest) -> AppResult<GatewayResponse> {
            self.respond(request)
        }
        async fn cancel(&self, request: &ModificationRequest) -> AppResult<GatewayResponse> {
            self.respond(request)
        }
        async fn credit(&self, request: &GatewayPaymentRequest) -> AppResult<GatewayResponse> {
            self.respond(request)
        }
    }

    fn context() -> PaymentContext {
        PaymentContext {
            account_id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            merchant_account: "TestMerchant".to_string(),
        }
    }

    fn details() -> PaymentDetails {
        PaymentDetails {
            amount: dec!(25.00),
            currency: "EUR".to_string(),
            payment_method: serde_json::json!({"type": "scheme", "encryptedCardNumber": "x"}),
            stored_method: None,
        }
    }

    #[test]
    fn test_result_code_mapping() {
        assert_eq!(status_for_result_code("Authorised"), TransactionStatus::Success);
        assert_eq!(status_for_result_code("[capture-received]"), TransactionStatus::Pending);
        assert_eq!(status_for_result_code("received"), TransactionStatus::Pending);
        assert_eq!(status_for_result_code("RedirectShopper"), TransactionStatus::Pending);
        assert_eq!(status_for_result_code("Refused"), TransactionStatus::PaymentFailure);
        assert_eq!(status_for_result_code("Error"), TransactionStatus::Error);
    }

    #[tokio::test]
    async fn test_authorize_records_one_response() {
        let store = InMemoryResponseStore::new();
        let processor = PaymentProcessor::new(
            Arc::new(FixedGateway::new("Authorised")),
            Arc::new(store.clone()),
        );
        let ctx = context();

        let info = processor.authorize(&ctx, &details()).await.unwrap();
        assert_eq!(info.status, TransactionStatus::Success);
        assert_eq!(info.gateway_reference.as_deref(), Some("PSP-1"));

        let rows = store.responses().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transaction_id, ctx.transaction_id);
        assert_eq!(rows[0].transaction_type, TransactionType::Authorize);
    }

    #[tokio::test]
    async fn test_transport_failure_is_recorded_as_error() {
        let store = InMemoryResponseStore::new();
        let mut gateway = FixedGateway::new("Authorised");
        gateway.fail = true;
        let processor = PaymentProcessor::new(Arc::new(gateway), Arc::new(store.clone()));

        let info = processor.purchase(&context(), &details()).await.unwrap();
        assert_eq!(info.status, TransactionStatus::Error);
        assert!(info.gateway_error.is_some());
        assert_eq!(store.responses().await[0].psp_reference, None);
    }

    #[tokio::test]
    async fn test_capture_uses_original_reference() {
        let store = InMemoryResponseStore::new();
        let gateway = Arc::new(FixedGateway::new("received"));
        let processor = PaymentProcessor::new(gateway.clone(), Arc::new(store.clone()));

        let auth_ctx = context();
        processor.authorize(&auth_ctx, &details()).await.unwrap();

        let capture_ctx = PaymentContext {
            transaction_id: Uuid::new_v4(),
            ..auth_ctx.clone()
        };
        let info = processor
            .capture(&capture_ctx, auth_ctx.transaction_id, dec!(25.00), "EUR")
            .await
            .unwrap();
        assert_eq!(info.status, TransactionStatus::Pending);

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests[1]["original_reference"], "PSP-1");
        assert_eq!(store.responses().await.len(), 2);
    }

    #[tokio::test]
    async fn test_void_of_unknown_transaction_fails() {
        let store = InMemoryResponseStore::new();
        let processor = PaymentProcessor::new(
            Arc::new(FixedGateway::new("received")),
            Arc::new(store.clone()),
        );

        let err = processor.void(&context(), Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.responses().await.is_empty());
    }

    #[tokio::test]
    async fn test_stored_recurring_method_is_used() {
        let store = InMemoryResponseStore::new();
        let gateway = Arc::new(FixedGateway::new("Authorised"));
        let processor = PaymentProcessor::new(gateway.clone(), Arc::new(store));

        let mut recurring = details();
        recurring.stored_method = Some(PaymentMethod {
            id: Uuid::new_v4(),
            family: PaymentMethodFamily::new("visa"),
            recurring_reference: Some("8315".to_string()),
            is_recurring: true,
        });
        processor.authorize(&context(), &recurring).await.unwrap();

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests[0]["recurring"], true);
        assert_eq!(requests[0]["payment_method"]["storedPaymentMethodId"], "8315");
    }

    #[tokio::test]
    async fn test_store_failure_fails_the_operation() {
        struct BrokenStore;

        #[async_trait]
        impl ResponseStore for BrokenStore {
            async fn record_response(&self, _: NewTransactionResponse) -> AppResult<Uuid> {
                Err(AppError::persistence("disk full"))
            }
            async fn find_by_correlation_ref(
                &self,
                _: &str,
            ) -> AppResult<Vec<crate::payments::types::TransactionResponse>> {
                Ok(Vec::new())
            }
            async fn find_by_local_transaction_id(
                &self,
                _: Uuid,
            ) -> AppResult<Option<crate::payments::types::TransactionResponse>> {
                Ok(None)
            }
            async fn update_status(
                &self,
                _: Uuid,
                _: Uuid,
                _: Option<&str>,
                _: TransactionStatus,
                _: Uuid,
            ) -> AppResult<bool> {
                Ok(false)
            }
            async fn record_notification(
                &self,
                _: crate::payments::types::NewNotification,
            ) -> AppResult<Uuid> {
                Ok(Uuid::new_v4())
            }
        }

        let processor = PaymentProcessor::new(
            Arc::new(FixedGateway::new("Authorised")),
            Arc::new(BrokenStore),
        );
        let result = processor.authorize(&context(), &details()).await;
        assert!(result.unwrap_err().is_persistence());
    }
}
