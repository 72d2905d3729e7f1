//! Shared fixtures for the notification integration tests
#![allow(dead_code)]

use adyen_billing_bridge::billing::{
    InMemoryBillingPlatform, Payment, PaymentMethod, PaymentMethodFamily, PaymentTransaction,
};
use adyen_billing_bridge::error::{AppError, AppResult};
use adyen_billing_bridge::notifications::{ItemOutcome, NotificationHandler, NotificationItem};
use adyen_billing_bridge::payments::in_memory::InMemoryResponseStore;
use adyen_billing_bridge::payments::providers::HmacSha256Signer;
use adyen_billing_bridge::payments::traits::{ResponseStore, ResponseStoreRef};
use adyen_billing_bridge::payments::types::{
    NewNotification, NewTransactionResponse, TransactionResponse, TransactionStatus,
    TransactionType,
};
use adyen_billing_bridge::tenant::{TenantConfig, TenantRegistry};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub const MERCHANT: &str = "ShopEU";
pub const HMAC_KEY: &str = "44782DEF547AAA06C910C43932B1EB0C71FC68D9D0C057550C48EC2ACF6BA056";

/// Response store whose status updates always fail
pub struct FailingUpdateStore {
    inner: InMemoryResponseStore,
}

#[async_trait]
impl ResponseStore for FailingUpdateStore {
    async fn record_response(&self, response: NewTransactionResponse) -> AppResult<Uuid> {
        self.inner.record_response(response).await
    }

    async fn find_by_correlation_ref(&self, psp_reference: &str) -> AppResult<Vec<TransactionResponse>> {
        self.inner.find_by_correlation_ref(psp_reference).await
    }

    async fn find_by_local_transaction_id(
        &self,
        transaction_id: Uuid,
    ) -> AppResult<Option<TransactionResponse>> {
        self.inner.find_by_local_transaction_id(transaction_id).await
    }

    async fn update_status(
        &self,
        _payment_id: Uuid,
        _transaction_id: Uuid,
        _psp_reference: Option<&str>,
        _status: TransactionStatus,
        _tenant_id: Uuid,
    ) -> AppResult<bool> {
        Err(AppError::persistence("connection reset while updating adyen_responses"))
    }

    async fn record_notification(&self, notification: NewNotification) -> AppResult<Uuid> {
        self.inner.record_notification(notification).await
    }
}

pub struct HarnessOptions {
    /// Payment-method family of the test payment
    pub family: &'static str,
    pub chargeback_as_failure: Vec<&'static str>,
    pub hmac: bool,
    pub failing_updates: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            family: "visa",
            chargeback_as_failure: vec!["sepadirectdebit", "elv"],
            hmac: false,
            failing_updates: false,
        }
    }
}

/// One tenant, one payment, in-memory collaborators
pub struct Harness {
    pub store: InMemoryResponseStore,
    pub billing: InMemoryBillingPlatform,
    pub handler: NotificationHandler,
    pub tenant: TenantConfig,
    pub account_id: Uuid,
    pub payment_id: Uuid,
    signs: bool,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    pub async fn with_options(options: HarnessOptions) -> Self {
        let store = InMemoryResponseStore::new();
        let billing = InMemoryBillingPlatform::new();

        let mut tenant = TenantConfig::unconfigured(Uuid::new_v4());
        tenant.merchant_accounts.push(MERCHANT.to_string());
        tenant.chargeback_as_failure_families = options
            .chargeback_as_failure
            .iter()
            .map(PaymentMethodFamily::new)
            .collect();
        if options.hmac {
            tenant.hmac_secret = Some(HMAC_KEY.to_string());
        }

        let account_id = Uuid::new_v4();
        let method = PaymentMethod {
            id: Uuid::new_v4(),
            family: PaymentMethodFamily::new(options.family),
            recurring_reference: None,
            is_recurring: false,
        };
        let payment = Payment {
            id: Uuid::new_v4(),
            account_id,
            payment_method_id: method.id,
            transactions: Vec::new(),
        };
        let payment_id = payment.id;
        billing.insert_payment_method(method).await;
        billing.insert_payment(payment).await;

        let store_ref: ResponseStoreRef = if options.failing_updates {
            Arc::new(FailingUpdateStore {
                inner: store.clone(),
            })
        } else {
            Arc::new(store.clone())
        };
        let registry = TenantRegistry::new(vec![tenant.clone()]).unwrap();
        let handler = NotificationHandler::new(
            store_ref,
            Arc::new(billing.clone()),
            Arc::new(HmacSha256Signer),
            Arc::new(registry),
        );

        Self {
            store,
            billing,
            handler,
            tenant,
            account_id,
            payment_id,
            signs: options.hmac,
        }
    }

    /// Add a PENDING transaction to the payment and its response row
    pub async fn add_transaction(&self, transaction_type: TransactionType, psp_reference: Option<&str>) -> Uuid {
        let transaction_id = Uuid::new_v4();
        self.billing
            .push_transaction(
                self.payment_id,
                PaymentTransaction {
                    id: transaction_id,
                    external_key: transaction_id.to_string(),
                    transaction_type,
                    status: TransactionStatus::Pending,
                    amount: Some(dec!(10.00)),
                    currency: Some("EUR".to_string()),
                    gateway_reference: psp_reference.map(str::to_string),
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        self.store
            .insert_response(TransactionResponse {
                id: Uuid::new_v4(),
                account_id: self.account_id,
                payment_id: self.payment_id,
                transaction_id,
                transaction_type,
                amount: Some(dec!(10.00)),
                currency: Some("EUR".to_string()),
                psp_reference: psp_reference.map(str::to_string),
                status: TransactionStatus::Pending,
                additional_data: None,
                created_at: Utc::now(),
                tenant_id: self.tenant.tenant_id,
            })
            .await;
        transaction_id
    }

    pub async fn payment(&self) -> Payment {
        self.billing.payment(self.payment_id).await.unwrap()
    }

    pub async fn status(&self, transaction_id: Uuid) -> TransactionStatus {
        self.payment().await.transaction(transaction_id).unwrap().status
    }

    pub async fn response_row(&self, transaction_id: Uuid) -> TransactionResponse {
        self.store
            .find_by_local_transaction_id(transaction_id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Deliver one item in its own envelope, signed when the tenant verifies
    pub async fn deliver(&self, item: Value) -> ItemOutcome {
        let item = if self.signs { sign(item) } else { item };
        let report = self.handler.process(&envelope(vec![item])).await;
        assert_eq!(report.acknowledgement.to_string(), "[accepted]");
        assert_eq!(report.outcomes.len(), 1);
        report.outcomes.into_iter().next().unwrap()
    }
}

pub fn item(event_code: &str, psp_reference: &str, original_reference: Option<&str>, success: bool) -> Value {
    json!({
        "eventCode": event_code,
        "merchantAccountCode": MERCHANT,
        "merchantReference": "order-1",
        "pspReference": psp_reference,
        "originalReference": original_reference.unwrap_or(""),
        "success": if success { "true" } else { "false" },
        "amount": {"value": 1000, "currency": "EUR"},
        "paymentMethod": "visa",
        "eventDate": "2026-03-01T10:00:00+01:00",
        "reason": ""
    })
}

pub fn envelope(items: Vec<Value>) -> Vec<u8> {
    let wrapped: Vec<Value> = items
        .into_iter()
        .map(|item| json!({ "NotificationRequestItem": item }))
        .collect();
    json!({ "live": "false", "notificationItems": wrapped })
        .to_string()
        .into_bytes()
}

/// Attach a valid HMAC signature to an item
pub fn sign(mut item: Value) -> Value {
    let parsed: NotificationItem = serde_json::from_value(item.clone()).unwrap();
    let signature = HmacSha256Signer::sign(HMAC_KEY, &parsed.signing_payload()).unwrap();
    item["additionalData"]["hmacSignature"] = json!(signature);
    item
}
