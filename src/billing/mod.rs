//! Billing-platform collaborator
//!
//! The billing platform owns payments, payment methods and payment
//! transactions. This service only reads them and asks the platform to move
//! a transaction to a new status (or to record a chargeback); it never
//! writes those records itself.

pub mod http;
pub mod in_memory;

pub use http::{BillingConfig, HttpBillingPlatform};
pub use in_memory::InMemoryBillingPlatform;

use crate::error::AppResult;
use crate::payments::types::{TransactionStatus, TransactionType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Payment-method family as reported by the gateway (e.g. `visa`,
/// `sepadirectdebit`). Compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PaymentMethodFamily(String);

impl PaymentMethodFamily {
    pub fn new(family: impl AsRef<str>) -> Self {
        Self(family.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PaymentMethodFamily {
    fn from(family: String) -> Self {
        Self::new(family)
    }
}

impl From<PaymentMethodFamily> for String {
    fn from(family: PaymentMethodFamily) -> Self {
        family.0
    }
}

impl fmt::Display for PaymentMethodFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub external_key: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub gateway_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub account_id: Uuid,
    pub payment_method_id: Uuid,
    #[serde(default)]
    pub transactions: Vec<PaymentTransaction>,
}

impl Payment {
    pub fn transaction(&self, transaction_id: Uuid) -> Option<&PaymentTransaction> {
        self.transactions.iter().find(|t| t.id == transaction_id)
    }

    pub fn transaction_by_key(&self, external_key: &str) -> Option<&PaymentTransaction> {
        self.transactions
            .iter()
            .find(|t| t.external_key == external_key)
    }

    /// Chargeback transactions, oldest first
    pub fn chargebacks(&self) -> impl Iterator<Item = &PaymentTransaction> {
        self.transactions
            .iter()
            .filter(|t| t.transaction_type == TransactionType::Chargeback)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    pub id: Uuid,
    pub family: PaymentMethodFamily,
    pub recurring_reference: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
}

/// A status transition requested from the billing platform.
///
/// Applying the same change twice must be a no-op on the platform side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub gateway_reference: Option<String>,
    pub additional_data: Option<serde_json::Value>,
}

/// Request to record a chargeback against a payment.
///
/// `external_key` makes the call idempotent: a second request with the same
/// key returns the transaction created by the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChargeback {
    pub external_key: String,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub gateway_reference: Option<String>,
    pub additional_data: Option<serde_json::Value>,
}

#[async_trait]
pub trait BillingPlatform: Send + Sync {
    async fn get_payment(&self, payment_id: Uuid, tenant_id: Uuid) -> AppResult<Payment>;

    async fn update_transaction_status(&self, change: StatusChange, tenant_id: Uuid)
        -> AppResult<()>;

    async fn get_payment_method(
        &self,
        payment_method_id: Uuid,
        tenant_id: Uuid,
    ) -> AppResult<PaymentMethod>;

    /// Record a chargeback transaction, already in SUCCESS
    async fn create_chargeback(
        &self,
        payment_id: Uuid,
        chargeback: NewChargeback,
        tenant_id: Uuid,
    ) -> AppResult<PaymentTransaction>;
}

pub type BillingPlatformRef = Arc<dyn BillingPlatform>;
