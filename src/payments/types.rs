//! Payment domain types
//!
//! Types shared by the gateway-facing processor, the notification core and
//! the response store implementations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

/// Kind of operation a local payment transaction represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Authorize,
    Capture,
    Purchase,
    Refund,
    Void,
    Credit,
    Chargeback,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Authorize => "AUTHORIZE",
            TransactionType::Capture => "CAPTURE",
            TransactionType::Purchase => "PURCHASE",
            TransactionType::Refund => "REFUND",
            TransactionType::Void => "VOID",
            TransactionType::Credit => "CREDIT",
            TransactionType::Chargeback => "CHARGEBACK",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTHORIZE" => Ok(TransactionType::Authorize),
            "CAPTURE" => Ok(TransactionType::Capture),
            "PURCHASE" => Ok(TransactionType::Purchase),
            "REFUND" => Ok(TransactionType::Refund),
            "VOID" => Ok(TransactionType::Void),
            "CREDIT" => Ok(TransactionType::Credit),
            "CHARGEBACK" => Ok(TransactionType::Chargeback),
            other => Err(AppError::validation(format!(
                "unknown transaction type '{}'",
                other
            ))),
        }
    }
}

/// Status of a local payment transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    PaymentFailure,
    Error,
    Canceled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::PaymentFailure => "PAYMENT_FAILURE",
            TransactionStatus::Error => "ERROR",
            TransactionStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "SUCCESS" => Ok(TransactionStatus::Success),
            "PAYMENT_FAILURE" => Ok(TransactionStatus::PaymentFailure),
            "ERROR" => Ok(TransactionStatus::Error),
            "CANCELED" => Ok(TransactionStatus::Canceled),
            other => Err(AppError::validation(format!(
                "unknown transaction status '{}'",
                other
            ))),
        }
    }
}

/// One gateway-facing operation attempt, as persisted by the response store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Option<Decimal>,
    /// Absent for operations that carry no amount (e.g. void)
    pub currency: Option<String>,
    /// Gateway correlation reference; may be shared with other rows
    pub psp_reference: Option<String>,
    pub status: TransactionStatus,
    /// Raw gateway response payload
    pub additional_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub tenant_id: Uuid,
}

/// Input for `ResponseStore::record_response`
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransactionResponse {
    pub account_id: Uuid,
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub psp_reference: Option<String>,
    pub status: TransactionStatus,
    pub additional_data: Option<serde_json::Value>,
    pub tenant_id: Uuid,
}

/// Audit row for one inbound gateway notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct NotificationRecord {
    pub id: Uuid,
    pub account_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub success: bool,
    pub event_code: String,
    pub merchant_account_code: String,
    pub merchant_reference: Option<String>,
    pub original_reference: Option<String>,
    pub reason: Option<String>,
    pub psp_reference: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub additional_data: Option<serde_json::Value>,
    pub tenant_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Input for `ResponseStore::record_notification`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewNotification {
    pub account_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub success: bool,
    pub event_code: String,
    pub merchant_account_code: String,
    pub merchant_reference: Option<String>,
    pub original_reference: Option<String>,
    pub reason: Option<String>,
    pub psp_reference: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub additional_data: Option<serde_json::Value>,
    pub tenant_id: Option<Uuid>,
}

/// Result of a gateway-facing operation, handed back to the billing platform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentTransactionInfo {
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub status: TransactionStatus,
    pub gateway_reference: Option<String>,
    pub gateway_result_code: Option<String>,
    pub gateway_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Payment request sent to the gateway for authorize, purchase and credit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPaymentRequest {
    pub merchant_account: String,
    /// Merchant reference; the local transaction id
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    /// Gateway-specific payment method data, built by the field mappers
    pub payment_method: serde_json::Value,
    pub shopper_reference: Option<String>,
    pub recurring: bool,
    pub capture_immediately: bool,
}

/// Modification of an existing gateway payment (capture, refund, cancel)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationRequest {
    pub merchant_account: String,
    pub original_reference: String,
    pub reference: String,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
}

/// Structured gateway response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub psp_reference: Option<String>,
    pub result_code: String,
    pub refusal_reason: Option<String>,
    pub raw: serde_json::Value,
}

/// Number of decimal places of a currency's minor unit (ISO 4217)
pub fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

/// Converts a gateway minor-unit value to a decimal amount
pub fn from_minor_units(value: i64, currency: &str) -> Decimal {
    Decimal::new(value, currency_exponent(currency))
}

/// Converts a decimal amount to gateway minor units, rounding half away from zero
pub fn to_minor_units(amount: Decimal, currency: &str) -> Result<i64, AppError> {
    let scaled = amount * Decimal::from(10_i64.pow(currency_exponent(currency)));
    scaled
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .mantissa()
        .try_into()
        .map_err(|_| AppError::validation(format!("amount {} {} out of range", amount, currency)))
}
