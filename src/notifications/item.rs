//! Inbound notification envelope
//!
//! The gateway posts a JSON batch:
//!
//! ```json
//! {"live": "false", "notificationItems": [{"NotificationRequestItem": {...}}]}
//! ```
//!
//! Items are parsed one by one so a single malformed item does not hide the
//! rest of the batch.

use crate::error::{AppError, AppResult};
use crate::payments::types::{from_minor_units, NewNotification};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Literal token the gateway expects back for every delivery
pub const ACCEPTED: &str = "[accepted]";

const SIGNATURE_KEY: &str = "hmacSignature";

/// Gateway event code. Unknown codes are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventCode {
    Authorisation,
    Capture,
    CaptureFailed,
    Cancellation,
    Refund,
    RefundFailed,
    RefundedReversed,
    Chargeback,
    ChargebackReversed,
    NotificationOfChargeback,
    RequestForInformation,
    ReportAvailable,
    NotificationTest,
    Other(String),
}

impl EventCode {
    pub fn as_str(&self) -> &str {
        match self {
            EventCode::Authorisation => "AUTHORISATION",
            EventCode::Capture => "CAPTURE",
            EventCode::CaptureFailed => "CAPTURE_FAILED",
            EventCode::Cancellation => "CANCELLATION",
            EventCode::Refund => "REFUND",
            EventCode::RefundFailed => "REFUND_FAILED",
            EventCode::RefundedReversed => "REFUNDED_REVERSED",
            EventCode::Chargeback => "CHARGEBACK",
            EventCode::ChargebackReversed => "CHARGEBACK_REVERSED",
            EventCode::NotificationOfChargeback => "NOTIFICATION_OF_CHARGEBACK",
            EventCode::RequestForInformation => "REQUEST_FOR_INFORMATION",
            EventCode::ReportAvailable => "REPORT_AVAILABLE",
            EventCode::NotificationTest => "NOTIFICATIONTEST",
            EventCode::Other(code) => code,
        }
    }

    /// Events that are recorded but never move a transaction
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            EventCode::NotificationOfChargeback
                | EventCode::RequestForInformation
                | EventCode::ReportAvailable
                | EventCode::NotificationTest
        )
    }
}

impl From<String> for EventCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "AUTHORISATION" => EventCode::Authorisation,
            "CAPTURE" => EventCode::Capture,
            "CAPTURE_FAILED" => EventCode::CaptureFailed,
            "CANCELLATION" => EventCode::Cancellation,
            "REFUND" => EventCode::Refund,
            "REFUND_FAILED" => EventCode::RefundFailed,
            "REFUNDED_REVERSED" => EventCode::RefundedReversed,
            "CHARGEBACK" => EventCode::Chargeback,
            "CHARGEBACK_REVERSED" => EventCode::ChargebackReversed,
            "NOTIFICATION_OF_CHARGEBACK" => EventCode::NotificationOfChargeback,
            "REQUEST_FOR_INFORMATION" => EventCode::RequestForInformation,
            "REPORT_AVAILABLE" => EventCode::ReportAvailable,
            "NOTIFICATIONTEST" => EventCode::NotificationTest,
            _ => EventCode::Other(code),
        }
    }
}

impl From<&str> for EventCode {
    fn from(code: &str) -> Self {
        EventCode::from(code.to_string())
    }
}

impl From<EventCode> for String {
    fn from(code: EventCode) -> Self {
        match code {
            EventCode::Other(code) => code,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAmount {
    /// Minor units
    pub value: i64,
    pub currency: String,
}

/// One `NotificationRequestItem`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub psp_reference: Option<String>,
    /// Reference of the operation this event is a child of
    #[serde(default, deserialize_with = "empty_as_none")]
    pub original_reference: Option<String>,
    pub merchant_account_code: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub merchant_reference: Option<String>,
    pub event_code: EventCode,
    #[serde(deserialize_with = "bool_or_string")]
    pub success: bool,
    #[serde(default)]
    pub amount: Option<NotificationAmount>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub reason: Option<String>,
    /// Payment-method family hint, e.g. `visa` or `sepadirectdebit`
    #[serde(default, deserialize_with = "empty_as_none")]
    pub payment_method: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub event_date: Option<String>,
    #[serde(default)]
    pub additional_data: Option<serde_json::Map<String, serde_json::Value>>,
}

impl NotificationItem {
    /// The string the gateway signs: eight fields joined by `:`, absent
    /// fields as empty strings
    pub fn signing_payload(&self) -> String {
        let (value, currency) = match &self.amount {
            Some(amount) => (amount.value.to_string(), amount.currency.as_str()),
            None => (String::new(), ""),
        };
        [
            self.psp_reference.as_deref().unwrap_or_default(),
            self.original_reference.as_deref().unwrap_or_default(),
            self.merchant_account_code.as_str(),
            self.merchant_reference.as_deref().unwrap_or_default(),
            value.as_str(),
            currency,
            self.event_code.as_str(),
            if self.success { "true" } else { "false" },
        ]
        .join(":")
    }

    pub fn signature(&self) -> Option<&str> {
        self.additional_data
            .as_ref()
            .and_then(|data| data.get(SIGNATURE_KEY))
            .and_then(|value| value.as_str())
            .filter(|signature| !signature.is_empty())
    }

    pub fn amount_decimal(&self) -> Option<Decimal> {
        self.amount
            .as_ref()
            .map(|amount| from_minor_units(amount.value, &amount.currency))
    }

    pub fn currency(&self) -> Option<String> {
        self.amount.as_ref().map(|amount| amount.currency.clone())
    }

    /// Additional data with the signature removed, for storage and forwarding
    pub fn additional_data_value(&self) -> Option<serde_json::Value> {
        self.additional_data.as_ref().map(|data| {
            let mut data = data.clone();
            data.remove(SIGNATURE_KEY);
            serde_json::Value::Object(data)
        })
    }

    /// Audit row for this item with no local linkage filled in
    pub fn audit_record(&self) -> NewNotification {
        NewNotification {
            success: self.success,
            event_code: self.event_code.to_string(),
            merchant_account_code: self.merchant_account_code.clone(),
            merchant_reference: self.merchant_reference.clone(),
            original_reference: self.original_reference.clone(),
            reason: self.reason.clone(),
            psp_reference: self.psp_reference.clone(),
            amount: self.amount_decimal(),
            currency: self.currency(),
            additional_data: self.additional_data_value(),
            ..Default::default()
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(flag) => Ok(flag),
        Flag::Text(text) if text.eq_ignore_ascii_case("true") => Ok(true),
        Flag::Text(text) if text.eq_ignore_ascii_case("false") => Ok(false),
        Flag::Text(text) => Err(serde::de::Error::custom(format!(
            "invalid success flag '{}'",
            text
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    live: Option<serde_json::Value>,
    notification_items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ItemWrapper {
    #[serde(rename = "NotificationRequestItem")]
    item: NotificationItem,
}

/// A parsed delivery
#[derive(Debug, Clone)]
pub struct NotificationBatch {
    pub live: bool,
    pub items: Vec<NotificationItem>,
    /// Parse errors for items that could not be read
    pub malformed: Vec<String>,
}

pub fn parse_notification(body: &[u8]) -> AppResult<NotificationBatch> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|e| AppError::validation(format!("malformed notification envelope: {}", e)))?;

    let live = match envelope.live {
        Some(serde_json::Value::Bool(live)) => live,
        Some(serde_json::Value::String(live)) => live.eq_ignore_ascii_case("true"),
        _ => false,
    };

    let mut items = Vec::with_capacity(envelope.notification_items.len());
    let mut malformed = Vec::new();
    for (index, raw) in envelope.notification_items.into_iter().enumerate() {
        // tolerate items sent without the wrapper object
        let parsed = if raw.get("NotificationRequestItem").is_some() {
            serde_json::from_value::<ItemWrapper>(raw).map(|wrapper| wrapper.item)
        } else {
            serde_json::from_value::<NotificationItem>(raw)
        };
        match parsed {
            Ok(item) => items.push(item),
            Err(e) => malformed.push(format!("item {}: {}", index, e)),
        }
    }

    Ok(NotificationBatch {
        live,
        items,
        malformed,
    })
}

/// Synchronous reply to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Acknowledgement;

impl Acknowledgement {
    pub fn as_str(&self) -> &'static str {
        ACCEPTED
    }
}

impl fmt::Display for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(ACCEPTED)
    }
}
