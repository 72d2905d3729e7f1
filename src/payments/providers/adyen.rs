//! Adyen gateway provider
//!
//! HTTP client for the Checkout API (payments and modifications) and the
//! HMAC-SHA256 verifier for standard notifications.

use crate::error::{AppError, AppErrorKind, AppResult, ExternalError};
use crate::payments::traits::{GatewayClient, Signer};
use crate::payments::types::{
    to_minor_units, GatewayPaymentRequest, GatewayResponse, ModificationRequest,
};
use crate::tenant::HmacAlgorithm;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, warn};

const PROVIDER: &str = "Adyen";
const IDEMPOTENCY_KEY: &str = "Idempotency-Key";
const MAX_RETRIES_LIMIT: u32 = 10;
const MAX_BACKOFF_SECS: u64 = 60;

/// Adyen provider configuration
#[derive(Debug, Clone)]
pub struct AdyenConfig {
    pub api_key: String,
    /// Checkout API base URL, including the version segment
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for AdyenConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://checkout-test.adyen.com/v71".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl AdyenConfig {
    pub fn from_env() -> AppResult<Self> {
        let api_key = std::env::var("ADYEN_API_KEY")
            .map_err(|_| AppError::configuration("ADYEN_API_KEY environment variable is required"))?;

        let base_url = std::env::var("ADYEN_BASE_URL")
            .unwrap_or_else(|_| "https://checkout-test.adyen.com/v71".to_string());

        let timeout_secs = std::env::var("ADYEN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let max_retries = std::env::var("ADYEN_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(3)
            .min(MAX_RETRIES_LIMIT);

        Ok(Self {
            api_key,
            base_url,
            timeout_secs,
            max_retries,
        })
    }
}

pub struct AdyenClient {
    config: AdyenConfig,
    client: Client,
}

impl AdyenClient {
    pub fn new(config: AdyenConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn from_env() -> AppResult<Self> {
        Self::new(AdyenConfig::from_env()?)
    }

    fn provider_error(message: String, is_retryable: bool) -> AppError {
        AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
            provider: PROVIDER.to_string(),
            message,
            is_retryable,
        }))
    }

    /// Delay before retry number `attempt` (1-based), capped
    fn backoff(attempt: u32) -> Duration {
        let secs = 2_u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
    }

    /// Every attempt of one operation carries the same idempotency key
    fn request(
        &self,
        url: &str,
        body: &serde_json::Value,
        idempotency_key: &str,
    ) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("X-API-Key", &self.config.api_key)
            .header(IDEMPOTENCY_KEY, idempotency_key)
            .json(body)
    }

    /// POST to the Checkout API, retrying 429, 5xx and transport errors
    async fn post(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
        idempotency_key: &str,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}{}", self.config.base_url, endpoint);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = Self::backoff(attempt);
                warn!(
                    "Retrying {} after {} seconds (attempt {}): {}",
                    endpoint,
                    backoff.as_secs(),
                    attempt + 1,
                    last_error
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self.request(&url, body, idempotency_key).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            if status.is_success() {
                return serde_json::from_str(&text).map_err(|e| {
                    error!("Failed to parse Adyen response: {}", e);
                    Self::provider_error(format!("Invalid response format: {}", e), false)
                });
            }

            if status.as_u16() == 429 {
                last_error = "rate limited".to_string();
                if attempt == self.config.max_retries {
                    return Err(AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                        service: PROVIDER.to_string(),
                        retry_after: Some(60),
                    })));
                }
                continue;
            }

            if status.is_server_error() {
                last_error = format!("HTTP {}", status);
                continue;
            }

            let message = serde_json::from_str::<AdyenErrorResponse>(&text)
                .map(|e| format!("{} {}: {}", e.status, e.error_code, e.message))
                .unwrap_or_else(|_| format!("HTTP {}: {}", status, text));
            error!("Adyen API error on {}: {}", endpoint, message);
            return Err(Self::provider_error(message, false));
        }

        Err(Self::provider_error(
            format!(
                "Request failed after {} retries: {}",
                self.config.max_retries, last_error
            ),
            true,
        ))
    }

    fn payment_body(request: &GatewayPaymentRequest) -> AppResult<serde_json::Value> {
        let mut body = serde_json::json!({
            "merchantAccount": request.merchant_account,
            "reference": request.reference,
            "amount": {
                "value": to_minor_units(request.amount, &request.currency)?,
                "currency": request.currency,
            },
            "paymentMethod": request.payment_method,
        });

        if let Some(shopper_reference) = &request.shopper_reference {
            body["shopperReference"] = serde_json::Value::String(shopper_reference.clone());
        }
        if request.recurring {
            body["recurringProcessingModel"] = serde_json::json!("Subscription");
            body["shopperInteraction"] = serde_json::json!("ContAuth");
        }
        if request.capture_immediately {
            body["captureDelayHours"] = serde_json::json!(0);
        }
        Ok(body)
    }

    fn modification_body(request: &ModificationRequest) -> AppResult<serde_json::Value> {
        let mut body = serde_json::json!({
            "merchantAccount": request.merchant_account,
            "reference": request.reference,
        });
        if let (Some(amount), Some(currency)) = (request.amount, &request.currency) {
            body["amount"] = serde_json::json!({
                "value": to_minor_units(amount, currency)?,
                "currency": currency,
            });
        }
        Ok(body)
    }

    fn into_gateway_response(raw: serde_json::Value) -> GatewayResponse {
        let field = |name: &str| raw.get(name).and_then(|v| v.as_str()).map(str::to_string);
        // modifications answer with `status: received` instead of a result code
        let result_code = field("resultCode")
            .or_else(|| field("status"))
            .unwrap_or_else(|| "Unknown".to_string());

        GatewayResponse {
            psp_reference: field("pspReference"),
            result_code,
            refusal_reason: field("refusalReason"),
            raw,
        }
    }

    async fn modify(&self, action: &str, request: &ModificationRequest) -> AppResult<GatewayResponse> {
        info!(
            "Adyen {} for {} (original {})",
            action, request.reference, request.original_reference
        );
        let endpoint = format!("/payments/{}/{}", request.original_reference, action);
        let raw = self
            .post(&endpoint, &Self::modification_body(request)?, &request.reference)
            .await?;
        Ok(Self::into_gateway_response(raw))
    }
}

#[async_trait]
impl GatewayClient for AdyenClient {
    async fn authorize(&self, request: &GatewayPaymentRequest) -> AppResult<GatewayResponse> {
        info!(
            "Adyen payment {} {} for {}",
            request.amount, request.currency, request.reference
        );
        let raw = self
            .post("/payments", &Self::payment_body(request)?, &request.reference)
            .await?;
        Ok(Self::into_gateway_response(raw))
    }

    async fn capture(&self, request: &ModificationRequest) -> AppResult<GatewayResponse> {
        self.modify("captures", request).await
    }

    async fn refund(&self, request: &ModificationRequest) -> AppResult<GatewayResponse> {
        self.modify("refunds", request).await
    }

    async fn cancel(&self, request: &ModificationRequest) -> AppResult<GatewayResponse> {
        self.modify("cancels", request).await
    }

    async fn credit(&self, request: &GatewayPaymentRequest) -> AppResult<GatewayResponse> {
        info!(
            "Adyen credit {} {} for {}",
            request.amount, request.currency, request.reference
        );
        let raw = self
            .post("/refundWithData", &Self::payment_body(request)?, &request.reference)
            .await?;
        Ok(Self::into_gateway_response(raw))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdyenErrorResponse {
    status: i32,
    error_code: String,
    message: String,
}

/// HMAC verification of notification items
#[derive(Debug, Default, Clone, Copy)]
pub struct HmacSha256Signer;

impl HmacSha256Signer {
    pub fn sign(secret: &str, signing_payload: &str) -> Option<String> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let key = hex::decode(secret.trim()).ok()?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&key).ok()?;
        mac.update(signing_payload.as_bytes());
        Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl Signer for HmacSha256Signer {
    fn verify(
        &self,
        algorithm: HmacAlgorithm,
        signing_payload: &str,
        signature: &str,
        secret: &str,
    ) -> bool {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        match algorithm {
            HmacAlgorithm::HmacSha256 => {
                let Ok(key) = hex::decode(secret.trim()) else {
                    return false;
                };
                let Ok(provided) = base64::engine::general_purpose::STANDARD.decode(signature.trim())
                else {
                    return false;
                };
                let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(&key) else {
                    return false;
                };
                mac.update(signing_payload.as_bytes());
                // constant-time comparison
                mac.verify_slice(&provided).is_ok()
            }
        }
    }
}
