//! REST adapter for the billing platform

use crate::billing::{
    BillingPlatform, NewChargeback, Payment, PaymentMethod, PaymentTransaction, StatusChange,
};
use crate::error::{AppError, AppErrorKind, AppResult, ExternalError};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub timeout_secs: u64,
}

impl BillingConfig {
    pub fn from_env() -> AppResult<Self> {
        let base_url = std::env::var("BILLING_BASE_URL")
            .map_err(|_| AppError::configuration("BILLING_BASE_URL environment variable is required"))?;
        let api_key = std::env::var("BILLING_API_KEY")
            .map_err(|_| AppError::configuration("BILLING_API_KEY environment variable is required"))?;
        let api_secret = std::env::var("BILLING_API_SECRET").unwrap_or_default();
        let timeout_secs = std::env::var("BILLING_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            timeout_secs,
        })
    }
}

pub struct HttpBillingPlatform {
    config: BillingConfig,
    client: Client,
}

impl HttpBillingPlatform {
    pub fn new(config: BillingConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("adyen-billing-bridge/1.0")
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        tenant_id: Uuid,
        body: Option<serde_json::Value>,
    ) -> AppResult<Option<T>> {
        let url = format!("{}{}", self.config.base_url, path);
        debug!("Billing platform request: {} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.config.api_key)
            .header("X-Api-Secret", &self.config.api_secret)
            .header("X-Tenant-Id", tenant_id.to_string());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            AppError::new(AppErrorKind::External(ExternalError::BillingPlatform {
                message: format!("request to {} failed: {}", path, e),
                is_retryable: true,
            }))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::not_found("BillingResource", path));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Billing platform rejected {}: HTTP {}: {}", path, status, text);
            return Err(AppError::new(AppErrorKind::External(
                ExternalError::BillingPlatform {
                    message: format!("HTTP {}: {}", status, text),
                    is_retryable: status.is_server_error(),
                },
            )));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let parsed = response.json::<T>().await.map_err(|e| {
            AppError::billing(format!("invalid response from {}: {}", path, e))
        })?;
        Ok(Some(parsed))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        tenant_id: Uuid,
        body: Option<serde_json::Value>,
    ) -> AppResult<T> {
        self.send(method, path, tenant_id, body)
            .await?
            .ok_or_else(|| AppError::billing(format!("empty response from {}", path)))
    }
}

#[async_trait]
impl BillingPlatform for HttpBillingPlatform {
    async fn get_payment(&self, payment_id: Uuid, tenant_id: Uuid) -> AppResult<Payment> {
        self.fetch(Method::GET, &format!("/payments/{}", payment_id), tenant_id, None)
            .await
    }

    async fn update_transaction_status(
        &self,
        change: StatusChange,
        tenant_id: Uuid,
    ) -> AppResult<()> {
        let path = format!(
            "/payments/{}/transactions/{}",
            change.payment_id, change.transaction_id
        );
        let body = serde_json::to_value(&change)?;
        self.send::<serde_json::Value>(Method::PUT, &path, tenant_id, Some(body))
            .await?;
        Ok(())
    }

    async fn get_payment_method(
        &self,
        payment_method_id: Uuid,
        tenant_id: Uuid,
    ) -> AppResult<PaymentMethod> {
        self.fetch(
            Method::GET,
            &format!("/paymentMethods/{}", payment_method_id),
            tenant_id,
            None,
        )
        .await
    }

    async fn create_chargeback(
        &self,
        payment_id: Uuid,
        chargeback: NewChargeback,
        tenant_id: Uuid,
    ) -> AppResult<PaymentTransaction> {
        let body = serde_json::to_value(&chargeback)?;
        self.fetch(
            Method::POST,
            &format!("/payments/{}/chargebacks", payment_id),
            tenant_id,
            Some(body),
        )
        .await
    }
}
