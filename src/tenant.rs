//! Per-tenant configuration
//!
//! Each tenant owns one or more gateway merchant accounts, optionally a
//! notification HMAC key, and the list of payment-method families whose
//! chargebacks fail the original payment instead of creating a chargeback
//! transaction. The registry is built once at startup and handed to the
//! notification handler.

use crate::billing::PaymentMethodFamily;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HmacAlgorithm {
    #[default]
    #[serde(rename = "HmacSHA256")]
    HmacSha256,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: Uuid,
    #[serde(default)]
    pub merchant_accounts: Vec<String>,
    /// Hex-encoded HMAC key; `None` disables signature verification
    #[serde(default)]
    pub hmac_secret: Option<String>,
    #[serde(default)]
    pub hmac_algorithm: HmacAlgorithm,
    #[serde(default)]
    pub chargeback_as_failure_families: Vec<PaymentMethodFamily>,
}

impl TenantConfig {
    /// Configuration for a tenant with nothing configured
    pub fn unconfigured(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            merchant_accounts: Vec::new(),
            hmac_secret: None,
            hmac_algorithm: HmacAlgorithm::default(),
            chargeback_as_failure_families: Vec::new(),
        }
    }

    pub fn treats_chargeback_as_failure(&self, family: &PaymentMethodFamily) -> bool {
        self.chargeback_as_failure_families
            .iter()
            .any(|configured| configured == family)
    }

    pub fn verifies_signatures(&self) -> bool {
        self.hmac_secret
            .as_deref()
            .is_some_and(|secret| !secret.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct TenantFile {
    #[serde(default)]
    tenants: Vec<TenantConfig>,
}

/// Lookup of tenant configuration by tenant id or merchant account
#[derive(Debug, Clone, Default)]
pub struct TenantRegistry {
    tenants: HashMap<Uuid, TenantConfig>,
    by_merchant_account: HashMap<String, Uuid>,
}

impl TenantRegistry {
    pub fn new(tenants: Vec<TenantConfig>) -> AppResult<Self> {
        let mut registry = Self::default();

        for tenant in tenants {
            for account in &tenant.merchant_accounts {
                if let Some(owner) = registry.by_merchant_account.get(account) {
                    if *owner != tenant.tenant_id {
                        return Err(AppError::configuration(format!(
                            "merchant account '{}' is claimed by tenants {} and {}",
                            account, owner, tenant.tenant_id
                        )));
                    }
                }
                registry
                    .by_merchant_account
                    .insert(account.clone(), tenant.tenant_id);
            }

            if registry.tenants.contains_key(&tenant.tenant_id) {
                return Err(AppError::configuration(format!(
                    "tenant {} is configured twice",
                    tenant.tenant_id
                )));
            }
            registry.tenants.insert(tenant.tenant_id, tenant);
        }

        Ok(registry)
    }

    /// Load tenants from a TOML/YAML/JSON file, with `BRIDGE_` environment overrides
    pub fn load(path: &str) -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("BRIDGE").separator("__"))
            .build()
            .map_err(|e| AppError::configuration(format!("cannot read {}: {}", path, e)))?;

        Self::from_settings(settings)
    }

    pub fn from_toml(contents: &str) -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()
            .map_err(|e| AppError::configuration(e.to_string()))?;

        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> AppResult<Self> {
        let file: TenantFile = settings
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("invalid tenant configuration: {}", e)))?;

        let registry = Self::new(file.tenants)?;
        for tenant in registry.tenants.values() {
            if tenant.verifies_signatures() {
                info!(
                    "Tenant {} loaded: {} merchant account(s), signature verification on",
                    tenant.tenant_id,
                    tenant.merchant_accounts.len()
                );
            } else {
                warn!(
                    "Tenant {} has no HMAC key; notifications will not be verified",
                    tenant.tenant_id
                );
            }
        }
        Ok(registry)
    }

    pub fn for_merchant_account(&self, merchant_account: &str) -> Option<&TenantConfig> {
        self.by_merchant_account
            .get(merchant_account)
            .and_then(|tenant_id| self.tenants.get(tenant_id))
    }

    pub fn for_tenant(&self, tenant_id: Uuid) -> Option<&TenantConfig> {
        self.tenants.get(&tenant_id)
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
