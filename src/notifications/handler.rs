//! Notification handling
//!
//! Every delivery ends in an acknowledgement. Each item goes through
//! verification, matching, status resolution and application, and always
//! leaves one audit row behind. Failures are logged and reported as item
//! outcomes; nothing is propagated to the caller.

use crate::billing::{BillingPlatformRef, NewChargeback, StatusChange};
use crate::error::AppError;
use crate::notifications::item::{
    parse_notification, Acknowledgement, EventCode, NotificationItem,
};
use crate::notifications::matcher::{MatchOutcome, MatchedTransaction, TransactionMatcher};
use crate::notifications::resolver::{Resolution, StatusResolver, Transition, TransitionTarget};
use crate::payments::traits::{ResponseStoreRef, SignerRef};
use crate::payments::types::{NewNotification, TransactionStatus};
use crate::tenant::{TenantConfig, TenantRegistry};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const UNPARSEABLE_EVENT: &str = "UNPARSEABLE";
const MAX_AUDITED_BODY: usize = 4096;

/// What happened to one notification item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// A status change was requested from the billing platform
    Applied {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
    /// The transaction already had the target status
    AlreadyApplied {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
    Informational,
    Ignored { reason: String },
    Unmatched,
    /// Signature verification failed
    Rejected,
    Failed { reason: String },
    /// The item could not be parsed
    Malformed,
}

impl ItemOutcome {
    fn transaction_id(&self) -> Option<Uuid> {
        match self {
            ItemOutcome::Applied { transaction_id, .. }
            | ItemOutcome::AlreadyApplied { transaction_id, .. } => Some(*transaction_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationReport {
    pub acknowledgement: Acknowledgement,
    pub outcomes: Vec<ItemOutcome>,
}

/// Failure while applying a resolved transition
enum ApplyError {
    /// The billing platform refused the change
    Rejected(AppError),
    /// The change was made on the billing platform but not recorded locally
    Persistence(AppError),
}

pub struct NotificationHandler {
    store: ResponseStoreRef,
    billing: BillingPlatformRef,
    signer: SignerRef,
    tenants: Arc<TenantRegistry>,
    matcher: TransactionMatcher,
}

impl NotificationHandler {
    pub fn new(
        store: ResponseStoreRef,
        billing: BillingPlatformRef,
        signer: SignerRef,
        tenants: Arc<TenantRegistry>,
    ) -> Self {
        let matcher = TransactionMatcher::new(store.clone(), billing.clone());
        Self {
            store,
            billing,
            signer,
            tenants,
            matcher,
        }
    }

    pub async fn handle(&self, body: &[u8]) -> Acknowledgement {
        self.process(body).await.acknowledgement
    }

    /// Handle a delivery and report what happened to each item
    pub async fn process(&self, body: &[u8]) -> NotificationReport {
        let batch = match parse_notification(body) {
            Ok(batch) => batch,
            Err(e) => {
                error!("Discarding unparseable notification: {}", e);
                self.record(Self::unparseable_audit(body, &e.to_string()))
                    .await;
                return NotificationReport {
                    acknowledgement: Acknowledgement,
                    outcomes: vec![ItemOutcome::Malformed],
                };
            }
        };

        debug!(
            "Received {} notification item(s), live={}",
            batch.items.len() + batch.malformed.len(),
            batch.live
        );

        let mut outcomes = Vec::with_capacity(batch.items.len() + batch.malformed.len());
        for problem in &batch.malformed {
            error!("Discarding malformed notification item: {}", problem);
            self.record(Self::unparseable_audit(body, problem)).await;
            outcomes.push(ItemOutcome::Malformed);
        }
        for item in &batch.items {
            outcomes.push(self.process_item(item).await);
        }

        NotificationReport {
            acknowledgement: Acknowledgement,
            outcomes,
        }
    }

    async fn process_item(&self, item: &NotificationItem) -> ItemOutcome {
        let mut audit = item.audit_record();

        let account_tenant = self
            .tenants
            .for_merchant_account(&item.merchant_account_code)
            .cloned();
        audit.tenant_id = account_tenant.as_ref().map(|t| t.tenant_id);

        if let Some(tenant) = &account_tenant {
            if !self.verify(item, tenant) {
                self.record(audit).await;
                return ItemOutcome::Rejected;
            }
        }

        let matched = match self.matcher.resolve(item, account_tenant.as_ref()).await {
            Ok(MatchOutcome::Matched(matched)) => matched,
            Ok(MatchOutcome::Unmatched) => {
                if account_tenant.is_none() {
                    warn!(
                        "No tenant configured for merchant account {}",
                        item.merchant_account_code
                    );
                }
                self.record(audit).await;
                return ItemOutcome::Unmatched;
            }
            Err(e) => {
                error!(
                    "Response lookup failed for {} {:?}: {}",
                    item.event_code, item.psp_reference, e
                );
                self.record(audit).await;
                return ItemOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        // the signing key is tenant-scoped; without a merchant-account mapping
        // the matched row decides the tenant
        let tenant = match account_tenant {
            Some(tenant) => tenant,
            None => match self.tenants.for_tenant(matched.response.tenant_id) {
                Some(tenant) => {
                    let tenant = tenant.clone();
                    if !self.verify(item, &tenant) {
                        audit.tenant_id = Some(tenant.tenant_id);
                        self.record(audit).await;
                        return ItemOutcome::Rejected;
                    }
                    tenant
                }
                None => {
                    warn!(
                        "No configuration for tenant {}, applying defaults",
                        matched.response.tenant_id
                    );
                    TenantConfig::unconfigured(matched.response.tenant_id)
                }
            },
        };

        audit.tenant_id = Some(tenant.tenant_id);
        audit.account_id = Some(matched.payment.account_id);
        audit.payment_id = Some(matched.payment.id);
        audit.transaction_id = Some(matched.transaction.id);

        let resolution = StatusResolver::compute(
            matched.transaction.transaction_type,
            matched.transaction.status,
            &item.event_code,
            item.success,
            matched.payment_method_family.as_ref(),
            &tenant,
        );

        let outcome = match resolution {
            Resolution::Transition(transition) => {
                match self.apply(item, &matched, transition, &tenant).await {
                    Ok(outcome) => outcome,
                    Err(ApplyError::Rejected(e)) => {
                        warn!(
                            "Billing platform rejected {} for payment {}: {}",
                            item.event_code, matched.payment.id, e
                        );
                        audit.account_id = None;
                        audit.payment_id = None;
                        audit.transaction_id = None;
                        ItemOutcome::Unmatched
                    }
                    Err(ApplyError::Persistence(e)) => {
                        error!(
                            "Status for payment {} transaction {} applied on the billing platform \
                             but not stored locally, manual reconciliation required: {}",
                            matched.payment.id, matched.transaction.id, e
                        );
                        ItemOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            Resolution::Informational => {
                if item.event_code == EventCode::ChargebackReversed {
                    warn!(
                        "Chargeback reversal on payment {} whose payment method fails on chargeback; \
                         nothing to reverse",
                        matched.payment.id
                    );
                }
                ItemOutcome::Informational
            }
            Resolution::Unrecognized => {
                info!(
                    "Unrecognized event code {} for payment {}",
                    item.event_code, matched.payment.id
                );
                ItemOutcome::Ignored {
                    reason: format!("unrecognized event code {}", item.event_code),
                }
            }
            Resolution::Superseded { current } => {
                info!(
                    "Ignoring stale {} for transaction {} of payment {}, already {}",
                    item.event_code, matched.transaction.id, matched.payment.id, current
                );
                ItemOutcome::Ignored {
                    reason: format!("{} superseded, transaction already {}", item.event_code, current),
                }
            }
            Resolution::Inapplicable { local_type } => {
                warn!(
                    "{} does not apply to {} transaction {}",
                    item.event_code, local_type, matched.transaction.id
                );
                ItemOutcome::Ignored {
                    reason: format!("{} does not apply to {}", item.event_code, local_type),
                }
            }
        };

        if let Some(transaction_id) = outcome.transaction_id() {
            audit.transaction_id = Some(transaction_id);
        }
        self.record(audit).await;
        outcome
    }

    fn verify(&self, item: &NotificationItem, tenant: &TenantConfig) -> bool {
        let Some(secret) = tenant.hmac_secret.as_deref().filter(|_| tenant.verifies_signatures())
        else {
            return true;
        };

        let verified = item.signature().is_some_and(|signature| {
            self.signer
                .verify(tenant.hmac_algorithm, &item.signing_payload(), signature, secret)
        });
        if !verified {
            warn!(
                "Rejected {} notification {:?} for merchant account {}: signature verification failed",
                item.event_code, item.psp_reference, item.merchant_account_code
            );
        }
        verified
    }

    async fn apply(
        &self,
        item: &NotificationItem,
        matched: &MatchedTransaction,
        transition: Transition,
        tenant: &TenantConfig,
    ) -> Result<ItemOutcome, ApplyError> {
        match transition.target {
            TransitionTarget::Matched => {
                self.apply_to_matched(item, matched, transition.status, tenant)
                    .await
            }
            TransitionTarget::NewChargeback => self.create_chargeback(item, matched, tenant).await,
            TransitionTarget::ExistingChargeback => {
                self.reverse_chargeback(item, matched, transition.status, tenant)
                    .await
            }
        }
    }

    async fn apply_to_matched(
        &self,
        item: &NotificationItem,
        matched: &MatchedTransaction,
        status: TransactionStatus,
        tenant: &TenantConfig,
    ) -> Result<ItemOutcome, ApplyError> {
        let transaction = &matched.transaction;
        // a chargeback's own reference belongs to the chargeback, not to the
        // payment it fails
        let reference = match item.event_code {
            EventCode::Chargeback => item.original_reference.as_deref(),
            _ => item.psp_reference.as_deref(),
        };

        let already_applied = transaction.status == status;
        if already_applied {
            debug!(
                "Transaction {} already {}, skipping billing update",
                transaction.id, status
            );
        } else {
            let change = StatusChange {
                payment_id: matched.payment.id,
                transaction_id: transaction.id,
                status,
                gateway_reference: reference.map(str::to_string),
                additional_data: item.additional_data_value(),
            };
            self.billing
                .update_transaction_status(change, tenant.tenant_id)
                .await
                .map_err(ApplyError::Rejected)?;
        }

        let changed = self
            .store
            .update_status(
                matched.response.payment_id,
                matched.response.transaction_id,
                reference,
                status,
                matched.response.tenant_id,
            )
            .await
            .map_err(ApplyError::Persistence)?;
        if !changed {
            debug!("Response row for {} already up to date", transaction.id);
        }

        if already_applied {
            Ok(ItemOutcome::AlreadyApplied {
                transaction_id: transaction.id,
                status,
            })
        } else {
            info!(
                "{} moved {} transaction {} of payment {} from {} to {}",
                item.event_code,
                transaction.transaction_type,
                transaction.id,
                matched.payment.id,
                transaction.status,
                status
            );
            Ok(ItemOutcome::Applied {
                transaction_id: transaction.id,
                status,
            })
        }
    }

    async fn create_chargeback(
        &self,
        item: &NotificationItem,
        matched: &MatchedTransaction,
        tenant: &TenantConfig,
    ) -> Result<ItemOutcome, ApplyError> {
        let Some(reference) = item.psp_reference.as_deref() else {
            warn!(
                "Chargeback for payment {} carries no reference, not recorded",
                matched.payment.id
            );
            return Ok(ItemOutcome::Ignored {
                reason: "chargeback without gateway reference".to_string(),
            });
        };

        let external_key = format!("{}-{}", matched.payment.id, reference);
        if let Some(existing) = matched.payment.transaction_by_key(&external_key) {
            debug!(
                "Chargeback {} already recorded as transaction {}",
                external_key, existing.id
            );
            return Ok(ItemOutcome::AlreadyApplied {
                transaction_id: existing.id,
                status: existing.status,
            });
        }

        let chargeback = NewChargeback {
            external_key,
            amount: item.amount_decimal(),
            currency: item.currency(),
            gateway_reference: Some(reference.to_string()),
            additional_data: item.additional_data_value(),
        };
        let created = self
            .billing
            .create_chargeback(matched.payment.id, chargeback, tenant.tenant_id)
            .await
            .map_err(ApplyError::Rejected)?;

        info!(
            "Chargeback {} recorded as transaction {} on payment {}",
            reference, created.id, matched.payment.id
        );
        Ok(ItemOutcome::Applied {
            transaction_id: created.id,
            status: created.status,
        })
    }

    async fn reverse_chargeback(
        &self,
        item: &NotificationItem,
        matched: &MatchedTransaction,
        status: TransactionStatus,
        tenant: &TenantConfig,
    ) -> Result<ItemOutcome, ApplyError> {
        let by_reference = item.psp_reference.as_deref().and_then(|reference| {
            matched
                .payment
                .chargebacks()
                .filter(|cb| cb.gateway_reference.as_deref() == Some(reference))
                .max_by_key(|cb| cb.created_at)
        });
        // without a reference match, only an unambiguous chargeback is reversed
        let only_chargeback = || {
            let mut chargebacks = matched.payment.chargebacks();
            match (chargebacks.next(), chargebacks.next()) {
                (Some(only), None) => Some(only),
                _ => None,
            }
        };
        let Some(chargeback) = by_reference.or_else(only_chargeback) else {
            let recorded = matched.payment.chargebacks().count();
            warn!(
                "Chargeback reversal {:?} for payment {} matches none of its {} chargeback(s)",
                item.psp_reference, matched.payment.id, recorded
            );
            let reason = if recorded == 0 {
                "no chargeback to reverse".to_string()
            } else {
                format!("reversal matches none of {} chargebacks", recorded)
            };
            return Ok(ItemOutcome::Ignored { reason });
        };

        if chargeback.status == status {
            debug!("Chargeback {} already {}", chargeback.id, status);
            return Ok(ItemOutcome::AlreadyApplied {
                transaction_id: chargeback.id,
                status,
            });
        }

        let change = StatusChange {
            payment_id: matched.payment.id,
            transaction_id: chargeback.id,
            status,
            gateway_reference: chargeback.gateway_reference.clone(),
            additional_data: item.additional_data_value(),
        };
        self.billing
            .update_transaction_status(change, tenant.tenant_id)
            .await
            .map_err(ApplyError::Rejected)?;

        info!(
            "Chargeback {} on payment {} reversed",
            chargeback.id, matched.payment.id
        );
        Ok(ItemOutcome::Applied {
            transaction_id: chargeback.id,
            status,
        })
    }

    async fn record(&self, audit: NewNotification) {
        let event_code = audit.event_code.clone();
        if let Err(e) = self.store.record_notification(audit).await {
            error!("Failed to record {} notification: {}", event_code, e);
        }
    }

    fn unparseable_audit(body: &[u8], problem: &str) -> NewNotification {
        let text = String::from_utf8_lossy(body);
        let excerpt: String = text.chars().take(MAX_AUDITED_BODY).collect();
        NewNotification {
            event_code: UNPARSEABLE_EVENT.to_string(),
            reason: Some(problem.to_string()),
            additional_data: Some(serde_json::json!({ "body": excerpt })),
            ..Default::default()
        }
    }
}
