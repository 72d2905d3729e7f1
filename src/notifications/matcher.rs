//! Transaction matching
//!
//! Finds the local transaction a notification describes. The gateway reuses
//! references across related operations (a capture and a later chargeback
//! can carry the same reference), so matching by "last row with this
//! reference" is wrong. Candidates are always filtered by the operation
//! types that can originate the event, in this order:
//!
//! 1. rows whose own reference equals the event's original reference
//! 2. rows whose own reference equals the event's reference
//! 3. the row whose local transaction id equals the merchant reference
//!
//! Among the candidates of the first step that yields any, an exact
//! operation-type match beats a merely plausible one, then the most recent
//! row wins.

use crate::billing::{BillingPlatformRef, Payment, PaymentMethodFamily, PaymentTransaction};
use crate::error::AppResult;
use crate::notifications::item::{EventCode, NotificationItem};
use crate::payments::traits::ResponseStoreRef;
use crate::payments::types::{TransactionResponse, TransactionType};
use crate::tenant::TenantConfig;
use tracing::{debug, warn};
use uuid::Uuid;

/// Operation types that can be the subject of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidatePolicy {
    pub exact: &'static [TransactionType],
    pub plausible: &'static [TransactionType],
}

impl CandidatePolicy {
    pub fn for_event(event_code: &EventCode) -> Self {
        use TransactionType::*;

        let policy = |exact: &'static [TransactionType], plausible: &'static [TransactionType]| {
            Self { exact, plausible }
        };

        match event_code {
            EventCode::Authorisation => policy(&[Authorize], &[Purchase]),
            EventCode::Capture | EventCode::CaptureFailed => policy(&[Capture], &[Purchase]),
            EventCode::Cancellation => policy(&[Void], &[]),
            EventCode::Refund | EventCode::RefundFailed | EventCode::RefundedReversed => {
                policy(&[Refund], &[Credit])
            }
            // chargebacks hang off the payment, never off a capture
            EventCode::Chargeback
            | EventCode::ChargebackReversed
            | EventCode::NotificationOfChargeback
            | EventCode::RequestForInformation => policy(&[Authorize, Purchase], &[]),
            EventCode::ReportAvailable | EventCode::NotificationTest | EventCode::Other(_) => {
                policy(&[], &[])
            }
        }
    }

    /// `Some(2)` for an exact match, `Some(1)` for a plausible one
    pub fn rank(&self, transaction_type: TransactionType) -> Option<u8> {
        if self.exact.contains(&transaction_type) {
            Some(2)
        } else if self.plausible.contains(&transaction_type) {
            Some(1)
        } else {
            None
        }
    }

    /// Events with no transaction linkage at all
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.plausible.is_empty()
    }
}

/// Best candidate among rows ordered oldest first.
///
/// Ties on rank and timestamp go to the row inserted last.
pub fn select_candidate(
    rows: Vec<TransactionResponse>,
    policy: &CandidatePolicy,
    tenant_id: Option<Uuid>,
) -> Option<TransactionResponse> {
    rows.into_iter()
        .filter(|row| tenant_id.map_or(true, |tenant_id| row.tenant_id == tenant_id))
        .filter_map(|row| policy.rank(row.transaction_type).map(|rank| (rank, row)))
        .max_by(|(a_rank, a), (b_rank, b)| {
            a_rank
                .cmp(b_rank)
                .then_with(|| a.created_at.cmp(&b.created_at))
        })
        .map(|(_, row)| row)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    ParentReference,
    OwnReference,
    MerchantReference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchedTransaction {
    /// Response row the event was matched to
    pub response: TransactionResponse,
    /// Payment as currently known to the billing platform
    pub payment: Payment,
    pub transaction: PaymentTransaction,
    pub payment_method_family: Option<PaymentMethodFamily>,
    pub matched_by: MatchSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(Box<MatchedTransaction>),
    Unmatched,
}

pub struct TransactionMatcher {
    store: ResponseStoreRef,
    billing: BillingPlatformRef,
}

impl TransactionMatcher {
    pub fn new(store: ResponseStoreRef, billing: BillingPlatformRef) -> Self {
        Self { store, billing }
    }

    /// Match a notification to a local transaction.
    ///
    /// `tenant` narrows candidates when the merchant account already
    /// identified the tenant. Store failures are returned; billing-platform
    /// failures are logged and reported as no match.
    pub async fn resolve(
        &self,
        item: &NotificationItem,
        tenant: Option<&TenantConfig>,
    ) -> AppResult<MatchOutcome> {
        let policy = CandidatePolicy::for_event(&item.event_code);
        if policy.is_empty() {
            debug!("{} carries no transaction linkage", item.event_code);
            return Ok(MatchOutcome::Unmatched);
        }

        let Some((response, matched_by)) = self
            .find_response(item, &policy, tenant.map(|t| t.tenant_id))
            .await?
        else {
            debug!(
                "No local transaction for {} (psp {:?}, original {:?})",
                item.event_code, item.psp_reference, item.original_reference
            );
            return Ok(MatchOutcome::Unmatched);
        };

        debug!(
            "Matched {} to {} transaction {} via {:?}",
            item.event_code, response.transaction_type, response.transaction_id, matched_by
        );

        let payment = match self
            .billing
            .get_payment(response.payment_id, response.tenant_id)
            .await
        {
            Ok(payment) => payment,
            Err(e) => {
                warn!(
                    "Billing platform could not load payment {}: {}",
                    response.payment_id, e
                );
                return Ok(MatchOutcome::Unmatched);
            }
        };

        let Some(transaction) = payment.transaction(response.transaction_id).cloned() else {
            warn!(
                "Payment {} has no transaction {}",
                response.payment_id, response.transaction_id
            );
            return Ok(MatchOutcome::Unmatched);
        };

        let payment_method_family = match self
            .billing
            .get_payment_method(payment.payment_method_id, response.tenant_id)
            .await
        {
            Ok(method) => Some(method.family),
            Err(e) => {
                debug!(
                    "Payment method {} unavailable ({}), using notification hint",
                    payment.payment_method_id, e
                );
                item.payment_method.as_deref().map(PaymentMethodFamily::new)
            }
        };

        Ok(MatchOutcome::Matched(Box::new(MatchedTransaction {
            response,
            payment,
            transaction,
            payment_method_family,
            matched_by,
        })))
    }

    async fn find_response(
        &self,
        item: &NotificationItem,
        policy: &CandidatePolicy,
        tenant_id: Option<Uuid>,
    ) -> AppResult<Option<(TransactionResponse, MatchSource)>> {
        if let Some(parent) = item.original_reference.as_deref() {
            let rows = self.store.find_by_correlation_ref(parent).await?;
            if let Some(row) = select_candidate(rows, policy, tenant_id) {
                return Ok(Some((row, MatchSource::ParentReference)));
            }
        }

        if let Some(own) = item.psp_reference.as_deref() {
            if item.original_reference.as_deref() != Some(own) {
                let rows = self.store.find_by_correlation_ref(own).await?;
                if let Some(row) = select_candidate(rows, policy, tenant_id) {
                    return Ok(Some((row, MatchSource::OwnReference)));
                }
            }
        }

        let local_id = item
            .merchant_reference
            .as_deref()
            .and_then(|reference| Uuid::parse_str(reference.trim()).ok());
        if let Some(transaction_id) = local_id {
            let row = self.store.find_by_local_transaction_id(transaction_id).await?;
            if let Some(row) = row.and_then(|row| select_candidate(vec![row], policy, tenant_id)) {
                return Ok(Some((row, MatchSource::MerchantReference)));
            }
        }

        Ok(None)
    }
}
