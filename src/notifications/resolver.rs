//! Status resolution
//!
//! Pure mapping from (local transaction, event code, success flag,
//! payment-method family, tenant configuration) to the transition a
//! notification asks for. Nothing here performs I/O.
//!
//! `PAYMENT_FAILURE` set by a correction (failed capture or refund, reversed
//! refund, chargeback on a failure family) is terminal: a late or redelivered
//! success event never moves the transaction back.

use crate::billing::PaymentMethodFamily;
use crate::notifications::item::EventCode;
use crate::payments::types::{TransactionStatus, TransactionType};
use crate::tenant::TenantConfig;

/// Which local transaction a transition applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionTarget {
    /// The transaction the matcher found
    Matched,
    /// A chargeback transaction to be created on the matched payment
    NewChargeback,
    /// The chargeback already recorded on the matched payment
    ExistingChargeback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub target: TransitionTarget,
    pub status: TransactionStatus,
}

impl Transition {
    fn matched(status: TransactionStatus) -> Self {
        Self {
            target: TransitionTarget::Matched,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Transition(Transition),
    /// Recorded only
    Informational,
    /// Event code this service does not know
    Unrecognized,
    /// The event cannot apply to a transaction of this type
    Inapplicable { local_type: TransactionType },
    /// The transaction has already failed; a success event is stale
    Superseded { current: TransactionStatus },
}

pub struct StatusResolver;

impl StatusResolver {
    pub fn compute(
        local_type: TransactionType,
        current: TransactionStatus,
        event_code: &EventCode,
        success: bool,
        family: Option<&PaymentMethodFamily>,
        tenant: &TenantConfig,
    ) -> Resolution {
        use TransactionType::*;

        let outcome = if success {
            TransactionStatus::Success
        } else {
            TransactionStatus::PaymentFailure
        };
        let chargeback_is_failure =
            family.is_some_and(|family| tenant.treats_chargeback_as_failure(family));

        let applies = |types: &[TransactionType]| types.contains(&local_type);
        let transition = |ok: bool, target: Transition| {
            if !ok {
                Resolution::Inapplicable { local_type }
            } else if target.target == TransitionTarget::Matched
                && target.status == TransactionStatus::Success
                && current == TransactionStatus::PaymentFailure
            {
                Resolution::Superseded { current }
            } else {
                Resolution::Transition(target)
            }
        };

        match event_code {
            EventCode::Authorisation => {
                transition(applies(&[Authorize, Purchase]), Transition::matched(outcome))
            }
            EventCode::Capture => {
                transition(applies(&[Capture, Purchase]), Transition::matched(outcome))
            }
            // the event code itself encodes the failure
            EventCode::CaptureFailed => transition(
                applies(&[Capture, Purchase]),
                Transition::matched(TransactionStatus::PaymentFailure),
            ),
            EventCode::Cancellation => transition(applies(&[Void]), Transition::matched(outcome)),
            EventCode::Refund => transition(applies(&[Refund, Credit]), Transition::matched(outcome)),
            EventCode::RefundFailed | EventCode::RefundedReversed => transition(
                applies(&[Refund, Credit]),
                Transition::matched(TransactionStatus::PaymentFailure),
            ),
            EventCode::Chargeback if chargeback_is_failure => transition(
                applies(&[Authorize, Purchase]),
                Transition::matched(TransactionStatus::PaymentFailure),
            ),
            EventCode::Chargeback => transition(
                applies(&[Authorize, Purchase]),
                Transition {
                    target: TransitionTarget::NewChargeback,
                    status: TransactionStatus::Success,
                },
            ),
            // no chargeback transaction exists for these families
            EventCode::ChargebackReversed if chargeback_is_failure => Resolution::Informational,
            EventCode::ChargebackReversed => transition(
                applies(&[Authorize, Purchase]),
                Transition {
                    target: TransitionTarget::ExistingChargeback,
                    status: TransactionStatus::PaymentFailure,
                },
            ),
            EventCode::NotificationOfChargeback
            | EventCode::RequestForInformation
            | EventCode::ReportAvailable
            | EventCode::NotificationTest => Resolution::Informational,
            EventCode::Other(_) => Resolution::Unrecognized,
        }
    }
}
