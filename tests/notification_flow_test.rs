//! End-to-end notification handling against in-memory collaborators

mod common;

use adyen_billing_bridge::notifications::ItemOutcome;
use adyen_billing_bridge::payments::types::{TransactionStatus, TransactionType};
use common::{envelope, item, Harness, HarnessOptions};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_redelivery_applies_once_and_audits_every_delivery() {
    let harness = Harness::new().await;
    let auth = harness.add_transaction(TransactionType::Authorize, Some("A")).await;

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(harness.deliver(item("AUTHORISATION", "A", None, true)).await);
    }

    assert_eq!(
        outcomes[0],
        ItemOutcome::Applied {
            transaction_id: auth,
            status: TransactionStatus::Success
        }
    );
    assert!(outcomes[1..]
        .iter()
        .all(|o| matches!(o, ItemOutcome::AlreadyApplied { .. })));
    assert_eq!(harness.billing.transitions().await, vec![(auth, TransactionStatus::Success)]);
    assert_eq!(harness.billing.update_calls(), 1);
    assert_eq!(harness.store.notifications().await.len(), 3);
    assert_eq!(harness.response_row(auth).await.status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_chargeback_on_reused_reference_never_touches_capture() {
    let harness = Harness::new().await;
    let auth = harness.add_transaction(TransactionType::Authorize, Some("R")).await;
    let capture = harness.add_transaction(TransactionType::Capture, Some("R")).await;

    let outcome = harness.deliver(item("CHARGEBACK", "CB-1", Some("R"), true)).await;

    let ItemOutcome::Applied { transaction_id, status } = outcome else {
        panic!("expected a chargeback, got {:?}", outcome);
    };
    assert_ne!(transaction_id, capture);
    assert_ne!(transaction_id, auth);
    assert_eq!(status, TransactionStatus::Success);

    let payment = harness.payment().await;
    assert_eq!(payment.chargebacks().count(), 1);
    assert_eq!(harness.status(capture).await, TransactionStatus::Pending);
    assert_eq!(harness.status(auth).await, TransactionStatus::Pending);

    let audit = harness.store.notifications().await;
    assert_eq!(audit[0].transaction_id, Some(transaction_id));
}

#[tokio::test]
async fn test_chargeback_with_only_reused_own_reference_skips_capture() {
    let harness = Harness::new().await;
    let auth = harness.add_transaction(TransactionType::Authorize, Some("R")).await;
    let capture = harness.add_transaction(TransactionType::Capture, Some("R")).await;

    let outcome = harness.deliver(item("CHARGEBACK", "R", None, true)).await;

    assert!(matches!(outcome, ItemOutcome::Applied { .. }));
    assert_eq!(harness.status(capture).await, TransactionStatus::Pending);
    assert_eq!(harness.status(auth).await, TransactionStatus::Pending);
    assert_eq!(harness.payment().await.chargebacks().count(), 1);
}

#[tokio::test]
async fn test_chargeback_fails_original_for_listed_family() {
    let harness = Harness::with_options(HarnessOptions {
        family: "SepaDirectDebit",
        ..Default::default()
    })
    .await;
    let purchase = harness.add_transaction(TransactionType::Purchase, Some("A")).await;
    let transactions_before = harness.payment().await.transactions.len();

    let outcome = harness.deliver(item("CHARGEBACK", "CB-1", Some("A"), true)).await;

    assert_eq!(
        outcome,
        ItemOutcome::Applied {
            transaction_id: purchase,
            status: TransactionStatus::PaymentFailure
        }
    );
    let payment = harness.payment().await;
    assert_eq!(payment.transactions.len(), transactions_before);
    assert_eq!(payment.chargebacks().count(), 0);
    // the purchase keeps its own reference
    assert_eq!(harness.response_row(purchase).await.psp_reference.as_deref(), Some("A"));
}

#[tokio::test]
async fn test_chargeback_for_unlisted_family_creates_exactly_one_transaction() {
    let harness = Harness::new().await;
    harness.add_transaction(TransactionType::Purchase, Some("A")).await;

    let first = harness.deliver(item("CHARGEBACK", "CB-1", Some("A"), true)).await;
    let second = harness.deliver(item("CHARGEBACK", "CB-1", Some("A"), true)).await;

    let ItemOutcome::Applied { transaction_id, .. } = first else {
        panic!("expected a chargeback, got {:?}", first);
    };
    assert_eq!(
        second,
        ItemOutcome::AlreadyApplied {
            transaction_id,
            status: TransactionStatus::Success
        }
    );
    assert_eq!(harness.payment().await.chargebacks().count(), 1);
}

#[tokio::test]
async fn test_refund_reversal_overwrites_same_refund() {
    let harness = Harness::new().await;
    harness.add_transaction(TransactionType::Purchase, Some("A")).await;
    let refund = harness.add_transaction(TransactionType::Refund, Some("RF")).await;
    let transactions_before = harness.payment().await.transactions.len();

    harness.deliver(item("REFUND", "RF", Some("A"), true)).await;
    assert_eq!(harness.status(refund).await, TransactionStatus::Success);

    let outcome = harness.deliver(item("REFUNDED_REVERSED", "RF", Some("A"), true)).await;

    assert_eq!(
        outcome,
        ItemOutcome::Applied {
            transaction_id: refund,
            status: TransactionStatus::PaymentFailure
        }
    );
    assert_eq!(harness.status(refund).await, TransactionStatus::PaymentFailure);
    assert_eq!(harness.response_row(refund).await.status, TransactionStatus::PaymentFailure);
    assert_eq!(harness.payment().await.transactions.len(), transactions_before);
}

#[tokio::test]
async fn test_report_available_is_audited_without_updates() {
    let harness = Harness::new().await;
    harness.add_transaction(TransactionType::Authorize, Some("A")).await;

    let outcome = harness.deliver(item("REPORT_AVAILABLE", "A", None, true)).await;

    assert_eq!(outcome, ItemOutcome::Unmatched);
    let audit = harness.store.notifications().await;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].transaction_id, None);
    assert_eq!(audit[0].event_code, "REPORT_AVAILABLE");
    assert_eq!(harness.billing.update_calls(), 0);
}

#[tokio::test]
async fn test_authorise_capture_chargeback_lifecycle() {
    let harness = Harness::new().await;
    let auth = harness.add_transaction(TransactionType::Authorize, Some("A")).await;
    let capture = harness.add_transaction(TransactionType::Capture, Some("B")).await;

    harness.deliver(item("AUTHORISATION", "A", None, true)).await;
    assert_eq!(harness.status(auth).await, TransactionStatus::Success);

    harness.deliver(item("CAPTURE", "B", Some("A"), true)).await;
    assert_eq!(harness.status(capture).await, TransactionStatus::Success);
    assert_eq!(harness.status(auth).await, TransactionStatus::Success);

    let outcome = harness.deliver(item("CHARGEBACK", "B", Some("A"), true)).await;
    let ItemOutcome::Applied { transaction_id: chargeback, status } = outcome else {
        panic!("expected a chargeback, got {:?}", outcome);
    };
    assert_eq!(status, TransactionStatus::Success);
    assert_ne!(chargeback, capture);
    assert_eq!(harness.status(capture).await, TransactionStatus::Success);

    let reversal = harness.deliver(item("CHARGEBACK_REVERSED", "B", Some("A"), true)).await;
    assert_eq!(
        reversal,
        ItemOutcome::Applied {
            transaction_id: chargeback,
            status: TransactionStatus::PaymentFailure
        }
    );
    assert_eq!(harness.status(capture).await, TransactionStatus::Success);
    assert_eq!(harness.store.notifications().await.len(), 4);
}

#[tokio::test]
async fn test_failed_authorisation() {
    let harness = Harness::new().await;
    let auth = harness.add_transaction(TransactionType::Authorize, Some("A")).await;

    harness.deliver(item("AUTHORISATION", "A", None, false)).await;

    assert_eq!(harness.status(auth).await, TransactionStatus::PaymentFailure);
}

#[tokio::test]
async fn test_merchant_reference_attaches_gateway_reference() {
    let harness = Harness::new().await;
    let auth = harness.add_transaction(TransactionType::Authorize, None).await;

    let mut notification = item("AUTHORISATION", "A", None, true);
    notification["merchantReference"] = json!(auth.to_string());
    let outcome = harness.deliver(notification).await;

    assert!(matches!(outcome, ItemOutcome::Applied { .. }));
    let row = harness.response_row(auth).await;
    assert_eq!(row.psp_reference.as_deref(), Some("A"));
    assert_eq!(row.status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_unsigned_notification_is_rejected() {
    let harness = Harness::with_options(HarnessOptions {
        hmac: true,
        ..Default::default()
    })
    .await;
    let auth = harness.add_transaction(TransactionType::Authorize, Some("A")).await;

    let mut forged = item("AUTHORISATION", "A", None, true);
    forged["additionalData"] = json!({ "hmacSignature": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=" });
    let report = harness.handler.process(&envelope(vec![forged])).await;

    assert_eq!(report.outcomes, vec![ItemOutcome::Rejected]);
    assert_eq!(harness.status(auth).await, TransactionStatus::Pending);
    assert_eq!(harness.billing.update_calls(), 0);
    assert_eq!(harness.store.notifications().await.len(), 1);

    // a correctly signed delivery goes through
    let outcome = harness.deliver(item("AUTHORISATION", "A", None, true)).await;
    assert!(matches!(outcome, ItemOutcome::Applied { .. }));
}

#[tokio::test]
async fn test_persistence_failure_still_acknowledges() {
    let harness = Harness::with_options(HarnessOptions {
        failing_updates: true,
        ..Default::default()
    })
    .await;
    harness.add_transaction(TransactionType::Authorize, Some("A")).await;

    let outcome = harness.deliver(item("AUTHORISATION", "A", None, true)).await;

    assert!(matches!(outcome, ItemOutcome::Failed { .. }));
    assert_eq!(harness.store.notifications().await.len(), 1);
}

#[tokio::test]
async fn test_transaction_unknown_to_billing_is_unmatched() {
    let harness = Harness::new().await;
    harness.add_transaction(TransactionType::Authorize, Some("A")).await;
    // a response row whose transaction the billing platform never heard of
    let mut orphan = harness.store.responses().await[0].clone();
    orphan.transaction_id = uuid::Uuid::new_v4();
    orphan.psp_reference = Some("Z".to_string());
    harness.store.insert_response(orphan).await;

    let outcome = harness.deliver(item("AUTHORISATION", "Z", None, true)).await;

    assert_eq!(outcome, ItemOutcome::Unmatched);
    assert_eq!(harness.store.notifications().await[0].transaction_id, None);
    assert_eq!(harness.billing.update_calls(), 0);
}

#[tokio::test]
async fn test_unknown_event_code_is_ignored() {
    let harness = Harness::new().await;
    harness.add_transaction(TransactionType::Authorize, Some("A")).await;

    let outcome = harness.deliver(item("OFFER_CLOSED", "A", None, true)).await;

    assert_eq!(outcome, ItemOutcome::Unmatched);
    assert_eq!(harness.billing.update_calls(), 0);
    assert_eq!(harness.store.notifications().await[0].event_code, "OFFER_CLOSED");
}

#[tokio::test]
async fn test_informational_event_keeps_linkage() {
    let harness = Harness::new().await;
    let auth = harness.add_transaction(TransactionType::Authorize, Some("A")).await;

    let outcome = harness
        .deliver(item("NOTIFICATION_OF_CHARGEBACK", "NC-1", Some("A"), true))
        .await;

    assert_eq!(outcome, ItemOutcome::Informational);
    assert_eq!(harness.billing.update_calls(), 0);
    assert_eq!(harness.store.notifications().await[0].transaction_id, Some(auth));
}

#[tokio::test]
async fn test_malformed_item_does_not_block_batch() {
    let harness = Harness::new().await;
    let auth = harness.add_transaction(TransactionType::Authorize, Some("A")).await;

    let body = envelope(vec![
        json!({ "eventCode": "AUTHORISATION" }),
        item("AUTHORISATION", "A", None, true),
    ]);
    let report = harness.handler.process(&body).await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0], ItemOutcome::Malformed);
    assert!(matches!(report.outcomes[1], ItemOutcome::Applied { .. }));
    assert_eq!(harness.status(auth).await, TransactionStatus::Success);
    assert_eq!(harness.store.notifications().await.len(), 2);
}

#[tokio::test]
async fn test_redelivered_refund_after_reversal_stays_failed() {
    let harness = Harness::new().await;
    harness.add_transaction(TransactionType::Purchase, Some("A")).await;
    let refund = harness.add_transaction(TransactionType::Refund, Some("RF")).await;

    harness.deliver(item("REFUND", "RF", Some("A"), true)).await;
    harness.deliver(item("REFUNDED_REVERSED", "RF", Some("A"), true)).await;
    let stale = harness.deliver(item("REFUND", "RF", Some("A"), true)).await;

    assert!(matches!(stale, ItemOutcome::Ignored { .. }));
    assert_eq!(harness.status(refund).await, TransactionStatus::PaymentFailure);
    assert_eq!(harness.response_row(refund).await.status, TransactionStatus::PaymentFailure);
    assert_eq!(
        harness.billing.transitions().await,
        vec![
            (refund, TransactionStatus::Success),
            (refund, TransactionStatus::PaymentFailure)
        ]
    );
    // the stale delivery is still audited against the refund
    let audit = harness.store.notifications().await;
    assert_eq!(audit.len(), 3);
    assert_eq!(audit[2].transaction_id, Some(refund));
}

#[tokio::test]
async fn test_redelivered_authorisation_after_failure_chargeback_stays_failed() {
    let harness = Harness::with_options(HarnessOptions {
        family: "sepadirectdebit",
        ..Default::default()
    })
    .await;
    let purchase = harness.add_transaction(TransactionType::Purchase, Some("A")).await;

    harness.deliver(item("AUTHORISATION", "A", None, true)).await;
    harness.deliver(item("CHARGEBACK", "CB-1", Some("A"), true)).await;
    assert_eq!(harness.status(purchase).await, TransactionStatus::PaymentFailure);

    let stale = harness.deliver(item("AUTHORISATION", "A", None, true)).await;

    assert!(matches!(stale, ItemOutcome::Ignored { .. }));
    assert_eq!(harness.status(purchase).await, TransactionStatus::PaymentFailure);
    assert_eq!(harness.billing.update_calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_deliveries_apply_once() {
    let harness = Arc::new(Harness::new().await);
    let auth = harness.add_transaction(TransactionType::Authorize, Some("A")).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let authorisation = harness.clone();
        tasks.push(tokio::spawn(async move {
            authorisation.deliver(item("AUTHORISATION", "A", None, true)).await
        }));
        let chargeback = harness.clone();
        tasks.push(tokio::spawn(async move {
            chargeback.deliver(item("CHARGEBACK", "CB-1", Some("A"), true)).await
        }));
    }
    for task in tasks {
        let outcome = task.await.unwrap();
        assert!(
            matches!(outcome, ItemOutcome::Applied { .. } | ItemOutcome::AlreadyApplied { .. }),
            "unexpected outcome {:?}",
            outcome
        );
    }

    let payment = harness.payment().await;
    let chargebacks: Vec<_> = payment.chargebacks().collect();
    assert_eq!(chargebacks.len(), 1);
    assert_eq!(harness.status(auth).await, TransactionStatus::Success);

    let transitions = harness.billing.transitions().await;
    assert_eq!(transitions.iter().filter(|(id, _)| *id == auth).count(), 1);
    assert_eq!(
        transitions.iter().filter(|(id, _)| *id == chargebacks[0].id).count(),
        1
    );
    assert_eq!(harness.store.notifications().await.len(), 16);
}

#[tokio::test]
async fn test_ambiguous_chargeback_reversal_is_ignored() {
    let harness = Harness::new().await;
    harness.add_transaction(TransactionType::Purchase, Some("A")).await;
    harness.deliver(item("CHARGEBACK", "CB-1", Some("A"), true)).await;
    harness.deliver(item("CHARGEBACK", "CB-2", Some("A"), true)).await;
    let calls_before = harness.billing.update_calls();

    let unknown = harness
        .deliver(item("CHARGEBACK_REVERSED", "CB-X", Some("A"), true))
        .await;

    assert!(matches!(unknown, ItemOutcome::Ignored { .. }));
    assert_eq!(harness.billing.update_calls(), calls_before);
    assert!(harness
        .payment()
        .await
        .chargebacks()
        .all(|cb| cb.status == TransactionStatus::Success));

    let known = harness
        .deliver(item("CHARGEBACK_REVERSED", "CB-2", Some("A"), true))
        .await;
    let ItemOutcome::Applied { transaction_id, .. } = known else {
        panic!("expected the second chargeback reversed, got {:?}", known);
    };
    let payment = harness.payment().await;
    let reversed = payment.transaction(transaction_id).unwrap();
    assert_eq!(reversed.gateway_reference.as_deref(), Some("CB-2"));
    assert_eq!(reversed.status, TransactionStatus::PaymentFailure);
}

#[tokio::test]
async fn test_single_chargeback_is_reversed_without_reference_match() {
    let harness = Harness::new().await;
    harness.add_transaction(TransactionType::Purchase, Some("A")).await;
    let created = harness.deliver(item("CHARGEBACK", "CB-1", Some("A"), true)).await;
    let ItemOutcome::Applied { transaction_id: chargeback, .. } = created else {
        panic!("expected a chargeback, got {:?}", created);
    };

    let reversal = harness
        .deliver(item("CHARGEBACK_REVERSED", "CB-9", Some("A"), true))
        .await;

    assert_eq!(
        reversal,
        ItemOutcome::Applied {
            transaction_id: chargeback,
            status: TransactionStatus::PaymentFailure
        }
    );
}
