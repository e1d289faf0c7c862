//! Lifecycle integration tests.
//!
//! Tests cover: disbursement creation and idempotency, the success path
//! (debit, notification, audit trail), provider failures and retry
//! escalation, duplicate provider references, insufficient funding,
//! booking failures after a transfer, and operator retry.

mod common;

use chrono::Duration;
use common::{beneficiary, build, build_with, disburse, seed_loan, ScriptedProvider, FUNDING};
use disburse_core::{
    clock::Clock,
    error::PayError,
    model::{Channel, PaymentRecord, PaymentStatus, RecordKind, TransactionStatus},
    processor::{DisburseRequest, PaymentRequest, ProcessOutcome},
    provider::{ProviderError, ProviderStatus},
};

// ─────────────────────────────────────────────────────────────────────────────
// Creation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn disburse_creates_initiated_record_on_first_rail() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 250_000.0);

    assert_eq!(record.status, PaymentStatus::Initiated);
    assert_eq!(record.kind, RecordKind::Disbursement);
    assert_eq!(record.channel, Channel::Imps);
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.loan_id.as_deref(), Some("LOAN-1"));

    let loan = rig.store.get_loan("LOAN-1").unwrap();
    assert_eq!(loan.beneficiary_id.as_deref(), Some(record.beneficiary_id.as_str()));
    assert_eq!(rig.store.loan_count().unwrap(), 1);
}

#[test]
fn second_disburse_returns_existing_record() {
    let rig = build(1_000_000.0);
    let first = disburse(&rig, "LOAN-1", 5_000.0);

    let again = rig
        .processor
        .disburse(&DisburseRequest {
            loan_id: "LOAN-1".into(),
            amount: 5_000.0,
            beneficiary: None,
        })
        .unwrap();

    assert!(!again.created);
    assert_eq!(again.record.record_id, first.record_id);
    assert!(again.message.contains("already exists"), "{}", again.message);
    assert_eq!(rig.store.records_for_loan("LOAN-1").unwrap().len(), 1);
}

#[test]
fn disburse_validation_errors_are_synchronous() {
    let rig = build(1_000_000.0);
    seed_loan(&rig, "LOAN-1", 5_000.0);

    let request = |loan_id: &str, amount: f64| DisburseRequest {
        loan_id: loan_id.into(),
        amount,
        beneficiary: Some(beneficiary("001122334455")),
    };

    for (req, why) in [
        (request("LOAN-404", 5_000.0), "unknown loan"),
        (request("LOAN-1", 4_000.0), "amount mismatch"),
        (request("LOAN-1", 0.0), "zero amount"),
        (request("", 5_000.0), "missing loan id"),
    ] {
        let err = rig.processor.disburse(&req).unwrap_err();
        assert!(matches!(err, PayError::Validation(_)), "{why}: {err}");
    }

    let no_beneficiary = DisburseRequest {
        loan_id: "LOAN-1".into(),
        amount: 5_000.0,
        beneficiary: None,
    };
    assert!(matches!(
        rig.processor.disburse(&no_beneficiary),
        Err(PayError::Validation(_))
    ));
    assert!(rig.store.records_for_loan("LOAN-1").unwrap().is_empty());
}

#[test]
fn beneficiary_is_reused_by_natural_key() {
    let rig = build(1_000_000.0);
    let a = disburse(&rig, "LOAN-A", 1_000.0);
    let b = disburse(&rig, "LOAN-B", 2_000.0);
    assert_eq!(a.beneficiary_id, b.beneficiary_id);
}

#[test]
fn create_payment_is_idempotent_per_key() {
    let rig = build(1_000_000.0);
    let request = PaymentRequest {
        amount: 750.0,
        funding_account_id: None,
        beneficiary: beneficiary("998877665544"),
        idempotency_key: Some("order-77".into()),
    };

    let first = rig.processor.create_payment(&request).unwrap();
    let second = rig.processor.create_payment(&request).unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.record.record_id, second.record.record_id);
    assert_eq!(first.record.kind, RecordKind::Payment);
    assert_eq!(first.record.funding_account_id, FUNDING);
}

#[test]
fn create_payment_requires_beneficiary_fields() {
    let rig = build(1_000_000.0);
    let mut details = beneficiary("998877665544");
    details.ifsc = "  ".into();
    let err = rig
        .processor
        .create_payment(&PaymentRequest {
            amount: 750.0,
            funding_account_id: None,
            beneficiary: details,
            idempotency_key: None,
        })
        .unwrap_err();
    assert!(matches!(err, PayError::Validation(_)), "{err}");
}

#[test]
fn create_payment_rejects_unknown_funding_account() {
    let rig = build(1_000_000.0);
    let err = rig
        .processor
        .create_payment(&PaymentRequest {
            amount: 750.0,
            funding_account_id: Some("ACC-NOPE".into()),
            beneficiary: beneficiary("998877665544"),
            idempotency_key: None,
        })
        .unwrap_err();

    assert!(matches!(err, PayError::Validation(_)), "{err}");
    assert_eq!(rig.store.record_count(PaymentStatus::Initiated).unwrap(), 0);
    assert_eq!(rig.provider.calls(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Success path
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn successful_attempt_debits_amount_plus_fee_and_notifies() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 250_000.0);

    let outcome = rig.processor.process(&record).unwrap();
    let ProcessOutcome::Settled { txn_id, utr, balance } = outcome.clone() else {
        panic!("expected settlement, got {outcome:?}");
    };

    // IMPS fee is 5.
    assert_eq!(balance, 1_000_000.0 - 250_005.0);
    assert_eq!(rig.store.account_balance(FUNDING).unwrap(), balance);

    let stored = rig.store.get_record(&record.record_id).unwrap();
    assert_eq!(stored.status, PaymentStatus::Success);
    assert_eq!(stored.last_error, None);

    let txn = rig.store.get_sub_transaction(&txn_id).unwrap();
    assert_eq!(txn.status, TransactionStatus::Success);
    assert_eq!(txn.utr.as_deref(), Some(utr.as_str()));
    assert_eq!(txn.settled_on, Some(rig.clock.now().date_naive()));

    assert_eq!(rig.notifier.sent(), vec![txn_id]);
    assert_eq!(rig.provider.calls(), 1);
}

#[test]
fn success_path_leaves_an_audit_trail() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 5_000.0);
    rig.processor.process(&record).unwrap();

    let types: Vec<String> = rig
        .store
        .events_for_record(&record.record_id)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        ["record_created", "record_claimed", "attempt_started", "record_settled"]
    );
}

#[test]
fn processing_and_settled_records_are_not_touched() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 5_000.0);

    let in_flight = PaymentRecord {
        status: PaymentStatus::Processing,
        ..record.clone()
    };
    assert_eq!(rig.processor.process(&in_flight).unwrap(), ProcessOutcome::Skipped);

    let settled = PaymentRecord {
        status: PaymentStatus::Success,
        ..record
    };
    assert_eq!(rig.processor.process(&settled).unwrap(), ProcessOutcome::Skipped);

    assert_eq!(rig.provider.calls(), 0);
}

#[test]
fn stale_copy_loses_the_claim() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 5_000.0);

    assert!(matches!(
        rig.processor.process(&record).unwrap(),
        ProcessOutcome::Settled { .. }
    ));
    assert_eq!(rig.processor.process(&record).unwrap(), ProcessOutcome::LostClaim);
    assert_eq!(rig.provider.calls(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures and retries
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn transient_error_suspends_and_escalates_rail() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 50_000.0);
    rig.provider.reject_next("Gateway timeout");

    let outcome = rig.processor.process(&record).unwrap();
    assert!(matches!(outcome, ProcessOutcome::Suspended { retry_count: 1, .. }));

    let suspended = rig.store.get_record(&record.record_id).unwrap();
    assert_eq!(suspended.status, PaymentStatus::Suspended);
    assert_eq!(suspended.channel, Channel::Upi);
    assert_eq!(suspended.last_error.as_deref(), Some("Gateway timeout"));

    // backoff(1) = 60s; exactly 60s is too early.
    rig.clock.advance(Duration::seconds(60));
    assert!(!rig.processor.should_process(&suspended));
    assert_eq!(rig.processor.process(&suspended).unwrap(), ProcessOutcome::Skipped);

    rig.clock.advance(Duration::seconds(1));
    assert!(matches!(
        rig.processor.process(&suspended).unwrap(),
        ProcessOutcome::Settled { .. }
    ));
    let settled = rig.store.get_record(&record.record_id).unwrap();
    assert_eq!(settled.status, PaymentStatus::Success);
    assert_eq!(settled.channel, Channel::Neft);
    assert_eq!(settled.retry_count, 1);
    assert_eq!(rig.store.sub_transactions_for_record(&record.record_id).unwrap().len(), 2);
}

#[test]
fn permanent_error_fails_immediately() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 5_000.0);
    rig.provider.reject_next("Invalid IFSC code");

    let outcome = rig.processor.process(&record).unwrap();
    assert!(matches!(outcome, ProcessOutcome::Failed { retry_count: 1, .. }));

    let failed = rig.store.get_record(&record.record_id).unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    let txns = rig.store.sub_transactions_for_record(&record.record_id).unwrap();
    assert_eq!(txns[0].status, TransactionStatus::Failed);
    assert_eq!(txns[0].error.as_deref(), Some("Invalid IFSC code"));
}

#[test]
fn retries_are_exhausted_after_max_attempts() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 5_000.0);
    for _ in 0..6 {
        rig.provider.reject_next("network unreachable");
    }

    for expected in 1..=5 {
        let outcome = rig.processor.process_by_id(&record.record_id).unwrap();
        assert!(
            matches!(outcome, ProcessOutcome::Suspended { retry_count, .. } if retry_count == expected),
            "attempt {expected}: {outcome:?}"
        );
        rig.clock.advance(Duration::minutes(31));
    }

    let outcome = rig.processor.process_by_id(&record.record_id).unwrap();
    assert!(matches!(outcome, ProcessOutcome::Failed { retry_count: 5, .. }), "{outcome:?}");
    assert_eq!(rig.provider.calls(), 6);
}

#[test]
fn duplicate_reference_with_prior_success_settles() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 5_000.0);
    rig.provider
        .fail_next(ProviderError::DuplicateReference("ignored".into()));
    rig.provider.set_prior(ProviderStatus::Success);

    let outcome = rig.processor.process(&record).unwrap();
    let ProcessOutcome::Settled { utr, .. } = outcome.clone() else {
        panic!("expected settlement, got {outcome:?}");
    };
    assert_eq!(utr, "UTR-PRIOR");
    assert_eq!(rig.store.account_balance(FUNDING).unwrap(), 1_000_000.0 - 5_000.0);
}

#[test]
fn duplicate_reference_with_prior_failure_does_not_settle() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 5_000.0);
    rig.provider
        .fail_next(ProviderError::DuplicateReference("ignored".into()));
    rig.provider.set_prior(ProviderStatus::Failed);

    let outcome = rig.processor.process(&record).unwrap();
    assert!(matches!(outcome, ProcessOutcome::Failed { .. }), "{outcome:?}");
    assert_eq!(rig.store.account_balance(FUNDING).unwrap(), 1_000_000.0);
}

#[test]
fn insufficient_funding_fails_record_and_keeps_balance() {
    let rig = build(1_000.0);
    let record = disburse(&rig, "LOAN-1", 5_000.0);

    let outcome = rig.processor.process(&record).unwrap();
    assert!(matches!(outcome, ProcessOutcome::Failed { retry_count: 0, .. }), "{outcome:?}");

    assert_eq!(rig.store.account_balance(FUNDING).unwrap(), 1_000.0);
    let failed = rig.store.get_record(&record.record_id).unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert!(failed
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("Insufficient balance")));
    assert!(rig.notifier.sent().is_empty());
}

/// A record whose funding account vanished after creation. The account id
/// reads like a transient gateway error on purpose.
fn unfunded_payment(rig: &common::Rig) -> PaymentRecord {
    let template = disburse(rig, "LOAN-1", 5_000.0);
    let record = PaymentRecord {
        record_id: "PAY-UNFUNDED".into(),
        kind: RecordKind::Payment,
        loan_id: None,
        funding_account_id: "ACC-GATEWAY-TIMEOUT".into(),
        ..template
    };
    rig.store.insert_record(&record).unwrap();
    record
}

#[test]
fn booking_failure_after_transfer_is_never_retried() {
    let rig = build(1_000_000.0);
    let record = unfunded_payment(&rig);

    let err = rig.processor.process(&record).unwrap_err();
    assert!(matches!(err, PayError::NotFound { .. }), "{err}");

    let failed = rig.store.get_record(&record.record_id).unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.retry_count, 0);

    for _ in 0..3 {
        rig.clock.advance(Duration::minutes(31));
        let current = rig.store.get_record(&record.record_id).unwrap();
        assert_eq!(rig.processor.process(&current).unwrap(), ProcessOutcome::Skipped);
    }
    assert_eq!(rig.provider.calls(), 1);
}

#[test]
fn booking_failure_keeps_the_provider_reference() {
    let rig = build(1_000_000.0);
    let record = unfunded_payment(&rig);
    rig.processor.process(&record).unwrap_err();

    let txns = rig
        .store
        .sub_transactions_for_record(&record.record_id)
        .unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].status, TransactionStatus::Failed);
    assert!(txns[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("not booked")));
    assert_eq!(rig.store.account_balance(FUNDING).unwrap(), 1_000_000.0);
    assert!(rig.notifier.sent().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Operator retry
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn operator_retry_resets_failed_record() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 5_000.0);
    rig.provider.reject_next("beneficiary account closed");
    rig.processor.process(&record).unwrap();

    let reset = rig.processor.retry(&record.record_id).unwrap();
    assert_eq!(reset.status, PaymentStatus::Initiated);
    assert_eq!(reset.retry_count, 1);
    assert_eq!(reset.last_error, None);

    assert!(matches!(
        rig.processor.process(&reset).unwrap(),
        ProcessOutcome::Settled { .. }
    ));
}

#[test]
fn operator_retry_refuses_settled_record() {
    let rig = build(1_000_000.0);
    let record = disburse(&rig, "LOAN-1", 5_000.0);
    rig.processor.process(&record).unwrap();

    let err = rig.processor.retry(&record.record_id).unwrap_err();
    assert!(matches!(err, PayError::InvalidTransition { .. }), "{err}");
}

#[test]
fn unknown_record_is_not_found() {
    let rig = build_with(1_000.0, ScriptedProvider::new());
    assert!(matches!(
        rig.processor.retry("DSB-missing"),
        Err(PayError::NotFound { .. })
    ));
}
