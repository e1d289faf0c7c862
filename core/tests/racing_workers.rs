//! Two workers racing for the same record.
//!
//! Only the worker that wins the conditional claim may reach the provider.

mod common;

use common::{build_with, disburse, ScriptedProvider, FUNDING};
use disburse_core::{model::PaymentStatus, processor::ProcessOutcome};
use std::{sync::Barrier, sync::Arc, thread, time::Duration};

#[test]
fn racing_workers_call_provider_once() {
    let rig = build_with(1_000_000.0, ScriptedProvider::with_delay(Duration::from_millis(50)));
    let record = disburse(&rig, "LOAN-1", 5_000.0);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let processor = rig.processor.clone();
            let record = record.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                processor.process(&record)
            })
        })
        .collect();
    let outcomes: Vec<ProcessOutcome> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    let settled = outcomes
        .iter()
        .filter(|o| matches!(o, ProcessOutcome::Settled { .. }))
        .count();
    let lost = outcomes
        .iter()
        .filter(|o| **o == ProcessOutcome::LostClaim)
        .count();
    assert_eq!((settled, lost), (1, 1), "{outcomes:?}");
    assert_eq!(rig.provider.calls(), 1);
    assert_eq!(rig.store.account_balance(FUNDING).unwrap(), 995_000.0);
    assert_eq!(
        rig.store.get_record(&record.record_id).unwrap().status,
        PaymentStatus::Success
    );
}

#[test]
fn many_workers_many_records_each_settles_once() {
    let rig = build_with(10_000_000.0, ScriptedProvider::with_delay(Duration::from_millis(2)));
    let records: Vec<_> = (0..10)
        .map(|i| disburse(&rig, &format!("LOAN-{i}"), 1_000.0))
        .collect();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let processor = rig.processor.clone();
            let records = records.clone();
            thread::spawn(move || {
                for record in &records {
                    processor.process(record).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(rig.provider.calls(), records.len());
    assert_eq!(rig.store.record_count(PaymentStatus::Success).unwrap(), 10);
    assert_eq!(rig.store.account_balance(FUNDING).unwrap(), 10_000_000.0 - 10_000.0);
}
