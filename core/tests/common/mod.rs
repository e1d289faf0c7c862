//! Shared fixtures: a scripted provider and a fully wired processor on a
//! manual clock.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use disburse_core::{
    clock::ManualClock,
    config::EngineConfig,
    ids::SequentialIdGenerator,
    model::{Account, Loan, PaymentRecord},
    notifier::RecordingNotifier,
    processor::{BeneficiaryDetails, DisburseRequest, PaymentProcessor},
    provider::{
        PaymentProvider, ProviderError, ProviderResponse, ProviderStatus, RailProviders,
        TransferRequest,
    },
    store::PayStore,
    types::Money,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

pub const FUNDING: &str = "ACC-FUNDING";

// ── Scripted provider ───────────────────────────────────────────────────────

/// Answers transfers from a queue of scripted errors; an empty queue
/// means success. Counts every transfer call.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ProviderError>>,
    seen: Mutex<HashMap<String, ProviderResponse>>,
    prior: Mutex<Option<ProviderStatus>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_next(&self, error: ProviderError) {
        self.script.lock().unwrap().push_back(error);
    }

    pub fn reject_next(&self, message: &str) {
        self.fail_next(ProviderError::Rejected(message.into()));
    }

    /// What `fetch` reports for a reference this provider never saw.
    pub fn set_prior(&self, status: ProviderStatus) {
        *self.prior.lock().unwrap() = Some(status);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PaymentProvider for ScriptedProvider {
    fn transfer(&self, request: &TransferRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }
        let response = ProviderResponse {
            reference_id: request.reference_id.clone(),
            utr: format!("UTR-{}", request.reference_id),
            amount: request.amount,
            channel: request.channel,
            status: ProviderStatus::Success,
            processed_at: Utc::now(),
        };
        self.seen
            .lock()
            .unwrap()
            .insert(request.reference_id.clone(), response.clone());
        Ok(response)
    }

    fn fetch(&self, reference_id: &str) -> Result<ProviderResponse, ProviderError> {
        if let Some(found) = self.seen.lock().unwrap().get(reference_id) {
            return Ok(found.clone());
        }
        match *self.prior.lock().unwrap() {
            Some(status) => Ok(ProviderResponse {
                reference_id: reference_id.to_string(),
                utr: "UTR-PRIOR".into(),
                amount: 0.0,
                channel: disburse_core::model::Channel::Upi,
                status,
                processed_at: Utc::now(),
            }),
            None => Err(ProviderError::Rejected(format!("{reference_id} unknown"))),
        }
    }
}

// ── Rig ─────────────────────────────────────────────────────────────────────

pub struct Rig {
    pub processor: Arc<PaymentProcessor>,
    pub store: Arc<PayStore>,
    pub clock: Arc<ManualClock>,
    pub provider: Arc<ScriptedProvider>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Unjittered backoff so eligibility is exact.
pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.jitter_pct = 0.0;
    config
}

pub fn build(balance: Money) -> Rig {
    build_with(balance, ScriptedProvider::new())
}

pub fn build_with(balance: Money, provider: ScriptedProvider) -> Rig {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(PayStore::in_memory_migrated().expect("in-memory store"));
    store
        .insert_account(&Account {
            account_id: FUNDING.into(),
            balance,
            alert_threshold: 0.0,
        })
        .expect("funding account");

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
    ));
    let provider = Arc::new(provider);
    let notifier = Arc::new(RecordingNotifier::default());
    let processor = Arc::new(PaymentProcessor::new(
        &config(),
        store.clone(),
        RailProviders::uniform(provider.clone()),
        notifier.clone(),
        clock.clone(),
        Arc::new(SequentialIdGenerator::new()),
    ));
    Rig {
        processor,
        store,
        clock,
        provider,
        notifier,
    }
}

pub fn beneficiary(account_number: &str) -> BeneficiaryDetails {
    BeneficiaryDetails {
        name: "Asha Rao".into(),
        account_number: account_number.into(),
        ifsc: "HDFC0001234".into(),
        bank_name: "HDFC Bank".into(),
    }
}

pub fn seed_loan(rig: &Rig, loan_id: &str, amount: Money) {
    rig.store
        .insert_loan(&Loan {
            loan_id: loan_id.into(),
            amount,
            beneficiary_id: None,
        })
        .expect("insert loan");
}

/// Seed a loan and create its disbursement.
pub fn disburse(rig: &Rig, loan_id: &str, amount: Money) -> PaymentRecord {
    seed_loan(rig, loan_id, amount);
    rig.processor
        .disburse(&DisburseRequest {
            loan_id: loan_id.into(),
            amount,
            beneficiary: Some(beneficiary("001122334455")),
        })
        .expect("disburse")
        .record
}
