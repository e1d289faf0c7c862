//! The disbursement engine: one store, one processor, one reconciler.
//!
//! RULES:
//!   - Every component shares the same `PayStore` handle.
//!   - All randomness flows through the RngBank.
//!   - All state changes are recorded in the event log.

use crate::{
    clock::{Clock, ManualClock},
    config::EngineConfig,
    error::PayResult,
    ids::{IdGenerator, SequentialIdGenerator},
    model::Account,
    notifier::{Notifier, RecordingNotifier},
    processor::PaymentProcessor,
    provider::{RailProviders, SimulatedProvider},
    reconciliation::{ReconciliationEngine, ReconciliationReport, StatementEntry},
    rng::{RngBank, RngSlot},
    scheduler::{BatchPolicy, Scheduler},
    store::PayStore,
    types::Money,
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;

pub struct PayEngine {
    pub config: EngineConfig,
    pub store: Arc<PayStore>,
    pub processor: Arc<PaymentProcessor>,
    reconciler: ReconciliationEngine,
}

impl PayEngine {
    pub fn build(
        config: EngineConfig,
        store: Arc<PayStore>,
        providers: RailProviders,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let processor = Arc::new(PaymentProcessor::new(
            &config,
            store.clone(),
            providers,
            notifier,
            clock.clone(),
            ids.clone(),
        ));
        let reconciler =
            ReconciliationEngine::new(store.clone(), config.reconciliation.clone(), ids, clock);
        Self {
            config,
            store,
            processor,
            reconciler,
        }
    }

    /// In-memory engine on a manual clock with a never-failing simulated
    /// provider and a funded account. For tests.
    pub fn build_test(seed: u64, funding_balance: Money) -> PayResult<TestHarness> {
        let config = EngineConfig {
            seed,
            ..EngineConfig::default()
        };
        let store = Arc::new(PayStore::in_memory_migrated()?);
        store.insert_account(&Account {
            account_id: config.funding_account_id.clone(),
            balance: funding_balance,
            alert_threshold: 0.0,
        })?;

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0)
                .single()
                .unwrap_or_default(),
        ));
        let provider = Arc::new(SimulatedProvider::new(
            crate::config::ProviderConfig {
                transient_failure_rate: 0.0,
                permanent_failure_rate: 0.0,
            },
            RngBank::new(seed).for_slot(RngSlot::SimulatedProvider),
            clock.clone(),
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Self::build(
            config,
            store,
            RailProviders::uniform(provider.clone()),
            notifier.clone(),
            clock.clone(),
            Arc::new(SequentialIdGenerator::new()),
        );
        Ok(TestHarness {
            engine,
            clock,
            provider,
            notifier,
        })
    }

    /// Spawn one polling worker per configured policy.
    pub fn start_scheduler(&self) -> PayResult<Scheduler> {
        Scheduler::start(
            BatchPolicy::all_from(&self.config.scheduler),
            self.store.clone(),
            self.processor.clone(),
        )
    }

    pub fn reconcile(
        &self,
        statement_date: &str,
        statement: &[StatementEntry],
    ) -> PayResult<ReconciliationReport> {
        self.reconciler.reconcile(statement_date, statement)
    }
}

/// An engine plus the handles a test needs to drive it.
pub struct TestHarness {
    pub engine: PayEngine,
    pub clock: Arc<ManualClock>,
    pub provider: Arc<SimulatedProvider>,
    pub notifier: Arc<RecordingNotifier>,
}
