//! Batch scheduler: one polling thread per policy.
//!
//! A cycle pages through the records a policy selects and hands each one
//! to the processor. Item failures are logged and the page continues; a
//! listing failure ends the cycle and the next poll starts over.
//!
//! Policies whose status sets overlap must not share a channel, so no two
//! policies ever list the same record.

use crate::{
    channel::ChannelSelector,
    config::{BatchPolicyConfig, SchedulerConfig},
    error::{PayError, PayResult},
    model::{Channel, PaymentRecord},
    processor::{PaymentProcessor, ProcessOutcome},
    store::{PayStore, RecordFilter},
};
use std::{
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

// ── Seams ─────────────────────────────────────────────────────────

pub trait RecordSource: Send + Sync {
    fn list(&self, filter: &RecordFilter, offset: usize, limit: usize)
        -> PayResult<Vec<PaymentRecord>>;
}

impl RecordSource for PayStore {
    fn list(
        &self,
        filter: &RecordFilter,
        offset: usize,
        limit: usize,
    ) -> PayResult<Vec<PaymentRecord>> {
        self.list_records(filter, offset, limit)
    }
}

pub trait RecordProcessor: Send + Sync {
    fn process(&self, record: &PaymentRecord) -> PayResult<ProcessOutcome>;
}

impl RecordProcessor for PaymentProcessor {
    fn process(&self, record: &PaymentRecord) -> PayResult<ProcessOutcome> {
        PaymentProcessor::process(self, record)
    }
}

// ── Shutdown signal ───────────────────────────────────────────────

/// Cooperative stop flag. Doubles as the sleep between polls so a stop
/// request wakes a sleeping worker at once.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep up to `timeout`. Returns true if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

// ── Policies ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BatchPolicy {
    pub name: String,
    pub filter: RecordFilter,
    pub page_size: usize,
    pub poll_interval: Duration,
}

impl BatchPolicy {
    pub fn from_config(config: &BatchPolicyConfig) -> Self {
        Self {
            name: config.name.clone(),
            filter: RecordFilter::new(&config.statuses, &config.channels),
            page_size: config.page_size.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn all_from(config: &SchedulerConfig) -> Vec<Self> {
        config.policies.iter().map(Self::from_config).collect()
    }
}

pub const ON_DEMAND_POLICY: &str = "on_demand";

/// Process one record right now. A record whose next attempt would go
/// out on the slow rail is left to its batch and rejected here.
pub fn process_on_demand(
    store: &PayStore,
    channels: &ChannelSelector,
    processor: &dyn RecordProcessor,
    record_id: &str,
) -> PayResult<ProcessOutcome> {
    let record = store.get_record(record_id)?;
    if channels.select(record.amount, record.retry_count) == Channel::Neft {
        return Err(PayError::ProcessingRejected {
            id: record_id.to_string(),
            policy: ON_DEMAND_POLICY.into(),
        });
    }
    processor.process(&record)
}

// ── Worker ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub pages: usize,
    pub listed: usize,
    pub settled: usize,
    pub suspended: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl CycleStats {
    fn count(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Settled { .. } => self.settled += 1,
            ProcessOutcome::Suspended { .. } => self.suspended += 1,
            ProcessOutcome::Failed { .. } => self.failed += 1,
            ProcessOutcome::Skipped | ProcessOutcome::LostClaim => self.skipped += 1,
        }
    }
}

pub struct BatchWorker {
    policy: BatchPolicy,
    source: Arc<dyn RecordSource>,
    processor: Arc<dyn RecordProcessor>,
}

impl BatchWorker {
    pub fn new(
        policy: BatchPolicy,
        source: Arc<dyn RecordSource>,
        processor: Arc<dyn RecordProcessor>,
    ) -> Self {
        Self {
            policy,
            source,
            processor,
        }
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    /// One pass over every page. Stops at the first short page.
    pub fn run_once(&self, shutdown: &Shutdown) -> PayResult<CycleStats> {
        let mut stats = CycleStats::default();
        let mut offset = 0;
        loop {
            if shutdown.is_triggered() {
                break;
            }
            let page = self
                .source
                .list(&self.policy.filter, offset, self.policy.page_size)?;
            stats.pages += 1;
            stats.listed += page.len();
            log::debug!(
                "scheduler[{}]: page at offset {offset} has {} records",
                self.policy.name,
                page.len()
            );

            for record in &page {
                match self.processor.process(record) {
                    Ok(outcome) => stats.count(&outcome),
                    Err(e) => {
                        stats.errors += 1;
                        log::warn!(
                            "scheduler[{}]: {} failed: {e}",
                            self.policy.name,
                            record.record_id
                        );
                    }
                }
            }

            if page.len() < self.policy.page_size {
                break;
            }
            offset += self.policy.page_size;
        }
        Ok(stats)
    }

    /// Poll until `shutdown` fires.
    pub fn run(&self, shutdown: &Shutdown) {
        log::info!("scheduler[{}]: started", self.policy.name);
        while !shutdown.is_triggered() {
            match self.run_once(shutdown) {
                Ok(stats) if stats.listed > 0 => log::info!(
                    "scheduler[{}]: cycle done: {} listed, {} settled, {} suspended, {} failed, {} errors",
                    self.policy.name,
                    stats.listed,
                    stats.settled,
                    stats.suspended,
                    stats.failed,
                    stats.errors
                ),
                Ok(_) => {}
                Err(e) => log::error!("scheduler[{}]: listing failed: {e}", self.policy.name),
            }
            if shutdown.wait_timeout(self.policy.poll_interval) {
                break;
            }
        }
        log::info!("scheduler[{}]: stopped", self.policy.name);
    }
}

// ── Scheduler ─────────────────────────────────────────────────────

pub struct Scheduler {
    shutdown: Shutdown,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    /// Spawn one worker thread per policy.
    pub fn start(
        policies: Vec<BatchPolicy>,
        source: Arc<dyn RecordSource>,
        processor: Arc<dyn RecordProcessor>,
    ) -> PayResult<Self> {
        let shutdown = Shutdown::new();
        let mut handles = Vec::with_capacity(policies.len());
        for policy in policies {
            let name = policy.name.clone();
            let worker = BatchWorker::new(policy, source.clone(), processor.clone());
            let signal = shutdown.clone();
            let spawned = thread::Builder::new()
                .name(format!("batch-{name}"))
                .spawn(move || worker.run(&signal));
            match spawned {
                Ok(handle) => handles.push((name, handle)),
                Err(e) => {
                    shutdown.trigger();
                    for (_, handle) in handles {
                        let _ = handle.join();
                    }
                    return Err(PayError::Other(anyhow::anyhow!(
                        "cannot spawn worker '{name}': {e}"
                    )));
                }
            }
        }
        Ok(Self { shutdown, handles })
    }

    /// Signal every worker and wait for in-flight items to finish.
    pub fn stop(self) {
        self.shutdown.trigger();
        for (name, handle) in self.handles {
            if handle.join().is_err() {
                log::error!("scheduler[{name}]: worker panicked");
            }
        }
    }
}
