//! Prefixed identifier generation.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Disbursement,
    Payment,
    SubTransaction,
    Reference,
    Beneficiary,
    ReconciliationReport,
}

impl IdKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Disbursement => "DSB",
            Self::Payment => "PAY",
            Self::SubTransaction => "TXN",
            Self::Reference => "REF",
            Self::Beneficiary => "BEN",
            Self::ReconciliationReport => "RCN",
        }
    }
}

/// Uniqueness is the implementation's guarantee; the engine relies on it.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self, kind: IdKind) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self, kind: IdKind) -> String {
        format!("{}-{}", kind.prefix(), Uuid::new_v4().simple())
    }
}

/// Monotonic counter ids (`REF-000001`). Readable in tests and replay logs.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self, kind: IdKind) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{n:06}", kind.prefix())
    }
}
