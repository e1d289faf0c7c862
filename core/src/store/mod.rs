//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The processor, ledger and scheduler call store methods; they never
//! execute SQL directly.
//!
//! Every status transition is a single conditional UPDATE. Callers learn
//! whether they won a transition from the returned row count, never from
//! a prior read.

use crate::{
    error::PayResult,
    model::{Channel, PaymentStatus},
    types::Money,
};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

mod account;
mod beneficiary;
mod event;
mod loan;
mod record;
mod transaction;

pub(crate) use account::debit_account;

pub struct PayStore {
    conn: Mutex<Connection>,
}

impl PayStore {
    pub fn open(path: &str) -> PayResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PayResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a fresh in-memory database with migrations applied.
    pub fn in_memory_migrated() -> PayResult<Self> {
        let store = Self::in_memory()?;
        store.migrate()?;
        Ok(store)
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PayResult<()> {
        let conn = self.conn();
        conn.execute_batch(include_str!("../../../migrations/001_payments.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/002_event_log.sql"))?;
        Ok(())
    }

    /// Lock the shared connection. Poisoning is ignored: every mutation
    /// is a single statement or an explicit transaction.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Scheduler-side selection of payment records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Empty means any status.
    pub statuses: Vec<PaymentStatus>,
    /// Empty means any channel.
    pub channels: Vec<Channel>,
}

impl RecordFilter {
    pub fn new(statuses: &[PaymentStatus], channels: &[Channel]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            channels: channels.to_vec(),
        }
    }
}

/// Everything the success path commits in one SQLite transaction.
#[derive(Debug, Clone)]
pub struct SettlementWrite<'a> {
    pub record_id: &'a str,
    pub txn_id: &'a str,
    pub account_id: &'a str,
    /// Amount plus rail fee.
    pub debit_amount: Money,
    pub utr: &'a str,
    pub settled_on: chrono::NaiveDate,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// `?, ?, ?` for an IN clause of `n` items.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
