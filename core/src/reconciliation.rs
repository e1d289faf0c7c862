//! Reconciliation: our settled attempts for a day against the bank's
//! statement for that day.
//!
//! Data mismatches become discrepancies in the report. Only a bad date or
//! a store failure is an error. The report is a complete diff with no
//! verdict, and it is not persisted.

use crate::{
    clock::Clock,
    config::ReconciliationConfig,
    error::{PayError, PayResult},
    ids::{IdGenerator, IdKind},
    store::PayStore,
    types::{Money, ReferenceId},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    io::Read,
    path::Path,
    sync::Arc,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementEntry {
    pub reference_id: ReferenceId,
    pub amount: Money,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// We settled it; the statement does not have it.
    Missing,
    /// The statement has it; we never settled it.
    Ghost,
    AmountMismatch,
    StatusMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub reference_id: ReferenceId,
    pub expected_amount: Option<Money>,
    pub actual_amount: Option<Money>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub report_id: String,
    pub statement_date: NaiveDate,
    pub total_expected: Money,
    pub total_actual: Money,
    pub matched_count: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub generated_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn count(&self, kind: DiscrepancyKind) -> usize {
        self.discrepancies.iter().filter(|d| d.kind == kind).count()
    }
}

pub struct ReconciliationEngine {
    store: Arc<PayStore>,
    config: ReconciliationConfig,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<PayStore>,
        config: ReconciliationConfig,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            ids,
            clock,
        }
    }

    fn is_settled_status(&self, status: &str) -> bool {
        let status = status.trim();
        self.config
            .settled_statuses
            .iter()
            .any(|s| s.eq_ignore_ascii_case(status))
    }

    /// `statement_date` must be `YYYY-MM-DD`.
    pub fn reconcile(
        &self,
        statement_date: &str,
        statement: &[StatementEntry],
    ) -> PayResult<ReconciliationReport> {
        let date = parse_statement_date(statement_date)?;

        // Sorted by reference id.
        let ours = self.store.settled_transactions_on(date)?;
        let theirs: HashMap<&str, &StatementEntry> = statement
            .iter()
            .map(|e| (e.reference_id.as_str(), e))
            .collect();

        let mut discrepancies = Vec::new();
        let mut matched_count = 0;
        let mut total_expected = 0.0;

        for txn in &ours {
            total_expected += txn.amount;
            let Some(entry) = theirs.get(txn.reference_id.as_str()) else {
                discrepancies.push(Discrepancy {
                    kind: DiscrepancyKind::Missing,
                    reference_id: txn.reference_id.clone(),
                    expected_amount: Some(txn.amount),
                    actual_amount: None,
                    message: format!("{} settled locally but absent from statement", txn.reference_id),
                });
                continue;
            };

            if (entry.amount - txn.amount).abs() > self.config.tolerance {
                discrepancies.push(Discrepancy {
                    kind: DiscrepancyKind::AmountMismatch,
                    reference_id: txn.reference_id.clone(),
                    expected_amount: Some(txn.amount),
                    actual_amount: Some(entry.amount),
                    message: format!(
                        "expected {:.2}, statement shows {:.2}",
                        txn.amount, entry.amount
                    ),
                });
            } else if !self.is_settled_status(&entry.status) {
                discrepancies.push(Discrepancy {
                    kind: DiscrepancyKind::StatusMismatch,
                    reference_id: txn.reference_id.clone(),
                    expected_amount: Some(txn.amount),
                    actual_amount: Some(entry.amount),
                    message: format!("statement status is '{}'", entry.status),
                });
            } else {
                matched_count += 1;
            }
        }

        let our_refs: HashSet<&str> = ours.iter().map(|t| t.reference_id.as_str()).collect();
        let mut reported = HashSet::new();
        for entry in statement {
            let reference = entry.reference_id.as_str();
            if our_refs.contains(reference) || !reported.insert(reference) {
                continue;
            }
            discrepancies.push(Discrepancy {
                kind: DiscrepancyKind::Ghost,
                reference_id: entry.reference_id.clone(),
                expected_amount: None,
                actual_amount: Some(entry.amount),
                message: format!("{reference} on statement but never settled locally"),
            });
        }

        let total_actual: Money = statement
            .iter()
            .filter(|e| self.is_settled_status(&e.status))
            .map(|e| e.amount)
            .sum();

        let report = ReconciliationReport {
            report_id: self.ids.next_id(IdKind::ReconciliationReport),
            statement_date: date,
            total_expected,
            total_actual,
            matched_count,
            discrepancies,
            generated_at: self.clock.now(),
        };
        log::info!(
            "reconciliation {}: {} matched, {} discrepancies, expected {:.2}, actual {:.2}",
            date,
            report.matched_count,
            report.discrepancies.len(),
            report.total_expected,
            report.total_actual
        );
        Ok(report)
    }
}

pub fn parse_statement_date(text: &str) -> PayResult<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|_| PayError::InvalidDate(text.to_string()))
}

// ── Statement files ───────────────────────────────────────────────

/// Header row `reference_id,amount,status`. Surrounding whitespace is
/// ignored.
pub fn parse_statement_csv<R: Read>(source: R) -> PayResult<Vec<StatementEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(source);
    reader
        .deserialize()
        .map(|row| row.map_err(PayError::from))
        .collect()
}

/// `.json` files hold an array of entries; anything else is read as CSV.
pub fn load_statement(path: impl AsRef<Path>) -> PayResult<Vec<StatementEntry>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    } else {
        parse_statement_csv(file)
    }
}
