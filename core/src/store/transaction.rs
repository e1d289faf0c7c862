use super::{debit_account, event::append_event, PayStore, SettlementWrite};
use crate::{
    error::{PayError, PayResult},
    event::{EventLogEntry, PaymentEvent},
    model::SubTransaction,
    types::Money,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

const TXN_COLUMNS: &str = "txn_id, record_id, reference_id, amount, channel, status,
     error, utr, settled_on, created_at, updated_at";

fn txn_from_row(row: &Row<'_>) -> rusqlite::Result<SubTransaction> {
    Ok(SubTransaction {
        txn_id: row.get(0)?,
        record_id: row.get(1)?,
        reference_id: row.get(2)?,
        amount: row.get(3)?,
        channel: row.get(4)?,
        status: row.get(5)?,
        error: row.get(6)?,
        utr: row.get(7)?,
        settled_on: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl PayStore {
    // ── Sub-transaction: one row per provider attempt ─────────────

    pub fn insert_sub_transaction(&self, t: &SubTransaction) -> PayResult<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO sub_transaction ({TXN_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                t.txn_id,
                t.record_id,
                t.reference_id,
                t.amount,
                t.channel,
                t.status,
                t.error,
                t.utr,
                t.settled_on,
                t.created_at,
                t.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_sub_transaction(&self, txn_id: &str) -> PayResult<SubTransaction> {
        self.conn()
            .query_row(
                &format!("SELECT {TXN_COLUMNS} FROM sub_transaction WHERE txn_id = ?1"),
                params![txn_id],
                txn_from_row,
            )
            .optional()?
            .ok_or_else(|| PayError::not_found("sub-transaction", txn_id))
    }

    /// All attempts for a record, oldest first.
    pub fn sub_transactions_for_record(&self, record_id: &str) -> PayResult<Vec<SubTransaction>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TXN_COLUMNS} FROM sub_transaction
             WHERE record_id = ?1
             ORDER BY created_at ASC, txn_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![record_id], txn_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_sub_transaction_failed(
        &self,
        txn_id: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> PayResult<()> {
        self.conn().execute(
            "UPDATE sub_transaction SET status = 'failed', error = ?1, updated_at = ?2
             WHERE txn_id = ?3 AND status = 'initiated'",
            params![error, at, txn_id],
        )?;
        Ok(())
    }

    /// Successful attempts settled on `date`, ordered by reference id.
    /// This is "our side" of a reconciliation.
    pub fn settled_transactions_on(&self, date: NaiveDate) -> PayResult<Vec<SubTransaction>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TXN_COLUMNS} FROM sub_transaction
             WHERE status = 'success' AND settled_on = ?1
             ORDER BY reference_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![date], txn_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Success path: one unit of work ────────────────────────────

    /// Debit the funding account, mark the attempt and the record
    /// `Success`, and log the event in one transaction. Returns the
    /// funding account balance after the debit.
    pub fn commit_settlement(&self, s: &SettlementWrite<'_>) -> PayResult<Money> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let balance = debit_account(&tx, s.account_id, s.debit_amount)?;

        let txn_changed = tx.execute(
            "UPDATE sub_transaction
             SET status = 'success', error = NULL, utr = ?1, settled_on = ?2, updated_at = ?3
             WHERE txn_id = ?4 AND record_id = ?5 AND status = 'initiated'",
            params![s.utr, s.settled_on, s.at, s.txn_id, s.record_id],
        )?;
        let record_changed = tx.execute(
            "UPDATE payment_record
             SET status = 'success', last_error = NULL, updated_at = ?1
             WHERE record_id = ?2 AND status = 'processing'",
            params![s.at, s.record_id],
        )?;
        if txn_changed != 1 || record_changed != 1 {
            // Dropping `tx` rolls the debit back.
            return Err(PayError::InvalidTransition {
                id: s.record_id.to_string(),
                status: "not processing".into(),
                action: "settle",
            });
        }

        let event = PaymentEvent::RecordSettled {
            record_id: s.record_id.to_string(),
            txn_id: s.txn_id.to_string(),
            utr: s.utr.to_string(),
            debited: s.debit_amount,
        };
        append_event(&tx, &EventLogEntry::new(&event, s.at)?)?;

        tx.commit()?;
        Ok(balance)
    }
}
