use super::{placeholders, PayStore, RecordFilter};
use crate::{
    error::{PayError, PayResult},
    model::{Channel, PaymentRecord, PaymentStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::ToSql, OptionalExtension, Row};

const RECORD_COLUMNS: &str = "record_id, kind, loan_id, beneficiary_id, funding_account_id,
     amount, channel, status, retry_count, last_error, idempotency_key, created_at, updated_at";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PaymentRecord> {
    Ok(PaymentRecord {
        record_id: row.get(0)?,
        kind: row.get(1)?,
        loan_id: row.get(2)?,
        beneficiary_id: row.get(3)?,
        funding_account_id: row.get(4)?,
        amount: row.get(5)?,
        channel: row.get(6)?,
        status: row.get(7)?,
        retry_count: row.get(8)?,
        last_error: row.get(9)?,
        idempotency_key: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl PayStore {
    // ── Payment record: create / read ─────────────────────────────

    pub fn insert_record(&self, r: &PaymentRecord) -> PayResult<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO payment_record ({RECORD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                r.record_id,
                r.kind,
                r.loan_id,
                r.beneficiary_id,
                r.funding_account_id,
                r.amount,
                r.channel,
                r.status,
                r.retry_count,
                r.last_error,
                r.idempotency_key,
                r.created_at,
                r.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_record(&self, record_id: &str) -> PayResult<PaymentRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM payment_record WHERE record_id = ?1"),
                params![record_id],
                record_from_row,
            )
            .optional()?
            .ok_or_else(|| PayError::not_found("payment record", record_id))
    }

    /// The disbursement for a loan, if one was ever created.
    pub fn find_disbursement_by_loan(&self, loan_id: &str) -> PayResult<Option<PaymentRecord>> {
        let found = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM payment_record
                     WHERE loan_id = ?1 AND kind = 'disbursement'"
                ),
                params![loan_id],
                record_from_row,
            )
            .optional()?;
        Ok(found)
    }

    pub fn find_record_by_idempotency_key(&self, key: &str) -> PayResult<Option<PaymentRecord>> {
        let found = self
            .conn()
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM payment_record WHERE idempotency_key = ?1"),
                params![key],
                record_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Every record tied to a loan, oldest first.
    pub fn records_for_loan(&self, loan_id: &str) -> PayResult<Vec<PaymentRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM payment_record
             WHERE loan_id = ?1
             ORDER BY created_at ASC, record_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![loan_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Page through records matching `filter`, newest first.
    pub fn list_records(
        &self,
        filter: &RecordFilter,
        offset: usize,
        limit: usize,
    ) -> PayResult<Vec<PaymentRecord>> {
        let limit = limit as i64;
        let offset = offset as i64;

        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM payment_record WHERE 1 = 1");
        let mut args: Vec<&dyn ToSql> = Vec::new();
        if !filter.statuses.is_empty() {
            sql.push_str(&format!(
                " AND status IN ({})",
                placeholders(filter.statuses.len())
            ));
            args.extend(filter.statuses.iter().map(|s| s as &dyn ToSql));
        }
        if !filter.channels.is_empty() {
            sql.push_str(&format!(
                " AND channel IN ({})",
                placeholders(filter.channels.len())
            ));
            args.extend(filter.channels.iter().map(|c| c as &dyn ToSql));
        }
        sql.push_str(" ORDER BY created_at DESC, record_id DESC LIMIT ? OFFSET ?");
        args.push(&limit);
        args.push(&offset);

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args.as_slice(), record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn record_count(&self, status: PaymentStatus) -> PayResult<i64> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM payment_record WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    // ── Payment record: transitions ───────────────────────────────

    /// `Initiated | Suspended → Processing`, only if the row still holds
    /// exactly the state the caller observed. Returns false when another
    /// worker moved it first.
    pub fn claim_for_processing(
        &self,
        observed: &PaymentRecord,
        channel: Channel,
        at: DateTime<Utc>,
    ) -> PayResult<bool> {
        let sql = format!(
            "UPDATE payment_record
             SET status = 'processing', channel = ?, last_error = NULL, updated_at = ?
             WHERE record_id = ? AND retry_count = ? AND updated_at = ?
               AND status IN ({})",
            placeholders(PaymentStatus::CLAIMABLE.len())
        );
        let mut args: Vec<&dyn ToSql> = vec![
            &channel,
            &at,
            &observed.record_id,
            &observed.retry_count,
            &observed.updated_at,
        ];
        args.extend(PaymentStatus::CLAIMABLE.iter().map(|s| s as &dyn ToSql));
        let changed = self.conn().execute(&sql, args.as_slice())?;
        Ok(changed == 1)
    }

    /// `Processing → Suspended | Failed` after a failed attempt.
    pub fn record_attempt_failure(
        &self,
        record_id: &str,
        status: PaymentStatus,
        retry_count: u32,
        error: &str,
        at: DateTime<Utc>,
    ) -> PayResult<bool> {
        debug_assert!(matches!(
            status,
            PaymentStatus::Suspended | PaymentStatus::Failed
        ));
        let changed = self.conn().execute(
            "UPDATE payment_record
             SET status = ?1, retry_count = MAX(retry_count, ?2), last_error = ?3, updated_at = ?4
             WHERE record_id = ?5 AND status = 'processing'",
            params![status, retry_count, error, at, record_id],
        )?;
        Ok(changed == 1)
    }

    /// Operator retry: back to `Initiated` from anything but
    /// `Processing` or `Success`. Keeps the retry count.
    pub fn reset_for_retry(&self, record_id: &str, at: DateTime<Utc>) -> PayResult<bool> {
        let changed = self.conn().execute(
            "UPDATE payment_record
             SET status = 'initiated', last_error = NULL, updated_at = ?1
             WHERE record_id = ?2 AND status NOT IN ('processing', 'success')",
            params![at, record_id],
        )?;
        Ok(changed == 1)
    }
}
