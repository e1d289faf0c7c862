use super::PayStore;
use crate::{error::PayResult, event::EventLogEntry};
use rusqlite::{params, Connection};

pub(super) fn append_event(conn: &Connection, entry: &EventLogEntry) -> PayResult<()> {
    conn.execute(
        "INSERT INTO event_log (record_id, event_type, payload, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![entry.record_id, entry.event_type, entry.payload, entry.created_at],
    )?;
    Ok(())
}

impl PayStore {
    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> PayResult<()> {
        append_event(&self.conn(), entry)
    }

    pub fn events_for_record(&self, record_id: &str) -> PayResult<Vec<EventLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, record_id, event_type, payload, created_at
             FROM event_log WHERE record_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![record_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    record_id: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
