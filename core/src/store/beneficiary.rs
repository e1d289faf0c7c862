use super::PayStore;
use crate::{
    error::{PayError, PayResult},
    model::Beneficiary,
};
use rusqlite::{params, OptionalExtension, Row};

fn beneficiary_from_row(row: &Row<'_>) -> rusqlite::Result<Beneficiary> {
    Ok(Beneficiary {
        beneficiary_id: row.get(0)?,
        name: row.get(1)?,
        account_number: row.get(2)?,
        ifsc: row.get(3)?,
        bank_name: row.get(4)?,
    })
}

impl PayStore {
    // ── Beneficiary ───────────────────────────────────────────────

    pub fn insert_beneficiary(&self, b: &Beneficiary) -> PayResult<()> {
        self.conn().execute(
            "INSERT INTO beneficiary (beneficiary_id, name, account_number, ifsc, bank_name)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![b.beneficiary_id, b.name, b.account_number, b.ifsc, b.bank_name],
        )?;
        Ok(())
    }

    pub fn get_beneficiary(&self, beneficiary_id: &str) -> PayResult<Beneficiary> {
        self.conn()
            .query_row(
                "SELECT beneficiary_id, name, account_number, ifsc, bank_name
                 FROM beneficiary WHERE beneficiary_id = ?1",
                params![beneficiary_id],
                beneficiary_from_row,
            )
            .optional()?
            .ok_or_else(|| PayError::not_found("beneficiary", beneficiary_id))
    }

    /// Look up by the natural key (account number, IFSC, bank name).
    pub fn find_beneficiary(
        &self,
        account_number: &str,
        ifsc: &str,
        bank_name: &str,
    ) -> PayResult<Option<Beneficiary>> {
        let found = self
            .conn()
            .query_row(
                "SELECT beneficiary_id, name, account_number, ifsc, bank_name
                 FROM beneficiary
                 WHERE account_number = ?1 AND ifsc = ?2 AND bank_name = ?3",
                params![account_number, ifsc, bank_name],
                beneficiary_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Insert unless the natural key already exists; returns the stored row.
    pub fn upsert_beneficiary(&self, candidate: &Beneficiary) -> PayResult<Beneficiary> {
        self.conn().execute(
            "INSERT INTO beneficiary (beneficiary_id, name, account_number, ifsc, bank_name)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (account_number, ifsc, bank_name) DO NOTHING",
            params![
                candidate.beneficiary_id,
                candidate.name,
                candidate.account_number,
                candidate.ifsc,
                candidate.bank_name,
            ],
        )?;
        self.find_beneficiary(&candidate.account_number, &candidate.ifsc, &candidate.bank_name)?
            .ok_or_else(|| PayError::not_found("beneficiary", &candidate.beneficiary_id))
    }
}
