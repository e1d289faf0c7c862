use super::PayStore;
use crate::{
    error::{PayError, PayResult},
    model::Loan,
};
use rusqlite::{params, OptionalExtension};

impl PayStore {
    // ── Loan ──────────────────────────────────────────────────────

    pub fn insert_loan(&self, loan: &Loan) -> PayResult<()> {
        self.conn().execute(
            "INSERT INTO loan (loan_id, amount, beneficiary_id) VALUES (?1, ?2, ?3)",
            params![loan.loan_id, loan.amount, loan.beneficiary_id],
        )?;
        Ok(())
    }

    pub fn get_loan(&self, loan_id: &str) -> PayResult<Loan> {
        self.conn()
            .query_row(
                "SELECT loan_id, amount, beneficiary_id FROM loan WHERE loan_id = ?1",
                params![loan_id],
                |row| {
                    Ok(Loan {
                        loan_id: row.get(0)?,
                        amount: row.get(1)?,
                        beneficiary_id: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| PayError::not_found("loan", loan_id))
    }

    pub fn loan_count(&self) -> PayResult<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM loan", [], |row| row.get(0))?)
    }

    /// Attach a beneficiary only if the loan has none yet.
    /// Returns the beneficiary id the loan ends up with.
    pub fn attach_beneficiary(&self, loan_id: &str, beneficiary_id: &str) -> PayResult<String> {
        self.conn().execute(
            "UPDATE loan SET beneficiary_id = ?1
             WHERE loan_id = ?2 AND beneficiary_id IS NULL",
            params![beneficiary_id, loan_id],
        )?;
        self.get_loan(loan_id)?
            .beneficiary_id
            .ok_or_else(|| PayError::not_found("beneficiary for loan", loan_id))
    }
}
