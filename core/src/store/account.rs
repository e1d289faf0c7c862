use super::PayStore;
use crate::{
    error::{PayError, PayResult},
    model::Account,
    types::Money,
};
use rusqlite::{params, Connection, OptionalExtension};

/// Atomic conditional debit. Runs on a bare connection so it can join a
/// caller's transaction. Returns the balance after the debit.
pub(crate) fn debit_account(conn: &Connection, account_id: &str, amount: Money) -> PayResult<Money> {
    if !(amount > 0.0) {
        return Err(PayError::Validation(format!(
            "debit amount must be positive, got {amount}"
        )));
    }

    let changed = conn.execute(
        "UPDATE account SET balance = balance - ?1
         WHERE account_id = ?2 AND balance >= ?1",
        params![amount, account_id],
    )?;

    let balance: Option<Money> = conn
        .query_row(
            "SELECT balance FROM account WHERE account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )
        .optional()?;

    match (changed, balance) {
        (1, Some(balance)) => Ok(balance),
        (_, None) => Err(PayError::not_found("account", account_id)),
        // Never enough, or a concurrent debit got there first.
        _ => Err(PayError::InsufficientBalance {
            account_id: account_id.to_string(),
        }),
    }
}

impl PayStore {
    // ── Account ───────────────────────────────────────────────────

    pub fn insert_account(&self, account: &Account) -> PayResult<()> {
        self.conn().execute(
            "INSERT INTO account (account_id, balance, alert_threshold) VALUES (?1, ?2, ?3)",
            params![account.account_id, account.balance, account.alert_threshold],
        )?;
        Ok(())
    }

    pub fn get_account(&self, account_id: &str) -> PayResult<Account> {
        self.conn()
            .query_row(
                "SELECT account_id, balance, alert_threshold FROM account WHERE account_id = ?1",
                params![account_id],
                |row| {
                    Ok(Account {
                        account_id: row.get(0)?,
                        balance: row.get(1)?,
                        alert_threshold: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| PayError::not_found("account", account_id))
    }

    pub fn account_balance(&self, account_id: &str) -> PayResult<Money> {
        Ok(self.get_account(account_id)?.balance)
    }

    /// Standalone debit, committed on its own.
    pub fn debit_account(&self, account_id: &str, amount: Money) -> PayResult<Money> {
        debit_account(&self.conn(), account_id, amount)
    }

    /// External deposit into the ledger account.
    pub fn credit_account(&self, account_id: &str, amount: Money) -> PayResult<Money> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE account SET balance = balance + ?1 WHERE account_id = ?2",
            params![amount, account_id],
        )?;
        if changed == 0 {
            return Err(PayError::not_found("account", account_id));
        }
        let balance = conn.query_row(
            "SELECT balance FROM account WHERE account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(balance)
    }
}
