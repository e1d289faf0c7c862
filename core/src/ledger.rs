//! Ledger controller. The only writer of account balances.
//!
//! A debit is one conditional UPDATE (`... WHERE balance >= amount`).
//! Zero rows matched means insufficient balance, whether the account
//! never had enough or a concurrent debit consumed it first. Debits are
//! not retried.

use crate::{
    error::{PayError, PayResult},
    store::{PayStore, SettlementWrite},
    types::Money,
};
use std::sync::Arc;

pub struct LedgerController {
    store: Arc<PayStore>,
}

impl LedgerController {
    pub fn new(store: Arc<PayStore>) -> Self {
        Self { store }
    }

    /// Debit `amount` on its own. `InsufficientBalance` and `NotFound`
    /// leave the balance untouched.
    pub fn debit(&self, account_id: &str, amount: Money) -> PayResult<Money> {
        let balance = self.store.debit_account(account_id, amount)?;
        self.check_alert(account_id, balance);
        Ok(balance)
    }

    /// Debit and mark the attempt and record `Success` as one unit of work.
    pub fn settle(&self, write: &SettlementWrite<'_>) -> PayResult<Money> {
        match self.store.commit_settlement(write) {
            Ok(balance) => {
                log::info!(
                    "ledger: debited {:.2} from {} for {} (balance {:.2})",
                    write.debit_amount,
                    write.account_id,
                    write.record_id,
                    balance
                );
                self.check_alert(write.account_id, balance);
                Ok(balance)
            }
            Err(e @ PayError::InsufficientBalance { .. }) => {
                log::warn!(
                    "ledger: {} cannot fund {:.2} for {}",
                    write.account_id,
                    write.debit_amount,
                    write.record_id
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub fn balance(&self, account_id: &str) -> PayResult<Money> {
        self.store.account_balance(account_id)
    }

    fn check_alert(&self, account_id: &str, balance: Money) {
        match self.store.get_account(account_id) {
            Ok(account) if balance < account.alert_threshold => log::warn!(
                "ledger: low balance alert on {account_id}: {balance:.2} below threshold {:.2}",
                account.alert_threshold
            ),
            Ok(_) => {}
            Err(e) => log::warn!("ledger: alert check failed for {account_id}: {e}"),
        }
    }
}
