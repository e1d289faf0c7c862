//! Payment lifecycle state machine.
//!
//!   Initiated ──claim──▶ Processing ──provider ok + debit──▶ Success
//!   Suspended ──claim──▶ Processing ──provider error──▶ Suspended | Failed
//!
//! RULE: Only a worker that won the conditional claim may call the provider.
//! Every later transition is conditional on `status = 'processing'`, so a
//! record can never be moved twice by the same attempt.

use crate::{
    channel::ChannelSelector,
    clock::Clock,
    config::{ChannelFees, EngineConfig},
    error::{PayError, PayResult},
    event::{EventLogEntry, PaymentEvent},
    gateway::{is_transient, GatewayInvoker},
    ids::{IdGenerator, IdKind},
    ledger::LedgerController,
    model::{
        Beneficiary, PaymentRecord, PaymentStatus, RecordKind, SubTransaction, TransactionStatus,
    },
    notifier::Notifier,
    provider::{ProviderResponse, RailProviders},
    retry::RetryPolicy,
    rng::{RngBank, RngSlot},
    store::{PayStore, SettlementWrite},
    types::Money,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Amounts closer than this are the same amount.
const AMOUNT_EPSILON: Money = 0.005;

// ── Requests and outcomes ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeneficiaryDetails {
    pub name: String,
    pub account_number: String,
    pub ifsc: String,
    pub bank_name: String,
}

impl BeneficiaryDetails {
    fn validate(&self) -> PayResult<()> {
        for (field, value) in [
            ("name", &self.name),
            ("account_number", &self.account_number),
            ("ifsc", &self.ifsc),
            ("bank_name", &self.bank_name),
        ] {
            if value.trim().is_empty() {
                return Err(PayError::Validation(format!(
                    "beneficiary {field} is required"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisburseRequest {
    pub loan_id: String,
    pub amount: Money,
    /// Needed only when the loan has no beneficiary yet.
    pub beneficiary: Option<BeneficiaryDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Money,
    /// Defaults to the configured funding account.
    pub funding_account_id: Option<String>,
    pub beneficiary: BeneficiaryDetails,
    pub idempotency_key: Option<String>,
}

/// What a create call returns. `created` is false when an earlier
/// request already produced the record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateResponse {
    pub record: PaymentRecord,
    pub created: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Not eligible; nothing was written.
    Skipped,
    /// Another worker claimed the record first.
    LostClaim,
    Settled { txn_id: String, utr: String, balance: Money },
    Suspended { retry_count: u32, error: String },
    Failed { retry_count: u32, error: String },
}

/// Result of handing an attempt to the gateway.
enum Dispatch {
    Paid {
        txn: SubTransaction,
        response: ProviderResponse,
    },
    Declined(ProcessOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureDecision {
    pub status: PaymentStatus,
    pub retry_count: u32,
}

/// Next status and retry count after a failed attempt.
///
/// Exhausted records fail with the count unchanged. Otherwise the count
/// goes up by one and the error text decides between `Suspended` and
/// `Failed`.
pub fn evaluate_failure(retry_count: u32, max_retries: u32, error: &str) -> FailureDecision {
    if retry_count >= max_retries {
        return FailureDecision {
            status: PaymentStatus::Failed,
            retry_count,
        };
    }
    let status = if is_transient(error) {
        PaymentStatus::Suspended
    } else {
        PaymentStatus::Failed
    };
    FailureDecision {
        status,
        retry_count: retry_count + 1,
    }
}

// ── Processor ─────────────────────────────────────────────────────

pub struct PaymentProcessor {
    store: Arc<PayStore>,
    ledger: LedgerController,
    gateway: GatewayInvoker,
    retry: RetryPolicy,
    channels: ChannelSelector,
    fees: ChannelFees,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    funding_account_id: String,
}

impl PaymentProcessor {
    pub fn new(
        config: &EngineConfig,
        store: Arc<PayStore>,
        providers: RailProviders,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let rng = RngBank::new(config.seed).for_slot(RngSlot::RetryJitter);
        Self {
            ledger: LedgerController::new(store.clone()),
            store,
            gateway: GatewayInvoker::new(providers),
            retry: RetryPolicy::new(&config.retry, clock.clone(), rng),
            channels: ChannelSelector::new(&config.channels),
            fees: config.channels.fees.clone(),
            notifier,
            clock,
            ids,
            funding_account_id: config.funding_account_id.clone(),
        }
    }

    pub fn store(&self) -> &Arc<PayStore> {
        &self.store
    }

    pub fn ledger(&self) -> &LedgerController {
        &self.ledger
    }

    pub fn channels(&self) -> &ChannelSelector {
        &self.channels
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // ── Creation ──────────────────────────────────────────────────

    /// Create the disbursement for a loan. A loan gets at most one; asking
    /// again returns the existing record.
    pub fn disburse(&self, request: &DisburseRequest) -> PayResult<CreateResponse> {
        if request.loan_id.trim().is_empty() {
            return Err(PayError::Validation("loan_id is required".into()));
        }
        validate_amount(request.amount)?;

        let loan = match self.store.get_loan(&request.loan_id) {
            Ok(loan) => loan,
            Err(PayError::NotFound { .. }) => {
                return Err(PayError::Validation(format!(
                    "unknown loan '{}'",
                    request.loan_id
                )))
            }
            Err(e) => return Err(e),
        };
        if (loan.amount - request.amount).abs() > AMOUNT_EPSILON {
            return Err(PayError::Validation(format!(
                "amount {:.2} does not match loan amount {:.2}",
                request.amount, loan.amount
            )));
        }

        if let Some(existing) = self.store.find_disbursement_by_loan(&loan.loan_id)? {
            return Ok(already_exists(existing));
        }

        let beneficiary_id = match loan.beneficiary_id {
            Some(id) => id,
            None => {
                let details = request.beneficiary.as_ref().ok_or_else(|| {
                    PayError::Validation(format!(
                        "loan '{}' has no beneficiary and none was supplied",
                        loan.loan_id
                    ))
                })?;
                let beneficiary = self.resolve_beneficiary(details)?;
                self.store
                    .attach_beneficiary(&loan.loan_id, &beneficiary.beneficiary_id)?
            }
        };

        let record = self.new_record(
            IdKind::Disbursement,
            RecordKind::Disbursement,
            Some(loan.loan_id.clone()),
            beneficiary_id,
            self.funding_account_id.clone(),
            request.amount,
            None,
        );
        match self.store.insert_record(&record) {
            Ok(()) => Ok(self.created(record)),
            Err(e) if is_unique_violation(&e) => {
                // Lost a creation race; the winner's record stands.
                match self.store.find_disbursement_by_loan(&loan.loan_id)? {
                    Some(existing) => Ok(already_exists(existing)),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Create a standalone payment. With an idempotency key, a repeat
    /// request returns the record the first one created.
    pub fn create_payment(&self, request: &PaymentRequest) -> PayResult<CreateResponse> {
        validate_amount(request.amount)?;
        request.beneficiary.validate()?;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.store.find_record_by_idempotency_key(key)? {
                return Ok(already_exists(existing));
            }
        }

        let funding = request
            .funding_account_id
            .clone()
            .unwrap_or_else(|| self.funding_account_id.clone());
        match self.store.get_account(&funding) {
            Ok(_) => {}
            Err(PayError::NotFound { .. }) => {
                return Err(PayError::Validation(format!(
                    "unknown funding account '{funding}'"
                )))
            }
            Err(e) => return Err(e),
        }
        let beneficiary = self.resolve_beneficiary(&request.beneficiary)?;
        let record = self.new_record(
            IdKind::Payment,
            RecordKind::Payment,
            None,
            beneficiary.beneficiary_id,
            funding,
            request.amount,
            request.idempotency_key.clone(),
        );
        match self.store.insert_record(&record) {
            Ok(()) => Ok(self.created(record)),
            Err(e) if is_unique_violation(&e) => {
                let key = request.idempotency_key.as_deref().unwrap_or_default();
                match self.store.find_record_by_idempotency_key(key)? {
                    Some(existing) => Ok(already_exists(existing)),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn resolve_beneficiary(&self, details: &BeneficiaryDetails) -> PayResult<Beneficiary> {
        details.validate()?;
        if let Some(found) =
            self.store
                .find_beneficiary(&details.account_number, &details.ifsc, &details.bank_name)?
        {
            return Ok(found);
        }
        self.store.upsert_beneficiary(&Beneficiary {
            beneficiary_id: self.ids.next_id(IdKind::Beneficiary),
            name: details.name.clone(),
            account_number: details.account_number.clone(),
            ifsc: details.ifsc.clone(),
            bank_name: details.bank_name.clone(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn new_record(
        &self,
        id_kind: IdKind,
        kind: RecordKind,
        loan_id: Option<String>,
        beneficiary_id: String,
        funding_account_id: String,
        amount: Money,
        idempotency_key: Option<String>,
    ) -> PaymentRecord {
        let now = self.clock.now();
        PaymentRecord {
            record_id: self.ids.next_id(id_kind),
            kind,
            loan_id,
            beneficiary_id,
            funding_account_id,
            amount,
            channel: self.channels.select(amount, 0),
            status: PaymentStatus::Initiated,
            retry_count: 0,
            last_error: None,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }

    fn created(&self, record: PaymentRecord) -> CreateResponse {
        log::info!(
            "processor: created {} {} for {:.2} on {}",
            record.kind,
            record.record_id,
            record.amount,
            record.channel
        );
        self.log_event(PaymentEvent::RecordCreated {
            record_id: record.record_id.clone(),
            kind: record.kind,
            amount: record.amount,
            channel: record.channel,
        });
        CreateResponse {
            record,
            created: true,
            message: "created".into(),
        }
    }

    // ── Processing ────────────────────────────────────────────────

    pub fn should_process(&self, record: &PaymentRecord) -> bool {
        match record.status {
            PaymentStatus::Initiated => true,
            PaymentStatus::Suspended => self
                .retry
                .is_retry_eligible(record.updated_at, i64::from(record.retry_count)),
            PaymentStatus::Processing | PaymentStatus::Success | PaymentStatus::Failed => false,
        }
    }

    pub fn evaluate_failure(&self, retry_count: u32, error: &str) -> FailureDecision {
        evaluate_failure(retry_count, self.retry.max_retries(), error)
    }

    pub fn process_by_id(&self, record_id: &str) -> PayResult<ProcessOutcome> {
        let record = self.store.get_record(record_id)?;
        self.process(&record)
    }

    /// Run one attempt for `record` as observed by the caller.
    ///
    /// Errors are infrastructure failures. Provider failures are outcomes,
    /// not errors.
    pub fn process(&self, record: &PaymentRecord) -> PayResult<ProcessOutcome> {
        if !self.should_process(record) {
            log::debug!(
                "processor: skipping {} in status {}",
                record.record_id,
                record.status
            );
            return Ok(ProcessOutcome::Skipped);
        }

        let channel = self.channels.select(record.amount, record.retry_count);
        let now = self.clock.now();
        if !self.store.claim_for_processing(record, channel, now)? {
            log::debug!("processor: {} claimed elsewhere", record.record_id);
            return Ok(ProcessOutcome::LostClaim);
        }
        self.log_event(PaymentEvent::RecordClaimed {
            record_id: record.record_id.clone(),
            channel,
            retry_count: record.retry_count,
        });

        let mut claimed = record.clone();
        claimed.status = PaymentStatus::Processing;
        claimed.channel = channel;
        claimed.updated_at = now;

        let (txn, response) = match self.dispatch(&claimed) {
            Ok(Dispatch::Paid { txn, response }) => (txn, response),
            Ok(Dispatch::Declined(outcome)) => return Ok(outcome),
            Err(e) => {
                // Nothing else can move a claimed record; resolve it here.
                let message = e.to_string();
                log::warn!("processor: attempt on {} aborted: {message}", claimed.record_id);
                self.apply_failure(&claimed, None, &message)?;
                return Err(e);
            }
        };
        self.settle(&claimed, txn, response)
    }

    /// Open a sub-transaction and call the provider. Errors here happen
    /// before any money moved.
    fn dispatch(&self, record: &PaymentRecord) -> PayResult<Dispatch> {
        let beneficiary = self.store.get_beneficiary(&record.beneficiary_id)?;

        let now = self.clock.now();
        let txn = SubTransaction {
            txn_id: self.ids.next_id(IdKind::SubTransaction),
            record_id: record.record_id.clone(),
            reference_id: self.ids.next_id(IdKind::Reference),
            amount: record.amount,
            channel: record.channel,
            status: TransactionStatus::Initiated,
            error: None,
            utr: None,
            settled_on: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_sub_transaction(&txn)?;
        self.log_event(PaymentEvent::AttemptStarted {
            record_id: record.record_id.clone(),
            txn_id: txn.txn_id.clone(),
            reference_id: txn.reference_id.clone(),
            channel: record.channel,
        });

        match self
            .gateway
            .transfer(record, &beneficiary, record.channel, &txn.reference_id)
        {
            Ok(response) => Ok(Dispatch::Paid { txn, response }),
            Err(e) => self
                .apply_failure(record, Some(&txn.txn_id), &e.message)
                .map(Dispatch::Declined),
        }
    }

    /// Book a transfer the provider already made.
    ///
    /// RULE: past this point the record never returns to `Suspended`. A
    /// ledger failure fails the record with its retry count unchanged; if
    /// even that write fails the record stays `Processing` for an operator.
    fn settle(
        &self,
        record: &PaymentRecord,
        txn: SubTransaction,
        response: ProviderResponse,
    ) -> PayResult<ProcessOutcome> {
        let settled_at = self.clock.now();
        let write = SettlementWrite {
            record_id: &record.record_id,
            txn_id: &txn.txn_id,
            account_id: &record.funding_account_id,
            debit_amount: record.amount + self.fees.for_channel(record.channel),
            utr: &response.utr,
            settled_on: settled_at.date_naive(),
            at: settled_at,
        };
        let err = match self.ledger.settle(&write) {
            Ok(balance) => {
                self.notifier.enqueue(&txn.txn_id);
                log::info!(
                    "processor: {} settled on {} (utr {})",
                    record.record_id,
                    record.channel,
                    response.utr
                );
                return Ok(ProcessOutcome::Settled {
                    txn_id: txn.txn_id,
                    utr: response.utr,
                    balance,
                });
            }
            Err(e) => e,
        };

        let error = format!("paid as {} but not booked: {err}", response.utr);
        log::error!("processor: {}: {error}", record.record_id);
        self.store
            .mark_sub_transaction_failed(&txn.txn_id, &error, settled_at)?;
        let outcome =
            self.transition_to(record, PaymentStatus::Failed, record.retry_count, &error)?;
        match err {
            PayError::InsufficientBalance { .. } => Ok(outcome),
            other => Err(other),
        }
    }

    /// Record a failed attempt: close the sub-transaction if there is one
    /// and move the record per `evaluate_failure`.
    fn apply_failure(
        &self,
        record: &PaymentRecord,
        txn_id: Option<&str>,
        error: &str,
    ) -> PayResult<ProcessOutcome> {
        if let Some(txn_id) = txn_id {
            self.store
                .mark_sub_transaction_failed(txn_id, error, self.clock.now())?;
        }
        let decision = self.evaluate_failure(record.retry_count, error);
        self.transition_to(record, decision.status, decision.retry_count, error)
    }

    fn transition_to(
        &self,
        record: &PaymentRecord,
        status: PaymentStatus,
        retry_count: u32,
        error: &str,
    ) -> PayResult<ProcessOutcome> {
        let moved = self.store.record_attempt_failure(
            &record.record_id,
            status,
            retry_count,
            error,
            self.clock.now(),
        )?;
        if !moved {
            let current = self.store.get_record(&record.record_id)?;
            return Err(PayError::InvalidTransition {
                id: record.record_id.clone(),
                status: current.status.to_string(),
                action: "fail",
            });
        }

        let (event, outcome) = match status {
            PaymentStatus::Suspended => (
                PaymentEvent::RecordSuspended {
                    record_id: record.record_id.clone(),
                    retry_count,
                    error: error.to_string(),
                },
                ProcessOutcome::Suspended {
                    retry_count,
                    error: error.to_string(),
                },
            ),
            _ => (
                PaymentEvent::RecordFailed {
                    record_id: record.record_id.clone(),
                    retry_count,
                    error: error.to_string(),
                },
                ProcessOutcome::Failed {
                    retry_count,
                    error: error.to_string(),
                },
            ),
        };
        log::info!(
            "processor: {} -> {status} (retry {retry_count}): {error}",
            record.record_id
        );
        self.log_event(event);
        Ok(outcome)
    }

    // ── Operator actions ──────────────────────────────────────────

    /// Send a record back to `Initiated`. Refused while it is in flight or
    /// once it has settled. The retry count is kept.
    pub fn retry(&self, record_id: &str) -> PayResult<PaymentRecord> {
        let record = self.store.get_record(record_id)?;
        let refused = |status: PaymentStatus| PayError::InvalidTransition {
            id: record_id.to_string(),
            status: status.to_string(),
            action: "retry",
        };
        if matches!(
            record.status,
            PaymentStatus::Processing | PaymentStatus::Success
        ) {
            return Err(refused(record.status));
        }
        if !self.store.reset_for_retry(record_id, self.clock.now())? {
            let current = self.store.get_record(record_id)?;
            return Err(refused(current.status));
        }
        self.log_event(PaymentEvent::RecordReset {
            record_id: record_id.to_string(),
            retry_count: record.retry_count,
        });
        log::info!("processor: {record_id} reset to initiated by operator");
        self.store.get_record(record_id)
    }

    fn log_event(&self, event: PaymentEvent) {
        let appended = EventLogEntry::new(&event, self.clock.now())
            .map_err(PayError::from)
            .and_then(|entry| self.store.append_event(&entry));
        if let Err(e) = appended {
            log::warn!(
                "processor: could not log {} for {}: {e}",
                event.type_name(),
                event.record_id()
            );
        }
    }
}

fn validate_amount(amount: Money) -> PayResult<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(PayError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn already_exists(record: PaymentRecord) -> CreateResponse {
    let message = format!("{} already exists", record.record_id);
    CreateResponse {
        record,
        created: false,
        message,
    }
}

fn is_unique_violation(error: &PayError) -> bool {
    matches!(
        error,
        PayError::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_records_fail_without_incrementing() {
        let d = evaluate_failure(5, 5, "gateway error");
        assert_eq!(d.status, PaymentStatus::Failed);
        assert_eq!(d.retry_count, 5);
    }

    #[test]
    fn transient_errors_suspend_and_increment() {
        for err in ["Gateway timeout", "network down", "limit exceeded", "bank down"] {
            let d = evaluate_failure(2, 5, err);
            assert_eq!(d.status, PaymentStatus::Suspended, "{err}");
            assert_eq!(d.retry_count, 3);
        }
    }

    #[test]
    fn permanent_errors_fail_and_increment() {
        let d = evaluate_failure(0, 5, "Invalid IFSC code");
        assert_eq!(d.status, PaymentStatus::Failed);
        assert_eq!(d.retry_count, 1);
    }

    #[test]
    fn amount_must_be_positive_and_finite() {
        assert!(validate_amount(10.0).is_ok());
        assert!(validate_amount(0.0).is_err());
        assert!(validate_amount(-1.0).is_err());
        assert!(validate_amount(f64::NAN).is_err());
    }
}
