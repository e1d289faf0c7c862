//! Shared primitive types used across the engine.

/// Identifier of a payment record (disbursement or standalone payment).
pub type RecordId = String;

/// A stable, unique identifier for any other entity (loan, account, beneficiary).
pub type EntityId = String;

/// Idempotency key presented to the payment provider, one per attempt.
pub type ReferenceId = String;

/// Monetary amount in the ledger currency (rupees).
pub type Money = f64;
