//! Domain records shared by the processor, the scheduler and the store.
//!
//! Status and channel enums are stored as lowercase / uppercase text
//! columns; the `FromSql`/`ToSql` impls below are the only place that
//! mapping lives.

use crate::{
    error::PayError,
    types::{EntityId, Money, RecordId, ReferenceId},
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Implements text round-tripping (Display, FromStr, SQLite) for a
/// fieldless enum from a table of `Variant => "text"` pairs.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = PayError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(PayError::Validation(format!(
                        "unknown {} '{other}'",
                        stringify!($ty)
                    ))),
                }
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: PayError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

// ── Lifecycle ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Initiated,
    Processing,
    Success,
    Suspended,
    Failed,
}

text_enum!(PaymentStatus {
    Initiated => "initiated",
    Processing => "processing",
    Success => "success",
    Suspended => "suspended",
    Failed => "failed",
});

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// States a worker may claim into `Processing`.
    pub const CLAIMABLE: [PaymentStatus; 2] = [Self::Initiated, Self::Suspended];
}

/// Status of one provider attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Initiated,
    Success,
    Failed,
}

text_enum!(TransactionStatus {
    Initiated => "initiated",
    Success => "success",
    Failed => "failed",
});

/// Settlement rail. Ordered fast → slow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Upi,
    Imps,
    Neft,
}

text_enum!(Channel {
    Upi => "UPI",
    Imps => "IMPS",
    Neft => "NEFT",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Bound to a loan; one per loan.
    Disbursement,
    /// Standalone gateway-routed payment.
    Payment,
}

text_enum!(RecordKind {
    Disbursement => "disbursement",
    Payment => "payment",
});

// ── Records ───────────────────────────────────────────────────

/// The unit the lifecycle state machine operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub record_id: RecordId,
    pub kind: RecordKind,
    pub loan_id: Option<EntityId>,
    pub beneficiary_id: EntityId,
    pub funding_account_id: EntityId,
    pub amount: Money,
    pub channel: Channel,
    pub status: PaymentStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One provider attempt against a payment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTransaction {
    pub txn_id: EntityId,
    pub record_id: RecordId,
    pub reference_id: ReferenceId,
    pub amount: Money,
    pub channel: Channel,
    pub status: TransactionStatus,
    pub error: Option<String>,
    pub utr: Option<String>,
    pub settled_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub loan_id: EntityId,
    pub amount: Money,
    pub beneficiary_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub beneficiary_id: EntityId,
    pub name: String,
    pub account_number: String,
    pub ifsc: String,
    pub bank_name: String,
}

/// Ledger account funding outbound transfers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: EntityId,
    pub balance: Money,
    pub alert_threshold: Money,
}
