//! Audit events, one per lifecycle transition.
//!
//! RULE: Events are appended, never updated or deleted.
//! The payload is the JSON encoding of `PaymentEvent`.

use crate::{
    model::{Channel, RecordKind},
    types::{Money, RecordId, ReferenceId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Variants are added over time, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    RecordCreated {
        record_id: RecordId,
        kind: RecordKind,
        amount: Money,
        channel: Channel,
    },
    RecordClaimed {
        record_id: RecordId,
        channel: Channel,
        retry_count: u32,
    },
    AttemptStarted {
        record_id: RecordId,
        txn_id: String,
        reference_id: ReferenceId,
        channel: Channel,
    },
    RecordSettled {
        record_id: RecordId,
        txn_id: String,
        utr: String,
        debited: Money,
    },
    RecordSuspended {
        record_id: RecordId,
        retry_count: u32,
        error: String,
    },
    RecordFailed {
        record_id: RecordId,
        retry_count: u32,
        error: String,
    },
    RecordReset {
        record_id: RecordId,
        retry_count: u32,
    },
}

impl PaymentEvent {
    pub fn record_id(&self) -> &str {
        match self {
            Self::RecordCreated { record_id, .. }
            | Self::RecordClaimed { record_id, .. }
            | Self::AttemptStarted { record_id, .. }
            | Self::RecordSettled { record_id, .. }
            | Self::RecordSuspended { record_id, .. }
            | Self::RecordFailed { record_id, .. }
            | Self::RecordReset { record_id, .. } => record_id,
        }
    }

    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RecordCreated { .. } => "record_created",
            Self::RecordClaimed { .. } => "record_claimed",
            Self::AttemptStarted { .. } => "attempt_started",
            Self::RecordSettled { .. } => "record_settled",
            Self::RecordSuspended { .. } => "record_suspended",
            Self::RecordFailed { .. } => "record_failed",
            Self::RecordReset { .. } => "record_reset",
        }
    }
}

/// A row in the event_log table.
#[derive(Debug, Clone)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub record_id: RecordId,
    pub event_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn new(event: &PaymentEvent, at: DateTime<Utc>) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            record_id: event.record_id().to_string(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
            created_at: at,
        })
    }

    pub fn decode(&self) -> serde_json::Result<PaymentEvent> {
        serde_json::from_str(&self.payload)
    }
}
