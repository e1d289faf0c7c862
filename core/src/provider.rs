//! Payment provider contract, per-rail dispatch and a simulated provider.
//!
//! Providers speak in opaque error text. The only structured error is
//! `DuplicateReference`, which the gateway must reconcile with `fetch`.

use crate::{
    config::ProviderConfig,
    model::Channel,
    rng::SeededRng,
    types::{Money, ReferenceId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub reference_id: ReferenceId,
    pub amount: Money,
    pub channel: Channel,
    pub beneficiary_name: String,
    pub account_number: String,
    pub ifsc: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    Success,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub reference_id: ReferenceId,
    /// Provider-side unique transfer reference.
    pub utr: String,
    pub amount: Money,
    pub channel: Channel,
    pub status: ProviderStatus,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("reference {0} already processed")]
    DuplicateReference(ReferenceId),

    #[error("{0}")]
    Rejected(String),
}

pub trait PaymentProvider: Send + Sync {
    fn transfer(&self, request: &TransferRequest) -> Result<ProviderResponse, ProviderError>;

    fn fetch(&self, reference_id: &str) -> Result<ProviderResponse, ProviderError>;
}

/// One provider handle per rail. Resolved by matching on the channel
/// chosen for the attempt, never by inspecting identifier strings.
#[derive(Clone)]
pub struct RailProviders {
    upi: Arc<dyn PaymentProvider>,
    imps: Arc<dyn PaymentProvider>,
    neft: Arc<dyn PaymentProvider>,
}

impl RailProviders {
    pub fn new(
        upi: Arc<dyn PaymentProvider>,
        imps: Arc<dyn PaymentProvider>,
        neft: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self { upi, imps, neft }
    }

    /// The same provider on every rail.
    pub fn uniform(provider: Arc<dyn PaymentProvider>) -> Self {
        Self {
            upi: provider.clone(),
            imps: provider.clone(),
            neft: provider,
        }
    }

    pub fn for_channel(&self, channel: Channel) -> &dyn PaymentProvider {
        match channel {
            Channel::Upi => self.upi.as_ref(),
            Channel::Imps => self.imps.as_ref(),
            Channel::Neft => self.neft.as_ref(),
        }
    }
}

// ── Simulated provider ────────────────────────────────────────────

const TRANSIENT_ERRORS: [&str; 4] = [
    "gateway error: upstream timeout",
    "network error: connection reset by peer",
    "transaction limit exceeded for the day",
    "beneficiary bank is down",
];

const PERMANENT_ERRORS: [&str; 2] = ["beneficiary account closed", "transaction declined by bank"];

/// In-process stand-in for the bank gateway. Idempotent on reference id;
/// outcomes are drawn from a seeded stream so runs are reproducible.
pub struct SimulatedProvider {
    config: ProviderConfig,
    rng: SeededRng,
    processed: Mutex<HashMap<ReferenceId, ProviderResponse>>,
    clock: Arc<dyn crate::clock::Clock>,
}

impl SimulatedProvider {
    pub fn new(config: ProviderConfig, rng: SeededRng, clock: Arc<dyn crate::clock::Clock>) -> Self {
        Self {
            config,
            rng,
            processed: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Every successful transfer so far, ordered by reference id.
    /// This is what the bank would put on its statement.
    pub fn settled(&self) -> Vec<ProviderResponse> {
        let processed = self.processed.lock().unwrap_or_else(|e| e.into_inner());
        let mut settled: Vec<_> = processed
            .values()
            .filter(|r| r.status == ProviderStatus::Success)
            .cloned()
            .collect();
        settled.sort_by(|a, b| a.reference_id.cmp(&b.reference_id));
        settled
    }
}

/// Four letters, a zero, six alphanumerics.
pub fn is_valid_ifsc(ifsc: &str) -> bool {
    let bytes = ifsc.as_bytes();
    bytes.len() == 11
        && bytes[..4].iter().all(u8::is_ascii_uppercase)
        && bytes[4] == b'0'
        && bytes[5..].iter().all(u8::is_ascii_alphanumeric)
}

impl PaymentProvider for SimulatedProvider {
    fn transfer(&self, request: &TransferRequest) -> Result<ProviderResponse, ProviderError> {
        let mut processed = self.processed.lock().unwrap_or_else(|e| e.into_inner());
        if processed.contains_key(&request.reference_id) {
            return Err(ProviderError::DuplicateReference(request.reference_id.clone()));
        }

        if !is_valid_ifsc(&request.ifsc) {
            return Err(ProviderError::Rejected("Invalid IFSC code".into()));
        }

        let roll = self.rng.next_f64();
        if roll < self.config.transient_failure_rate {
            let idx = self.rng.next_u64_below(TRANSIENT_ERRORS.len() as u64) as usize;
            return Err(ProviderError::Rejected(TRANSIENT_ERRORS[idx].into()));
        }
        if roll < self.config.transient_failure_rate + self.config.permanent_failure_rate {
            let idx = self.rng.next_u64_below(PERMANENT_ERRORS.len() as u64) as usize;
            return Err(ProviderError::Rejected(PERMANENT_ERRORS[idx].into()));
        }

        let response = ProviderResponse {
            reference_id: request.reference_id.clone(),
            utr: format!(
                "{}{:012}",
                request.channel.as_str(),
                self.rng.next_u64_below(1_000_000_000_000)
            ),
            amount: request.amount,
            channel: request.channel,
            status: ProviderStatus::Success,
            processed_at: self.clock.now(),
        };
        processed.insert(request.reference_id.clone(), response.clone());
        Ok(response)
    }

    fn fetch(&self, reference_id: &str) -> Result<ProviderResponse, ProviderError> {
        let processed = self.processed.lock().unwrap_or_else(|e| e.into_inner());
        processed
            .get(reference_id)
            .cloned()
            .ok_or_else(|| ProviderError::Rejected(format!("reference {reference_id} not found")))
    }
}
