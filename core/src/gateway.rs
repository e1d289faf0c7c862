//! Gateway invoker: one transfer attempt against the provider for a rail.
//!
//! A `DuplicateReference` answer means the provider already saw this
//! reference. The invoker fetches the prior outcome and treats a settled
//! transfer as this attempt's success, so a retried reference never pays
//! out twice.

use crate::{
    model::{Beneficiary, Channel, PaymentRecord},
    provider::{ProviderError, ProviderResponse, ProviderStatus, RailProviders, TransferRequest},
};
use thiserror::Error;

/// Substrings (matched case-insensitively) that mark an error as worth
/// retrying. Everything else is permanent.
pub const TRANSIENT_MARKERS: [&str; 6] = [
    "gateway",
    "network",
    "timeout",
    "limit exceeded",
    "inactive",
    "bank down",
];

pub fn is_transient(error: &str) -> bool {
    let lower = error.to_lowercase();
    // "bank is down" reads the same as "bank down".
    let squashed = lower.replace(" is ", " ");
    TRANSIENT_MARKERS
        .iter()
        .any(|m| lower.contains(m) || squashed.contains(m))
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct GatewayError {
    pub message: String,
}

impl GatewayError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub struct GatewayInvoker {
    providers: RailProviders,
}

impl GatewayInvoker {
    pub fn new(providers: RailProviders) -> Self {
        Self { providers }
    }

    pub fn transfer(
        &self,
        record: &PaymentRecord,
        beneficiary: &Beneficiary,
        channel: Channel,
        reference_id: &str,
    ) -> Result<ProviderResponse, GatewayError> {
        let provider = self.providers.for_channel(channel);
        let request = TransferRequest {
            reference_id: reference_id.to_string(),
            amount: record.amount,
            channel,
            beneficiary_name: beneficiary.name.clone(),
            account_number: beneficiary.account_number.clone(),
            ifsc: beneficiary.ifsc.clone(),
        };

        match provider.transfer(&request) {
            Ok(response) => Ok(response),
            Err(ProviderError::DuplicateReference(_)) => {
                log::info!(
                    "gateway: {reference_id} already known to {channel} provider, fetching prior outcome"
                );
                match provider.fetch(reference_id) {
                    Ok(prior) if prior.status == ProviderStatus::Success => Ok(prior),
                    Ok(prior) => Err(GatewayError::new(format!(
                        "reference {reference_id} already processed with status {:?}",
                        prior.status
                    ))),
                    Err(e) => Err(GatewayError::new(format!(
                        "gateway error: fetch of {reference_id} failed: {e}"
                    ))),
                }
            }
            Err(ProviderError::Rejected(message)) => Err(GatewayError::new(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_markers_match_case_insensitively() {
        assert!(is_transient("Gateway Error"));
        assert!(is_transient("NETWORK unreachable"));
        assert!(is_transient("upstream Timeout"));
        assert!(is_transient("daily limit exceeded"));
        assert!(is_transient("Beneficiary INACTIVE"));
        assert!(is_transient("bank down for maintenance"));
        assert!(is_transient("beneficiary bank is down"));
    }

    #[test]
    fn other_errors_are_permanent() {
        assert!(!is_transient("Invalid IFSC code"));
        assert!(!is_transient("beneficiary account closed"));
        assert!(!is_transient(""));
    }
}
