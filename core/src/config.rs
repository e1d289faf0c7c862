use crate::model::{Channel, PaymentStatus};
use crate::retry;
use crate::types::Money;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ── Retry policy ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_secs: i64,
    pub max_delay_secs: i64,
    /// Multiplicative jitter spread, 0.2 = ±20%.
    pub jitter_pct: f64,
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: retry::INITIAL_DELAY_SECS,
            max_delay_secs: retry::MAX_DELAY_SECS,
            jitter_pct: retry::JITTER_PERCENT,
            max_retries: retry::MAX_RETRIES,
        }
    }
}

// ── Channel selection ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelFees {
    pub upi: Money,
    pub imps: Money,
    pub neft: Money,
}

impl Default for ChannelFees {
    fn default() -> Self {
        Self {
            upi: 0.0,
            imps: 5.0,
            neft: 2.5,
        }
    }
}

impl ChannelFees {
    pub fn for_channel(&self, channel: Channel) -> Money {
        match channel {
            Channel::Upi => self.upi,
            Channel::Imps => self.imps,
            Channel::Neft => self.neft,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Upper bound (inclusive) for the fast rail on a first attempt.
    pub fast_limit: Money,
    /// Upper bound (inclusive) for the medium rail on a first attempt.
    pub medium_limit: Money,
    /// Retry count at which small amounts move to the medium rail.
    pub switch_at: u32,
    pub fees: ChannelFees,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            fast_limit: 100_000.0,
            medium_limit: 500_000.0,
            switch_at: 2,
            fees: ChannelFees::default(),
        }
    }
}

// ── Reconciliation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub tolerance: Money,
    /// Counterparty statuses that count as settled (compared case-insensitively).
    pub settled_statuses: Vec<String>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            settled_statuses: vec!["SUCCESS".into(), "COMPLETED".into()],
        }
    }
}

// ── Scheduler ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPolicyConfig {
    pub name: String,
    pub statuses: Vec<PaymentStatus>,
    pub channels: Vec<Channel>,
    pub page_size: usize,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub policies: Vec<BatchPolicyConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policies: vec![
                BatchPolicyConfig {
                    name: "mixed".into(),
                    statuses: vec![PaymentStatus::Initiated],
                    channels: vec![Channel::Upi, Channel::Imps],
                    page_size: 50,
                    poll_interval_ms: 5_000,
                },
                BatchPolicyConfig {
                    name: "slow_rail".into(),
                    statuses: vec![PaymentStatus::Initiated, PaymentStatus::Suspended],
                    channels: vec![Channel::Neft],
                    page_size: 100,
                    poll_interval_ms: 30_000,
                },
                BatchPolicyConfig {
                    name: "suspended_retry".into(),
                    statuses: vec![PaymentStatus::Suspended],
                    channels: vec![Channel::Upi, Channel::Imps],
                    page_size: 50,
                    poll_interval_ms: 10_000,
                },
            ],
        }
    }
}

// ── Simulated provider ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Probability that a transfer is rejected with a transient error.
    pub transient_failure_rate: f64,
    /// Probability that a transfer is rejected with a permanent error.
    pub permanent_failure_rate: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            transient_failure_rate: 0.10,
            permanent_failure_rate: 0.02,
        }
    }
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub seed: u64,
    /// Ledger account debited for loan disbursements.
    pub funding_account_id: String,
    pub retry: RetryConfig,
    pub channels: ChannelConfig,
    pub reconciliation: ReconciliationConfig,
    pub scheduler: SchedulerConfig,
    pub provider: ProviderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            funding_account_id: "ACC-FUNDING".into(),
            retry: RetryConfig::default(),
            channels: ChannelConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            scheduler: SchedulerConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing sections fall back to defaults.
    /// In tests, use `EngineConfig::default()`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Cannot parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.channels.fast_limit <= self.channels.medium_limit,
            "channels.fast_limit must not exceed channels.medium_limit"
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&self.retry.jitter_pct),
            "retry.jitter_pct must be in [0, 1)"
        );
        for policy in &self.scheduler.policies {
            anyhow::ensure!(
                policy.page_size > 0,
                "scheduler policy '{}' has page_size 0",
                policy.name
            );
        }
        Ok(())
    }
}
