//! Rail selection.
//!
//! First attempt tiers by amount. Retries only ever escalate:
//! small amounts move to the medium rail exactly at the switch count,
//! everything else goes to the slow rail. The rule reads the current
//! retry count only, never the history of earlier rails.

use crate::{config::ChannelConfig, model::Channel, types::Money};

#[derive(Debug, Clone)]
pub struct ChannelSelector {
    fast_limit: Money,
    medium_limit: Money,
    switch_at: u32,
}

impl Default for ChannelSelector {
    fn default() -> Self {
        Self::new(&ChannelConfig::default())
    }
}

impl ChannelSelector {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            fast_limit: config.fast_limit,
            medium_limit: config.medium_limit,
            switch_at: config.switch_at,
        }
    }

    pub fn select(&self, amount: Money, retry_count: u32) -> Channel {
        if retry_count == 0 {
            return if amount <= self.fast_limit {
                Channel::Upi
            } else if amount <= self.medium_limit {
                Channel::Imps
            } else {
                Channel::Neft
            };
        }

        if retry_count == self.switch_at && amount <= self.fast_limit {
            Channel::Imps
        } else {
            Channel::Neft
        }
    }
}
