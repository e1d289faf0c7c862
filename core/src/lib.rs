pub mod channel;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod gateway;
pub mod ids;
pub mod ledger;
pub mod model;
pub mod notifier;
pub mod processor;
pub mod provider;
pub mod reconciliation;
pub mod retry;
pub mod rng;
pub mod scheduler;
pub mod store;
pub mod types;
