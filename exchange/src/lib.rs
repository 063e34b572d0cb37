//! Kantor Exchange
//!
//! The exchange engine converts funds between a user's wallets at current
//! rates. It holds both wallet locks for the whole operation and commits the
//! debit, the credit and the transaction record as one unit.

pub mod config;
pub mod engine;
pub mod metrics;
pub mod scheduler;
pub mod state;

pub use config::{ExchangeConfig, SyncConfig};
pub use engine::ExchangeEngine;
pub use metrics::{ActiveExchange, Metrics, MetricsSnapshot, SharedMetrics};
pub use scheduler::RateSyncScheduler;
pub use state::{ExchangeProgress, ExchangeState};
