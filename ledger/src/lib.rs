//! Kantor Ledger
//!
//! Per-(user, currency) wallet balances with the non-negative balance
//! invariant, and the append-only transaction log.
//!
//! Balances are only mutated through [`WalletHandle`]s obtained under an
//! exclusive per-wallet lock. Staged debits and credits are committed
//! together with their [`Transaction`](kantor_common::Transaction) record as
//! one atomic unit; dropping a handle without committing discards its changes.

pub mod engine;
pub mod wallet;
pub mod balance;
pub mod lock_manager;
pub mod journal;
pub mod store;
pub mod postgres;

pub use engine::{WalletHandle, WalletLedger};
pub use wallet::Wallet;
pub use balance::BalanceChange;
pub use lock_manager::{LockConfig, WalletLock, WalletLockManager};
pub use journal::{summarize, TransactionLog};
pub use store::{LedgerStore, MemoryLedgerStore};
pub use postgres::PgLedgerStore;
