//! Per-wallet exclusive locks.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use kantor_common::{constants, DurationExt, ExchangeError, Result, WalletKey};

type LockTable = DashMap<WalletKey, Arc<Mutex<()>>>;

/// Lock configuration.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Bounded wait for a single wallet lock.
    pub acquire_timeout: Duration,
    /// Lock table cleanup interval.
    pub cleanup_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: constants::lock_acquisition_timeout().as_std(),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// An exclusive lock on one wallet. Released on drop.
pub struct WalletLock {
    key: WalletKey,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl WalletLock {
    pub fn key(&self) -> &WalletKey {
        &self.key
    }
}

impl fmt::Debug for WalletLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletLock").field("key", &self.key).finish()
    }
}

impl Drop for WalletLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table still refers to the mutex: nobody holds or waits on it.
        self.table
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Manager for keyed wallet locks.
///
/// Callers needing several wallets must take them in one `acquire_all` call so
/// acquisition follows the total order on [`WalletKey`]. An entry leaves the
/// table when its last lock is released; entries abandoned by cancelled
/// waiters are swept by [`WalletLockManager::run_cleanup_loop`].
pub struct WalletLockManager {
    locks: Arc<LockTable>,
    config: LockConfig,
}

impl WalletLockManager {
    /// Create a new lock manager.
    pub fn new(config: LockConfig) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire the lock for one wallet, waiting at most `acquire_timeout`.
    pub async fn acquire(&self, key: &WalletKey) -> Result<WalletLock> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let started = Instant::now();
        let acquired = tokio::time::timeout(self.config.acquire_timeout, mutex.lock_owned()).await;
        match acquired {
            Ok(guard) => {
                debug!(wallet = %key, waited_ms = started.elapsed().as_millis() as u64, "Wallet lock acquired");
                Ok(WalletLock {
                    key: key.clone(),
                    guard: Some(guard),
                    table: self.locks.clone(),
                })
            }
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(wallet = %key, waited_ms, "Timed out waiting for wallet lock");
                self.locks
                    .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
                Err(ExchangeError::ConcurrencyTimeout {
                    wallet: key.clone(),
                    waited_ms,
                })
            }
        }
    }

    /// Acquire several wallet locks in ascending key order.
    ///
    /// Duplicate keys are locked once. On timeout every lock already taken is
    /// released before the error is returned.
    pub async fn acquire_all(&self, keys: &[WalletKey]) -> Result<Vec<WalletLock>> {
        let mut ordered: Vec<&WalletKey> = keys.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut held = Vec::with_capacity(ordered.len());
        for key in ordered {
            held.push(self.acquire(key).await?);
        }
        Ok(held)
    }

    /// Whether some task currently holds the lock for `key`.
    pub fn is_locked(&self, key: &WalletKey) -> bool {
        self.locks
            .get(key)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of tracked lock entries.
    pub fn tracked_count(&self) -> usize {
        self.locks.len()
    }

    /// Forget entries nobody holds or waits on.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
        before.saturating_sub(self.locks.len())
    }

    /// Run cleanup loop to prune idle lock entries.
    pub async fn run_cleanup_loop(&self) {
        loop {
            tokio::time::sleep(self.config.cleanup_interval).await;
            let pruned = self.prune_idle();
            if pruned > 0 {
                debug!(pruned, tracked = self.tracked_count(), "Pruned idle wallet locks");
            }
        }
    }
}

impl Default for WalletLockManager {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kantor_common::{Currency, UserId};

    fn key(user: &str, currency: Currency) -> WalletKey {
        WalletKey::new(UserId::new(user), currency)
    }

    fn manager(timeout_ms: u64) -> WalletLockManager {
        WalletLockManager::new(LockConfig {
            acquire_timeout: Duration::from_millis(timeout_ms),
            cleanup_interval: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_and_released_on_drop() {
        let manager = manager(50);
        let usd = key("u1", Currency::usd());

        let held = manager.acquire(&usd).await.unwrap();
        assert!(manager.is_locked(&usd));

        let err = manager.acquire(&usd).await.unwrap_err();
        assert!(matches!(err, ExchangeError::ConcurrencyTimeout { .. }));

        drop(held);
        assert!(!manager.is_locked(&usd));
        tokio_test::assert_ok!(manager.acquire(&usd).await);
    }

    #[tokio::test]
    async fn test_disjoint_wallets_do_not_contend() {
        let manager = manager(50);
        let _a = manager.acquire(&key("u1", Currency::usd())).await.unwrap();
        let _b = manager.acquire(&key("u2", Currency::usd())).await.unwrap();
        let _c = manager.acquire(&key("u1", Currency::eur())).await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_all_sorts_and_dedups() {
        let manager = manager(50);
        let usd = key("u1", Currency::usd());
        let eur = key("u1", Currency::eur());

        let held = manager
            .acquire_all(&[usd.clone(), eur.clone(), usd.clone()])
            .await
            .unwrap();

        let keys: Vec<_> = held.iter().map(|l| l.key().clone()).collect();
        assert_eq!(keys, vec![eur, usd]);
    }

    #[tokio::test]
    async fn test_acquire_all_releases_on_timeout() {
        let manager = manager(50);
        let eur = key("u1", Currency::eur());
        let usd = key("u1", Currency::usd());

        let blocker = manager.acquire(&usd).await.unwrap();
        let err = manager.acquire_all(&[usd.clone(), eur.clone()]).await;
        assert!(err.is_err());
        assert!(!manager.is_locked(&eur));
        drop(blocker);
    }

    #[tokio::test]
    async fn test_opposite_order_requests_do_not_deadlock() {
        let manager = Arc::new(manager(1_000));
        let eur = key("u1", Currency::eur());
        let usd = key("u1", Currency::usd());

        let mut tasks = Vec::new();
        for i in 0..20 {
            let manager = manager.clone();
            let keys = if i % 2 == 0 {
                vec![eur.clone(), usd.clone()]
            } else {
                vec![usd.clone(), eur.clone()]
            };
            tasks.push(tokio::spawn(async move {
                let _held = manager.acquire_all(&keys).await?;
                tokio::task::yield_now().await;
                Ok::<_, ExchangeError>(())
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_released_entries_leave_the_table() {
        let manager = Arc::new(manager(1_000));

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    let shared = manager.acquire(&key("shared", Currency::pln())).await?;
                    let own = manager.acquire(&key(&format!("u{i}"), Currency::pln())).await?;
                    tokio::task::yield_now().await;
                    drop((shared, own));
                    Ok::<_, ExchangeError>(())
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(manager.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_loop_prunes_abandoned_waiters() {
        let manager = Arc::new(manager(1_000));
        let usd = key("u1", Currency::usd());

        let held = manager.acquire(&usd).await.unwrap();
        let mut waiter = Box::pin(manager.acquire(&usd));
        assert!(tokio::time::timeout(Duration::from_millis(5), &mut waiter)
            .await
            .is_err());

        // The waiter still refers to the mutex when the holder releases it.
        drop(held);
        drop(waiter);
        assert_eq!(manager.tracked_count(), 1);

        let sweeper = manager.clone();
        let cleanup = tokio::spawn(async move { sweeper.run_cleanup_loop().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cleanup.abort();

        assert_eq!(manager.tracked_count(), 0);
        tokio_test::assert_ok!(manager.acquire(&usd).await);
    }

    #[tokio::test]
    async fn test_prune_idle_keeps_held_entries() {
        let manager = manager(50);
        let held = manager.acquire(&key("u1", Currency::usd())).await.unwrap();

        assert_eq!(manager.prune_idle(), 0);
        assert_eq!(manager.tracked_count(), 1);
        drop(held);
        assert_eq!(manager.tracked_count(), 0);
    }
}
