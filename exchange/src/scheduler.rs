//! Periodic rate sync.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::engine::ExchangeEngine;

/// Triggers `sync_rates` on a fixed interval until shut down.
pub struct RateSyncScheduler {
    engine: Arc<ExchangeEngine>,
    config: SyncConfig,
}

impl RateSyncScheduler {
    pub fn new(engine: Arc<ExchangeEngine>, config: SyncConfig) -> Self {
        Self { engine, config }
    }

    /// Run one sync. Failures are logged, never propagated.
    pub async fn tick(&self) -> bool {
        match self.engine.sync_rates().await {
            Ok(report) => {
                info!(
                    effective_date = %report.effective_date,
                    inserted = report.inserted,
                    existing = report.existing,
                    "Scheduled rate sync complete"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, retry_after_ms = e.retry_after_ms(), "Scheduled rate sync failed");
                false
            }
        }
    }

    /// Loop until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately.
        if !self.config.run_on_start {
            ticker.tick().await;
        }

        info!(interval_secs = self.config.interval.as_secs(), "Rate sync scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Rate sync scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kantor_common::Currency;
    use kantor_fx::{FeedRate, MemoryRateStore, MockRateFeed, RateResolver, RateResolverConfig, RateTable};
    use kantor_ledger::{LockConfig, MemoryLedgerStore};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn engine(feed: Arc<MockRateFeed>) -> Arc<ExchangeEngine> {
        let resolver = Arc::new(RateResolver::new(
            feed,
            Arc::new(MemoryRateStore::new()),
            RateResolverConfig::default(),
        ));
        Arc::new(ExchangeEngine::new(
            Arc::new(MemoryLedgerStore::new()),
            resolver,
            LockConfig::default(),
        ))
    }

    fn feed() -> Arc<MockRateFeed> {
        let feed = Arc::new(MockRateFeed::new("mock"));
        feed.set_current(RateTable::new(
            chrono::Utc::now().date_naive(),
            vec![FeedRate {
                code: Currency::chf(),
                name: "frank szwajcarski".to_string(),
                bid: dec!(4.50),
                ask: dec!(4.60),
            }],
        ));
        feed
    }

    #[tokio::test]
    async fn test_tick_swallows_failures() {
        let feed = feed();
        let scheduler = RateSyncScheduler::new(engine(feed.clone()), SyncConfig::default());

        assert!(scheduler.tick().await);
        feed.set_failing(true);
        assert!(!scheduler.tick().await);
    }

    #[tokio::test]
    async fn test_run_syncs_until_shutdown() {
        let feed = feed();
        let engine = engine(feed.clone());
        let scheduler = RateSyncScheduler::new(
            engine.clone(),
            SyncConfig {
                interval: Duration::from_millis(20),
                run_on_start: true,
            },
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(Duration::from_millis(70)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        let syncs = engine.metrics().snapshot().rate_syncs_ok;
        assert!(syncs >= 2, "expected repeated syncs, got {syncs}");
        assert_eq!(feed.calls() as u64, syncs);
    }
}
