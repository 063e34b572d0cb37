//! Kantor Exchange Binary
//!
//! Runs the exchange engine with the scheduled rate sync.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kantor_exchange::{ExchangeConfig, ExchangeEngine, RateSyncScheduler};
use kantor_fx::{MemoryRateStore, NbpRateFeed, PgRateStore, RateResolver, RateStore};
use kantor_ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ExchangeConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Kantor exchange");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let (ledger_store, rate_store) = open_stores(&config).await?;

    let feed = NbpRateFeed::new(config.feed.clone())
        .map_err(|e| anyhow::anyhow!("Failed to build rate feed: {}", e))?;
    let resolver = Arc::new(RateResolver::new(
        Arc::new(feed),
        rate_store,
        config.resolver.clone(),
    ));
    let engine = Arc::new(ExchangeEngine::new(
        ledger_store,
        resolver,
        config.lock.clone(),
    ));

    info!(
        base_currency = %config.base_currency(),
        feed_url = %config.feed.base_url,
        sync_interval_secs = config.sync.interval.as_secs(),
        "Exchange engine ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = RateSyncScheduler::new(engine.clone(), config.sync.clone());
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    // Start lock cleanup task
    let lock_engine = engine.clone();
    let cleanup_handle = tokio::spawn(async move {
        lock_engine.ledger().lock_manager().run_cleanup_loop().await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // The scheduler also stops if the sender is dropped.
    let _ = shutdown_tx.send(true);
    cleanup_handle.abort();
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Rate sync scheduler panicked");
    }

    let snapshot = engine.metrics().snapshot();
    info!(metrics = %serde_json::to_string(&snapshot)?, "Exchange shutdown complete");
    Ok(())
}

async fn open_stores(
    config: &ExchangeConfig,
) -> anyhow::Result<(Arc<dyn LedgerStore>, Arc<dyn RateStore>)> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url).await?;
            sqlx::migrate!("../migrations").run(&pool).await?;
            info!("Connected to Postgres, schema up to date");
            Ok((
                Arc::new(PgLedgerStore::new(pool.clone())),
                Arc::new(PgRateStore::new(pool)),
            ))
        }
        None => {
            warn!("DATABASE_URL not set, balances and rates are kept in memory only");
            Ok((
                Arc::new(MemoryLedgerStore::new()),
                Arc::new(MemoryRateStore::new()),
            ))
        }
    }
}
