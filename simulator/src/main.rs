//! Kantor Simulator
//!
//! Drives the exchange engine against a simulated rate feed, then audits the
//! ledger.

use std::time::Duration;

use clap::Parser;
use rust_decimal::Decimal;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod client;
mod controller;
mod metrics;
mod scenario;

use controller::{SimulationConfig, SimulationController};
use scenario::Scenario;

/// Kantor Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Load and invariant simulator for the Kantor exchange engine")]
struct Args {
    /// Number of simulated clients
    #[arg(short, long, default_value = "5")]
    clients: usize,

    /// Scenario to run (built-in name or path to a JSON file)
    #[arg(short, long)]
    scenario: Option<String>,

    /// Random exchanges to run when no scenario is given
    #[arg(short, long, default_value = "1000")]
    exchanges: usize,

    /// Maximum exchanges in flight
    #[arg(long, default_value = "16")]
    concurrency: usize,

    /// Initial base-currency deposit per client
    #[arg(long, default_value = "10000.00")]
    deposit: Decimal,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// How long a failed feed is left alone before retrying, in milliseconds
    #[arg(long, default_value = "100")]
    fallback_ttl_ms: u64,

    /// Bounded wait for a wallet lock, in milliseconds
    #[arg(long, default_value = "5000")]
    lock_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting Kantor simulator");
    info!("Clients: {}", args.clients);

    let mut controller = SimulationController::new(SimulationConfig {
        clients: args.clients,
        seed: args.seed,
        fallback_ttl: Duration::from_millis(args.fallback_ttl_ms),
        lock_timeout: Duration::from_millis(args.lock_timeout_ms),
    })?;

    if let Some(scenario_name) = &args.scenario {
        let scenario = Scenario::load(scenario_name)?;
        controller.run_scenario(&scenario).await?;
    } else {
        controller.initialize(args.deposit).await?;
        controller.run_load(args.exchanges, args.concurrency).await?;
    }

    let report = controller.audit().await?;
    info!(
        wallets = report.wallets,
        transactions = report.transactions,
        "Ledger audit passed"
    );

    // Print metrics
    let metrics = controller.get_metrics().await;
    info!("Simulation complete");
    info!("Total exchanges: {}", metrics.total_exchanges);
    info!("Completed: {}", metrics.completed_exchanges);
    info!("Rejected: {}", metrics.rejected_exchanges);
    info!("Failed: {}", metrics.failed_exchanges);
    for (code, count) in &metrics.errors_by_code {
        info!("  {}: {}", code, count);
    }
    info!("Success rate: {:.1}%", metrics.success_rate() * 100.0);
    info!(
        "Latency avg/p50/p99: {}/{}/{}ms",
        metrics.average_latency_ms(),
        metrics.p50_latency_ms(),
        metrics.p99_latency_ms()
    );
    debug!("Engine metrics:\n{}", controller.engine().metrics().to_prometheus());

    Ok(())
}
