//! Simulation controller.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use kantor_common::{Currency, TransactionType, UserId, WalletKey};
use kantor_exchange::ExchangeEngine;
use kantor_fx::{FeedRate, MemoryRateStore, MockRateFeed, RateResolver, RateResolverConfig, RateTable};
use kantor_ledger::{LockConfig, MemoryLedgerStore};

use crate::client::{simulated_currencies, ClientFactory, SimulatedClient};
use crate::metrics::SimulationMetrics;
use crate::scenario::{Expect, Scenario, ScenarioStep};

/// Simulation settings.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub clients: usize,
    pub seed: Option<u64>,
    pub fallback_ttl: Duration,
    pub lock_timeout: Duration,
}

/// Result of the ledger audit.
#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    pub wallets: usize,
    pub transactions: usize,
}

/// One planned exchange of a load run.
#[derive(Debug, Clone)]
struct PlannedExchange {
    client: UserId,
    from: Currency,
    to: Currency,
    amount: Decimal,
}

/// Drives an in-memory engine with scenarios or random load.
pub struct SimulationController {
    engine: Arc<ExchangeEngine>,
    feed: Arc<MockRateFeed>,
    clients: Vec<SimulatedClient>,
    rng: StdRng,
    metrics: Arc<Mutex<SimulationMetrics>>,
    /// Users addressed by scenario steps.
    scenario_users: Mutex<BTreeSet<UserId>>,
}

/// The table served by the simulated feed, effective today.
pub fn simulated_table() -> RateTable {
    let rate = |code: Currency, name: &str, bid: Decimal, ask: Decimal| FeedRate {
        code,
        name: name.to_string(),
        bid,
        ask,
    };
    RateTable::new(
        chrono::Utc::now().date_naive(),
        vec![
            rate(Currency::usd(), "dolar amerykański", Decimal::new(396, 2), Decimal::new(400, 2)),
            rate(Currency::eur(), "euro", Decimal::new(430, 2), Decimal::new(438, 2)),
            rate(Currency::gbp(), "funt szterling", Decimal::new(500, 2), Decimal::new(510, 2)),
            rate(Currency::chf(), "frank szwajcarski", Decimal::new(450, 2), Decimal::new(460, 2)),
        ],
    )
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(config: SimulationConfig) -> anyhow::Result<Self> {
        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let feed = Arc::new(MockRateFeed::new("simulated"));
        feed.set_current(simulated_table());

        let resolver = Arc::new(RateResolver::new(
            feed.clone(),
            Arc::new(MemoryRateStore::new()),
            RateResolverConfig {
                fallback_ttl: chrono::Duration::from_std(config.fallback_ttl)?,
                ..RateResolverConfig::default()
            },
        ));
        let engine = Arc::new(ExchangeEngine::new(
            Arc::new(MemoryLedgerStore::new()),
            resolver,
            LockConfig {
                acquire_timeout: config.lock_timeout,
                ..LockConfig::default()
            },
        ));

        Ok(Self {
            engine,
            feed,
            clients: ClientFactory::create_clients(config.clients),
            rng,
            metrics: Arc::new(Mutex::new(SimulationMetrics::new())),
            scenario_users: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn engine(&self) -> &Arc<ExchangeEngine> {
        &self.engine
    }

    /// Fund every client's base wallet.
    pub async fn initialize(&self, initial_deposit: Decimal) -> anyhow::Result<()> {
        info!(clients = self.clients.len(), deposit = %initial_deposit, "Initializing simulation");

        for client in &self.clients {
            self.engine.deposit(&client.id, initial_deposit).await?;
            debug!(client = %client.id, name = %client.name, "Client funded");
        }

        Ok(())
    }

    /// Run a scenario, failing on the first unmet expectation.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(name = %scenario.name, description = %scenario.description, "Running scenario");

        for (index, step) in scenario.steps.iter().enumerate() {
            self.execute_step(step)
                .await
                .map_err(|e| anyhow::anyhow!("step {} failed: {}", index + 1, e))?;
        }

        Ok(())
    }

    /// Run `count` random exchanges with at most `concurrency` in flight.
    pub async fn run_load(&mut self, count: usize, concurrency: usize) -> anyhow::Result<()> {
        if self.clients.is_empty() {
            return Err(anyhow::anyhow!("load run needs at least one client"));
        }

        let plan = self.plan(count);
        info!(exchanges = count, concurrency, "Running load");

        let engine = self.engine.clone();
        let metrics = self.metrics.clone();
        futures::stream::iter(plan)
            .for_each_concurrent(concurrency.max(1), |planned| {
                let engine = engine.clone();
                let metrics = metrics.clone();
                async move {
                    let started = Instant::now();
                    let result = engine
                        .exchange(&planned.client, &planned.from, &planned.to, planned.amount)
                        .await;
                    let mut metrics = metrics.lock().await;
                    match result {
                        Ok(_) => metrics.record_success(started.elapsed().as_millis() as u64),
                        Err(e) => metrics.record_error(e.error_code(), e.is_rejection()),
                    }
                }
            })
            .await;

        Ok(())
    }

    fn plan(&mut self, count: usize) -> Vec<PlannedExchange> {
        let currencies = simulated_currencies();
        (0..count)
            .map(|_| {
                let client = self.clients[self.rng.gen_range(0..self.clients.len())].id.clone();
                let from = self.rng.gen_range(0..currencies.len());
                let mut to = self.rng.gen_range(0..currencies.len());
                while to == from {
                    to = self.rng.gen_range(0..currencies.len());
                }
                PlannedExchange {
                    client,
                    from: currencies[from].clone(),
                    to: currencies[to].clone(),
                    amount: Decimal::new(self.rng.gen_range(100..50_000), 2),
                }
            })
            .collect()
    }

    /// Check that every balance is non-negative and equals the replay of the
    /// user's transactions.
    pub async fn audit(&self) -> anyhow::Result<AuditReport> {
        let store = self.engine.ledger().store();
        let mut report = AuditReport::default();
        let mut recorded_exchanges = 0u64;

        let mut users: Vec<UserId> = self.clients.iter().map(|c| c.id.clone()).collect();
        users.extend(self.scenario_users.lock().await.iter().cloned());
        users.sort();
        users.dedup();

        for user in &users {
            let wallets = store.wallets_for_user(user).await?;
            let transactions = store.all_transactions_for_user(user).await?;

            let mut replayed: BTreeMap<Currency, Decimal> = BTreeMap::new();
            for tx in transactions.iter().filter(|t| t.is_completed()) {
                let (Some(from), Some(to)) = (&tx.from_currency, &tx.to_currency) else {
                    continue;
                };
                if tx.transaction_type != TransactionType::Deposit {
                    *replayed.entry(from.clone()).or_default() -= tx.from_amount;
                    recorded_exchanges += 1;
                }
                *replayed.entry(to.clone()).or_default() += tx.to_amount;
            }

            for wallet in &wallets {
                if wallet.balance < Decimal::ZERO {
                    return Err(anyhow::anyhow!("negative balance in {}", wallet.key));
                }
                let expected = replayed.remove(wallet.currency()).unwrap_or_default();
                if wallet.balance != expected {
                    return Err(anyhow::anyhow!(
                        "{} holds {} but its transactions sum to {}",
                        wallet.key,
                        wallet.balance,
                        expected
                    ));
                }
            }
            if let Some((currency, amount)) = replayed.into_iter().find(|(_, a)| !a.is_zero()) {
                return Err(anyhow::anyhow!(
                    "{} has {} {} in transactions but no wallet",
                    user,
                    amount,
                    currency
                ));
            }

            report.wallets += wallets.len();
            report.transactions += transactions.len();
        }

        let engine_completed = self.engine.metrics().snapshot().exchanges_completed;
        if recorded_exchanges != engine_completed {
            return Err(anyhow::anyhow!(
                "{} exchanges recorded but engine completed {}",
                recorded_exchanges,
                engine_completed
            ));
        }

        Ok(report)
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        if let ScenarioStep::Deposit { client, .. } | ScenarioStep::Exchange { client, .. } = step {
            self.scenario_users.lock().await.insert(UserId::new(client.as_str()));
        }

        match step {
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::Deposit { client, amount } => {
                let amount = parse_amount(amount)?;
                self.engine.deposit(&UserId::new(client.as_str()), amount).await?;
            }
            ScenarioStep::FeedOutage { down } => {
                info!(down, "Rate feed outage toggled");
                self.feed.set_failing(*down);
            }
            ScenarioStep::Exchange {
                client,
                from,
                to,
                amount,
                expect,
            } => {
                let started = Instant::now();
                let result = self
                    .engine
                    .exchange(
                        &UserId::new(client.as_str()),
                        &Currency::parse(from)?,
                        &Currency::parse(to)?,
                        parse_amount(amount)?,
                    )
                    .await;

                {
                    let mut metrics = self.metrics.lock().await;
                    match &result {
                        Ok(_) => metrics.record_success(started.elapsed().as_millis() as u64),
                        Err(e) => metrics.record_error(e.error_code(), e.is_rejection()),
                    }
                }

                match (expect, result) {
                    (Expect::Completed { to_amount }, Ok(tx)) => {
                        if let Some(expected) = to_amount {
                            let expected = parse_amount(expected)?;
                            if tx.to_amount != expected {
                                anyhow::bail!("expected {} {}, got {}", expected, to, tx.to_amount);
                            }
                        }
                    }
                    (Expect::Rejected { code }, Err(e)) if e.error_code() == code.as_str() => {}
                    (expect, Ok(tx)) => {
                        anyhow::bail!("expected {:?}, exchange {} was recorded", expect, tx.id)
                    }
                    (expect, Err(e)) => anyhow::bail!("expected {:?}, got {}", expect, e),
                }
            }
            ScenarioStep::AssertBalance {
                client,
                currency,
                amount,
            } => {
                let key = WalletKey::new(
                    UserId::new(client.as_str()),
                    Currency::parse(currency)?,
                );
                let actual = self.engine.ledger().get_wallet(&key).await?.map(|w| w.balance);
                let expected = amount.as_deref().map(parse_amount).transpose()?;
                if actual != expected {
                    warn!(wallet = %key, ?actual, ?expected, "Balance mismatch");
                    anyhow::bail!("{} balance is {:?}, expected {:?}", key, actual, expected);
                }
            }
        }

        Ok(())
    }

    /// Get simulation metrics.
    pub async fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.lock().await.clone()
    }
}

fn parse_amount(raw: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str_exact(raw).map_err(|e| anyhow::anyhow!("invalid amount {:?}: {}", raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn controller(seed: u64) -> SimulationController {
        SimulationController::new(SimulationConfig {
            clients: 3,
            seed: Some(seed),
            fallback_ttl: Duration::from_millis(100),
            lock_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_walkthrough_scenario() {
        let controller = controller(1);
        let scenario = Scenario::load("walkthrough").unwrap();

        controller.run_scenario(&scenario).await.unwrap();

        let report = controller.audit().await.unwrap();
        assert_eq!(report.wallets, 3);
        let metrics = controller.get_metrics().await;
        assert_eq!(metrics.completed_exchanges, 4);
        assert_eq!(metrics.rejected_exchanges, 3);
    }

    #[tokio::test]
    async fn test_feed_outage_scenario() {
        let controller = controller(2);
        let scenario = Scenario::load("feed-outage").unwrap();

        controller.run_scenario(&scenario).await.unwrap();
        controller.audit().await.unwrap();
    }

    #[tokio::test]
    async fn test_load_keeps_ledger_consistent() {
        let mut controller = controller(42);
        controller.initialize(dec!(2000.00)).await.unwrap();

        controller.run_load(300, 12).await.unwrap();

        let metrics = controller.get_metrics().await;
        assert_eq!(metrics.total_exchanges, 300);
        assert!(metrics.completed_exchanges > 0);
        assert_eq!(metrics.failed_exchanges, 0);

        let report = controller.audit().await.unwrap();
        assert!(report.transactions >= 3 + metrics.completed_exchanges as usize);
    }

    #[tokio::test]
    async fn test_failed_expectation_is_reported() {
        let controller = controller(3);
        let scenario = Scenario {
            name: "wrong".to_string(),
            description: "expects an unfunded exchange to succeed".to_string(),
            steps: vec![ScenarioStep::Exchange {
                client: "anna".to_string(),
                from: "PLN".to_string(),
                to: "USD".to_string(),
                amount: "1.00".to_string(),
                expect: Expect::Completed { to_amount: None },
            }],
        };

        let err = controller.run_scenario(&scenario).await.unwrap_err();
        assert!(err.to_string().contains("step 1"));
    }
}
