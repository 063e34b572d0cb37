//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Top up a client's base wallet.
    Deposit { client: String, amount: String },
    /// Request an exchange and check the outcome.
    Exchange {
        client: String,
        from: String,
        to: String,
        amount: String,
        expect: Expect,
    },
    /// Take the rate feed down or bring it back.
    FeedOutage { down: bool },
    /// Check a wallet balance; `None` asserts the wallet does not exist.
    AssertBalance {
        client: String,
        currency: String,
        amount: Option<String>,
    },
}

/// Expected outcome of an exchange step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expect {
    /// Recorded, optionally with an exact target amount.
    Completed { to_amount: Option<String> },
    /// Refused with the given error code.
    Rejected { code: String },
}

fn deposit(client: &str, amount: &str) -> ScenarioStep {
    ScenarioStep::Deposit {
        client: client.to_string(),
        amount: amount.to_string(),
    }
}

fn exchange(client: &str, from: &str, to: &str, amount: &str, expect: Expect) -> ScenarioStep {
    ScenarioStep::Exchange {
        client: client.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        amount: amount.to_string(),
        expect,
    }
}

fn completed(to_amount: &str) -> Expect {
    Expect::Completed {
        to_amount: Some(to_amount.to_string()),
    }
}

fn rejected(code: &str) -> Expect {
    Expect::Rejected {
        code: code.to_string(),
    }
}

fn balance(client: &str, currency: &str, amount: Option<&str>) -> ScenarioStep {
    ScenarioStep::AssertBalance {
        client: client.to_string(),
        currency: currency.to_string(),
        amount: amount.map(str::to_string),
    }
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file by path.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "walkthrough" => Ok(Self::walkthrough()),
            "feed-outage" => Ok(Self::feed_outage()),
            path if path.ends_with(".json") => {
                let raw = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&raw)?)
            }
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Buy, sell, cross and refused exchanges for one client.
    fn walkthrough() -> Self {
        Self {
            name: "walkthrough".to_string(),
            description: "Direct, cross and rejected exchanges against the simulated table".to_string(),
            steps: vec![
                deposit("anna", "1000.00"),
                exchange("anna", "PLN", "USD", "100.00", completed("25.00")),
                balance("anna", "PLN", Some("900.00")),
                balance("anna", "USD", Some("25.00")),
                exchange("anna", "PLN", "USD", "2000.00", rejected("INSUFFICIENT_FUNDS")),
                balance("anna", "PLN", Some("900.00")),
                exchange("anna", "USD", "PLN", "25.00", completed("99.00")),
                balance("anna", "USD", Some("0.00")),
                balance("anna", "PLN", Some("999.00")),
                exchange("anna", "PLN", "EUR", "438.00", completed("100.00")),
                exchange("anna", "EUR", "USD", "10.00", completed("10.75")),
                balance("anna", "EUR", Some("90.00")),
                balance("anna", "USD", Some("10.75")),
                exchange("anna", "PLN", "PLN", "1.00", rejected("SAME_CURRENCY")),
                exchange("anna", "GBP", "PLN", "1.00", rejected("WALLET_NOT_FOUND")),
                balance("anna", "GBP", None),
            ],
        }
    }

    /// Exchanges refused while the feed is down, accepted once it recovers.
    fn feed_outage() -> Self {
        Self {
            name: "feed-outage".to_string(),
            description: "Rate feed outage before the first sync".to_string(),
            steps: vec![
                ScenarioStep::FeedOutage { down: true },
                deposit("bartek", "500.00"),
                exchange("bartek", "PLN", "USD", "40.00", rejected("RATE_UNAVAILABLE")),
                balance("bartek", "PLN", Some("500.00")),
                balance("bartek", "USD", None),
                ScenarioStep::FeedOutage { down: false },
                ScenarioStep::Wait { millis: 250 },
                exchange("bartek", "PLN", "USD", "40.00", completed("10.00")),
                balance("bartek", "PLN", Some("460.00")),
            ],
        }
    }
}
