//! Persisted rate history.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use kantor_common::{Currency, ExchangeRate};
use parking_lot::RwLock;

use crate::error::FxResult;

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was new and has been written.
    Inserted(ExchangeRate),
    /// A row already existed for (currency, date) and was left untouched.
    Existing(ExchangeRate),
}

impl InsertOutcome {
    /// The row now stored for the key.
    pub fn rate(&self) -> &ExchangeRate {
        match self {
            InsertOutcome::Inserted(r) | InsertOutcome::Existing(r) => r,
        }
    }

    pub fn into_rate(self) -> ExchangeRate {
        match self {
            InsertOutcome::Inserted(r) | InsertOutcome::Existing(r) => r,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

/// Rate persistence keyed by (currency, rate date).
///
/// Rows are never overwritten once written for a date.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Rate for a currency on an exact date.
    async fn find(&self, currency: &Currency, date: NaiveDate) -> FxResult<Option<ExchangeRate>>;

    /// Most recent rate for a currency.
    async fn latest(&self, currency: &Currency) -> FxResult<Option<ExchangeRate>>;

    /// Most recent rate for every known currency, ordered by code.
    async fn latest_all(&self) -> FxResult<Vec<ExchangeRate>>;

    /// Every rate recorded for a date, ordered by code.
    async fn on_date(&self, date: NaiveDate) -> FxResult<Vec<ExchangeRate>>;

    /// Rates for a currency within an inclusive date range, ordered by date.
    async fn history(
        &self,
        currency: &Currency,
        from: NaiveDate,
        to: NaiveDate,
    ) -> FxResult<Vec<ExchangeRate>>;

    /// Insert the row unless one already exists for (currency, date).
    async fn insert_if_absent(&self, rate: ExchangeRate) -> FxResult<InsertOutcome>;
}

/// In-memory rate store.
#[derive(Default)]
pub struct MemoryRateStore {
    rates: RwLock<BTreeMap<(Currency, NaiveDate), ExchangeRate>>,
}

impl MemoryRateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.read().is_empty()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn find(&self, currency: &Currency, date: NaiveDate) -> FxResult<Option<ExchangeRate>> {
        Ok(self.rates.read().get(&(currency.clone(), date)).cloned())
    }

    async fn latest(&self, currency: &Currency) -> FxResult<Option<ExchangeRate>> {
        let rates = self.rates.read();
        Ok(rates
            .range((currency.clone(), NaiveDate::MIN)..=(currency.clone(), NaiveDate::MAX))
            .next_back()
            .map(|(_, r)| r.clone()))
    }

    async fn latest_all(&self) -> FxResult<Vec<ExchangeRate>> {
        let rates = self.rates.read();
        let mut latest: BTreeMap<&Currency, &ExchangeRate> = BTreeMap::new();
        // Keys are ordered by (currency, date), so the last write per currency wins.
        for ((currency, _), rate) in rates.iter() {
            latest.insert(currency, rate);
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn on_date(&self, date: NaiveDate) -> FxResult<Vec<ExchangeRate>> {
        Ok(self
            .rates
            .read()
            .values()
            .filter(|r| r.rate_date == date)
            .cloned()
            .collect())
    }

    async fn history(
        &self,
        currency: &Currency,
        from: NaiveDate,
        to: NaiveDate,
    ) -> FxResult<Vec<ExchangeRate>> {
        if from > to {
            return Ok(Vec::new());
        }
        let rates = self.rates.read();
        Ok(rates
            .range((currency.clone(), from)..=(currency.clone(), to))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn insert_if_absent(&self, rate: ExchangeRate) -> FxResult<InsertOutcome> {
        let mut rates = self.rates.write();
        let key = (rate.currency.clone(), rate.rate_date);
        if let Some(existing) = rates.get(&key) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        rates.insert(key, rate.clone());
        Ok(InsertOutcome::Inserted(rate))
    }
}
