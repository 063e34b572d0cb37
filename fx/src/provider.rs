//! Rate feed trait and the normalized table it returns.

use async_trait::async_trait;
use chrono::NaiveDate;
use kantor_common::{Currency, ExchangeRate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// One entry of a published rate table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRate {
    pub code: Currency,
    pub name: String,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// A published bid/ask table for all tracked currencies on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTable {
    pub effective_date: NaiveDate,
    pub rates: Vec<FeedRate>,
}

impl RateTable {
    /// Create a new table.
    pub fn new(effective_date: NaiveDate, rates: Vec<FeedRate>) -> Self {
        Self {
            effective_date,
            rates,
        }
    }

    /// Convert every entry into a rate row for the table's effective date.
    pub fn to_exchange_rates(&self) -> Vec<ExchangeRate> {
        self.rates
            .iter()
            .map(|r| {
                ExchangeRate::new(
                    r.code.clone(),
                    Some(r.name.clone()),
                    self.effective_date,
                    r.bid,
                    r.ask,
                )
            })
            .collect()
    }

    /// Find the entry for a currency.
    pub fn get(&self, code: &Currency) -> Option<&FeedRate> {
        self.rates.iter().find(|r| &r.code == code)
    }
}

/// Trait for external rate feeds.
#[async_trait]
pub trait RateFeed: Send + Sync {
    /// Get the feed name.
    fn name(&self) -> &str;

    /// Fetch the table for a date, or the current table when `date` is `None`.
    async fn fetch_table(&self, date: Option<NaiveDate>) -> Result<RateTable, FeedError>;
}

/// Mock rate feed for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateFeed {
    name: String,
    tables: dashmap::DashMap<NaiveDate, RateTable>,
    current: parking_lot::RwLock<Option<NaiveDate>>,
    failing: std::sync::atomic::AtomicBool,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateFeed {
    /// Create a new mock feed with no tables.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: dashmap::DashMap::new(),
            current: parking_lot::RwLock::new(None),
            failing: std::sync::atomic::AtomicBool::new(false),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Publish a historical table.
    pub fn set_table(&self, table: RateTable) {
        self.tables.insert(table.effective_date, table);
    }

    /// Publish a table and make it the current one.
    pub fn set_current(&self, table: RateTable) {
        *self.current.write() = Some(table.effective_date);
        self.set_table(table);
    }

    /// Make every fetch fail as unavailable.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of fetches served or refused.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateFeed for MockRateFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_table(&self, date: Option<NaiveDate>) -> Result<RateTable, FeedError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FeedError::Unavailable("mock feed offline".to_string()));
        }

        let key = match date {
            Some(d) => Some(d),
            None => *self.current.read(),
        };

        key.and_then(|d| self.tables.get(&d).map(|t| t.clone()))
            .ok_or(FeedError::NotFound(date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_table(date: NaiveDate) -> RateTable {
        RateTable::new(
            date,
            vec![
                FeedRate {
                    code: Currency::usd(),
                    name: "dolar amerykański".to_string(),
                    bid: dec!(3.95),
                    ask: dec!(4.05),
                },
                FeedRate {
                    code: Currency::eur(),
                    name: "euro".to_string(),
                    bid: dec!(4.30),
                    ask: dec!(4.38),
                },
            ],
        )
    }

    #[tokio::test]
    async fn test_mock_feed_current_and_dated() {
        let feed = MockRateFeed::new("test");
        let d1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        feed.set_table(make_table(d1));
        feed.set_current(make_table(d2));

        let current = feed.fetch_table(None).await.unwrap();
        assert_eq!(current.effective_date, d2);

        let dated = feed.fetch_table(Some(d1)).await.unwrap();
        assert_eq!(dated.effective_date, d1);

        let missing = feed
            .fetch_table(Some(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()))
            .await;
        assert!(matches!(missing, Err(FeedError::NotFound(Some(_)))));
        assert_eq!(feed.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_feed_failing() {
        let feed = MockRateFeed::new("test");
        feed.set_current(make_table(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));
        feed.set_failing(true);

        let result = feed.fetch_table(None).await;
        assert!(matches!(result, Err(FeedError::Unavailable(_))));
    }

    #[test]
    fn test_table_to_rates() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let rates = make_table(date).to_exchange_rates();

        assert_eq!(rates.len(), 2);
        assert!(rates.iter().all(|r| r.rate_date == date));
        assert_eq!(rates[0].name.as_deref(), Some("dolar amerykański"));
        assert_eq!(rates[1].bid.to_string(), "4.300000");
    }
}
