//! NBP table C adapter.
//!
//! Table C carries bid/ask quotes for the currencies the bank trades against
//! PLN. The API answers with a one-element JSON array per request.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use kantor_common::{constants, Currency, DurationExt};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::FeedError;
use crate::provider::{FeedRate, RateFeed, RateTable};

/// Currency every table C quote is expressed against.
pub const NBP_QUOTE_CURRENCY: &str = "PLN";

/// Default table C endpoint.
pub const DEFAULT_NBP_URL: &str = "https://api.nbp.pl/api/exchangerates/tables/C";

/// Rate feed configuration.
#[derive(Debug, Clone)]
pub struct RateFeedConfig {
    /// Table endpoint, without query string.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RateFeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_NBP_URL.to_string(),
            timeout: constants::feed_request_timeout().as_std(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NbpTableDto {
    effective_date: NaiveDate,
    rates: Vec<NbpRateDto>,
}

#[derive(Debug, Deserialize)]
struct NbpRateDto {
    currency: String,
    code: String,
    bid: Decimal,
    ask: Decimal,
}

impl NbpTableDto {
    fn into_table(self) -> RateTable {
        let rates = self
            .rates
            .into_iter()
            .filter_map(|r| match Currency::parse(&r.code) {
                Ok(code) => Some(FeedRate {
                    code,
                    name: r.currency,
                    bid: r.bid,
                    ask: r.ask,
                }),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed NBP rate entry");
                    None
                }
            })
            .collect();

        RateTable::new(self.effective_date, rates)
    }
}

/// Parse a table C response body.
pub(crate) fn parse_tables(body: &str, date: Option<NaiveDate>) -> Result<RateTable, FeedError> {
    let tables: Vec<NbpTableDto> = serde_json::from_str(body)
        .map_err(|e| FeedError::Unavailable(format!("malformed NBP response: {}", e)))?;

    tables
        .into_iter()
        .next()
        .map(NbpTableDto::into_table)
        .ok_or(FeedError::NotFound(date))
}

/// Rate feed backed by the NBP public API.
pub struct NbpRateFeed {
    client: Client,
    config: RateFeedConfig,
}

impl NbpRateFeed {
    /// Create a new feed.
    pub fn new(config: RateFeedConfig) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FeedError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url_for(&self, date: Option<NaiveDate>) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match date {
            Some(d) => format!("{}/{}?format=json", base, d.format("%Y-%m-%d")),
            None => format!("{}?format=json", base),
        }
    }
}

#[async_trait]
impl RateFeed for NbpRateFeed {
    fn name(&self) -> &str {
        "NBP"
    }

    async fn fetch_table(&self, date: Option<NaiveDate>) -> Result<RateTable, FeedError> {
        let url = self.url_for(date);
        debug!(url = %url, "Fetching rate table");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "NBP request failed");
                FeedError::Unavailable(format!("could not connect to NBP: {}", e))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url = %url, "No NBP table for date");
            return Err(FeedError::NotFound(date));
        }
        if !status.is_success() {
            return Err(FeedError::Unavailable(format!(
                "NBP returned status {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Unavailable(format!("failed to read NBP response: {}", e)))?;

        parse_tables(&body, date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"[{
        "table": "C",
        "no": "043/C/NBP/2024",
        "tradingDate": "2024-02-29",
        "effectiveDate": "2024-03-01",
        "rates": [
            {"currency": "dolar amerykański", "code": "USD", "bid": 3.9512, "ask": 4.0310},
            {"currency": "euro", "code": "EUR", "bid": 4.2746, "ask": 4.3610},
            {"currency": "bad", "code": "X1", "bid": 1.0, "ask": 1.1}
        ]
    }]"#;

    #[test]
    fn test_parse_table_c() {
        let table = parse_tables(SAMPLE, None).unwrap();

        assert_eq!(
            table.effective_date,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert_eq!(table.rates.len(), 2);

        let usd = table.get(&Currency::usd()).unwrap();
        assert_eq!(usd.bid, dec!(3.9512));
        assert_eq!(usd.ask, dec!(4.0310));
        assert_eq!(usd.name, "dolar amerykański");
    }

    #[test]
    fn test_parse_empty_array_is_not_found() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(
            parse_tables("[]", Some(date)),
            Err(FeedError::NotFound(Some(date)))
        );
    }

    #[test]
    fn test_parse_garbage_is_unavailable() {
        assert!(matches!(
            parse_tables("<html>", None),
            Err(FeedError::Unavailable(_))
        ));
    }

    #[test]
    fn test_url_for_date() {
        let feed = NbpRateFeed::new(RateFeedConfig {
            base_url: "http://localhost:9/tables/C/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(feed.url_for(None), "http://localhost:9/tables/C?format=json");
        assert_eq!(
            feed.url_for(NaiveDate::from_ymd_opt(2024, 3, 1)),
            "http://localhost:9/tables/C/2024-03-01?format=json"
        );
    }

    #[tokio::test]
    async fn test_unreachable_feed_is_unavailable() {
        let feed = NbpRateFeed::new(RateFeedConfig {
            base_url: "http://127.0.0.1:9/tables/C".to_string(),
            timeout: Duration::from_millis(500),
        })
        .unwrap();

        let result = feed.fetch_table(None).await;
        assert!(matches!(result, Err(FeedError::Unavailable(_))));
    }
}
