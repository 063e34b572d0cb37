//! PostgreSQL rate store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use kantor_common::{Currency, ExchangeRate};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::error::{FxError, FxResult};
use crate::store::{InsertOutcome, RateStore};

const RATE_COLUMNS: &str = "currency, name, rate_date, bid, ask, created_at";

#[derive(Debug, sqlx::FromRow)]
struct RateRow {
    currency: String,
    name: Option<String>,
    rate_date: NaiveDate,
    bid: Decimal,
    ask: Decimal,
    created_at: DateTime<Utc>,
}

impl From<RateRow> for ExchangeRate {
    fn from(row: RateRow) -> Self {
        ExchangeRate {
            currency: Currency::new(row.currency),
            name: row.name,
            rate_date: row.rate_date,
            bid: row.bid,
            ask: row.ask,
            created_at: row.created_at,
        }
    }
}

/// Rate store over the `exchange_rates` table, unique on (currency, rate_date).
#[derive(Clone)]
pub struct PgRateStore {
    pool: PgPool,
}

impl PgRateStore {
    /// Create a store on an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    async fn find(&self, currency: &Currency, date: NaiveDate) -> FxResult<Option<ExchangeRate>> {
        let sql = format!(
            "SELECT {RATE_COLUMNS} FROM exchange_rates WHERE currency = $1 AND rate_date = $2"
        );
        let row = sqlx::query_as::<_, RateRow>(&sql)
            .bind(currency.code())
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ExchangeRate::from))
    }

    async fn latest(&self, currency: &Currency) -> FxResult<Option<ExchangeRate>> {
        let sql = format!(
            "SELECT {RATE_COLUMNS} FROM exchange_rates WHERE currency = $1 \
             ORDER BY rate_date DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, RateRow>(&sql)
            .bind(currency.code())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ExchangeRate::from))
    }

    async fn latest_all(&self) -> FxResult<Vec<ExchangeRate>> {
        let sql = format!(
            "SELECT DISTINCT ON (currency) {RATE_COLUMNS} FROM exchange_rates \
             ORDER BY currency, rate_date DESC"
        );
        let rows = sqlx::query_as::<_, RateRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ExchangeRate::from).collect())
    }

    async fn on_date(&self, date: NaiveDate) -> FxResult<Vec<ExchangeRate>> {
        let sql = format!(
            "SELECT {RATE_COLUMNS} FROM exchange_rates WHERE rate_date = $1 ORDER BY currency"
        );
        let rows = sqlx::query_as::<_, RateRow>(&sql)
            .bind(date)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ExchangeRate::from).collect())
    }

    async fn history(
        &self,
        currency: &Currency,
        from: NaiveDate,
        to: NaiveDate,
    ) -> FxResult<Vec<ExchangeRate>> {
        let sql = format!(
            "SELECT {RATE_COLUMNS} FROM exchange_rates \
             WHERE currency = $1 AND rate_date BETWEEN $2 AND $3 ORDER BY rate_date"
        );
        let rows = sqlx::query_as::<_, RateRow>(&sql)
            .bind(currency.code())
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ExchangeRate::from).collect())
    }

    async fn insert_if_absent(&self, rate: ExchangeRate) -> FxResult<InsertOutcome> {
        let sql = format!(
            "INSERT INTO exchange_rates ({RATE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (currency, rate_date) DO NOTHING RETURNING {RATE_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, RateRow>(&sql)
            .bind(rate.currency.code())
            .bind(&rate.name)
            .bind(rate.rate_date)
            .bind(rate.bid)
            .bind(rate.ask)
            .bind(rate.created_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Inserted(row.into()));
        }

        // Lost the race or re-fetched the same day: hand back the stored row.
        match self.find(&rate.currency, rate.rate_date).await? {
            Some(existing) => Ok(InsertOutcome::Existing(existing)),
            None => Err(FxError::Storage(format!(
                "rate {}@{} neither inserted nor found",
                rate.currency, rate.rate_date
            ))),
        }
    }
}
