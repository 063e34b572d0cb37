//! Rate resolution: live feed, persisted history and the quote cache.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use kantor_common::{
    constants, round_rate, Currency, ExchangeRate, RateQuote, SharedClock, SystemClock, Timestamp,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::cache::{QuoteCache, QuoteSource};
use crate::conversion::{Conversion, ConversionPath};
use crate::error::{FeedError, FxError, FxResult};
use crate::provider::{RateFeed, RateTable};
use crate::store::RateStore;

/// Configuration for the rate resolver.
#[derive(Debug, Clone)]
pub struct RateResolverConfig {
    /// Currency every quote is expressed against.
    pub base_currency: Currency,
    /// How long a fallback quote is served before the feed is retried.
    pub fallback_ttl: Duration,
}

impl Default for RateResolverConfig {
    fn default() -> Self {
        Self {
            base_currency: Currency::pln(),
            fallback_ttl: constants::fallback_quote_ttl(),
        }
    }
}

/// Outcome of a sync against the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Effective date of the fetched table.
    pub effective_date: NaiveDate,
    /// Rows written by this sync.
    pub inserted: usize,
    /// Rows that already existed for the date and were left untouched.
    pub existing: usize,
}

/// Obtains the best-known bid/ask for a currency.
///
/// The first request of a day syncs the feed's current table into the store.
/// While the feed is down, the most recent persisted rate is served instead.
pub struct RateResolver {
    feed: Arc<dyn RateFeed>,
    store: Arc<dyn RateStore>,
    cache: QuoteCache,
    config: RateResolverConfig,
    clock: SharedClock,
    sync_gate: AsyncMutex<()>,
    last_failed_sync: Mutex<Option<Timestamp>>,
}

impl RateResolver {
    /// Create a resolver on the system clock.
    pub fn new(
        feed: Arc<dyn RateFeed>,
        store: Arc<dyn RateStore>,
        config: RateResolverConfig,
    ) -> Self {
        Self::with_clock(feed, store, config, Arc::new(SystemClock))
    }

    /// Create a resolver on a custom clock.
    pub fn with_clock(
        feed: Arc<dyn RateFeed>,
        store: Arc<dyn RateStore>,
        config: RateResolverConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            feed,
            store,
            cache: QuoteCache::new(config.fallback_ttl),
            config,
            clock,
            sync_gate: AsyncMutex::new(()),
            last_failed_sync: Mutex::new(None),
        }
    }

    /// The pivot currency.
    pub fn base_currency(&self) -> &Currency {
        &self.config.base_currency
    }

    /// Name of the underlying feed.
    pub fn feed_name(&self) -> &str {
        self.feed.name()
    }

    /// Best-known quote for a currency today.
    #[instrument(skip_all, fields(currency = %currency))]
    pub async fn get_current_rate(&self, currency: &Currency) -> FxResult<RateQuote> {
        if currency == &self.config.base_currency {
            return Ok(self.identity_quote(self.clock.today()));
        }

        if let Some(quote) = self.cache.get(currency, self.clock.now()) {
            return Ok(quote);
        }

        self.ensure_synced().await;
        if let Some(quote) = self.cache.get(currency, self.clock.now()) {
            return Ok(quote);
        }

        match self.store.latest(currency).await? {
            Some(rate) => {
                let quote = rate.quote();
                debug!(rate_date = %quote.date, "Serving most recent persisted rate");
                self.cache
                    .insert(quote.clone(), QuoteSource::Fallback, self.clock.now());
                Ok(quote)
            }
            None => Err(FxError::unavailable(
                currency,
                None,
                "feed unavailable and no persisted rate",
            )),
        }
    }

    /// Latest quote for every tracked currency.
    #[instrument(skip(self))]
    pub async fn get_current_rates(&self) -> FxResult<Vec<RateQuote>> {
        self.ensure_synced().await;

        if self.cache.is_synced_for(self.clock.today()) {
            let quotes = self.cache.valid_quotes(self.clock.now());
            if !quotes.is_empty() {
                return Ok(quotes);
            }
        }

        let latest = self.store.latest_all().await?;
        if latest.is_empty() {
            return Err(FxError::NoRatesAvailable(
                "feed unavailable and no persisted rates".to_string(),
            ));
        }
        info!(count = latest.len(), "Returning persisted rates while feed is unavailable");
        Ok(latest.iter().map(ExchangeRate::quote).collect())
    }

    /// Quote for a currency on a specific date.
    ///
    /// Persisted history is checked first; the feed is only queried when the
    /// store has nothing for that exact date.
    #[instrument(skip_all, fields(currency = %currency, date = %date))]
    pub async fn get_rate_on_date(&self, currency: &Currency, date: NaiveDate) -> FxResult<RateQuote> {
        if currency == &self.config.base_currency {
            return Ok(self.identity_quote(date));
        }

        if let Some(rate) = self.store.find(currency, date).await? {
            return Ok(rate.quote());
        }

        debug!("Rate not persisted, querying feed");
        let table = match self.feed.fetch_table(Some(date)).await {
            Ok(table) => table,
            Err(FeedError::NotFound(_)) => {
                return Err(FxError::unavailable(currency, Some(date), "no table published"))
            }
            Err(e) => return Err(e.into()),
        };

        self.persist_table(&table).await?;

        if table.effective_date != date {
            return Err(FxError::unavailable(
                currency,
                Some(date),
                format!("feed answered with table for {}", table.effective_date),
            ));
        }

        self.store
            .find(currency, date)
            .await?
            .map(|r| r.quote())
            .ok_or_else(|| FxError::unavailable(currency, Some(date), "currency not in table"))
    }

    /// Every persisted quote for a date, fetching the table if none is stored.
    #[instrument(skip_all, fields(date = %date))]
    pub async fn get_rates_on_date(&self, date: NaiveDate) -> FxResult<Vec<RateQuote>> {
        let stored = self.store.on_date(date).await?;
        if !stored.is_empty() {
            return Ok(stored.iter().map(ExchangeRate::quote).collect());
        }

        let table = match self.feed.fetch_table(Some(date)).await {
            Ok(table) => table,
            Err(FeedError::NotFound(_)) => {
                warn!("No rate table published for date");
                return Err(FxError::NoRatesAvailable(format!("no table published for {}", date)));
            }
            Err(e) => return Err(e.into()),
        };

        self.persist_table(&table).await?;
        Ok(self
            .store
            .on_date(table.effective_date)
            .await?
            .iter()
            .map(ExchangeRate::quote)
            .collect())
    }

    /// Persisted rates for a currency within an inclusive date range.
    pub async fn get_rate_history(
        &self,
        currency: &Currency,
        from: NaiveDate,
        to: NaiveDate,
    ) -> FxResult<Vec<ExchangeRate>> {
        if from > to {
            return Err(FxError::InvalidRange { from, to });
        }
        self.store.history(currency, from, to).await
    }

    /// Force a refresh of the current table.
    ///
    /// Idempotent per effective date: rows already stored are left untouched.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> FxResult<SyncReport> {
        let _gate = self.sync_gate.lock().await;
        self.sync_locked().await
    }

    /// Price a conversion at the current quotes.
    #[instrument(skip_all, fields(from = %from, to = %to, amount = %amount))]
    pub async fn price(&self, from: &Currency, to: &Currency, amount: Decimal) -> FxResult<Conversion> {
        let path = ConversionPath::resolve(&self.config.base_currency, from, to)?;

        let mut quotes = Vec::with_capacity(2);
        for currency in path.quoted_currencies() {
            quotes.push(self.get_current_rate(currency).await?);
        }

        Conversion::compute(&self.config.base_currency, path, amount, quotes)
    }

    async fn ensure_synced(&self) {
        if self.cache.is_synced_for(self.clock.today()) || self.recently_failed() {
            return;
        }

        let _gate = self.sync_gate.lock().await;
        // Another task may have synced while we waited.
        if self.cache.is_synced_for(self.clock.today()) || self.recently_failed() {
            return;
        }

        if let Err(e) = self.sync_locked().await {
            warn!(feed = self.feed.name(), error = %e, "Rate sync failed, falling back to persisted rates");
        }
    }

    fn recently_failed(&self) -> bool {
        match *self.last_failed_sync.lock() {
            Some(at) => self.clock.now().signed_duration_since(at) < self.config.fallback_ttl,
            None => false,
        }
    }

    async fn sync_locked(&self) -> FxResult<SyncReport> {
        let table = match self.feed.fetch_table(None).await {
            Ok(table) => table,
            Err(e) => {
                *self.last_failed_sync.lock() = Some(self.clock.now());
                return Err(e.into());
            }
        };

        let (report, stored) = self.persist_table(&table).await?;

        self.cache
            .replace_synced(stored.iter().map(ExchangeRate::quote), self.clock.now());
        *self.last_failed_sync.lock() = None;

        info!(
            feed = self.feed.name(),
            effective_date = %report.effective_date,
            inserted = report.inserted,
            existing = report.existing,
            "Rates synced"
        );
        Ok(report)
    }

    async fn persist_table(&self, table: &RateTable) -> FxResult<(SyncReport, Vec<ExchangeRate>)> {
        let mut report = SyncReport {
            effective_date: table.effective_date,
            inserted: 0,
            existing: 0,
        };
        let mut stored = Vec::with_capacity(table.rates.len());

        for rate in table.to_exchange_rates() {
            if !rate.is_valid() || rate.currency == self.config.base_currency {
                warn!(currency = %rate.currency, bid = %rate.bid, ask = %rate.ask, "Skipping unusable feed rate");
                continue;
            }
            let outcome = self.store.insert_if_absent(rate).await?;
            if outcome.was_inserted() {
                report.inserted += 1;
            } else {
                report.existing += 1;
            }
            stored.push(outcome.into_rate());
        }

        Ok((report, stored))
    }

    fn identity_quote(&self, date: NaiveDate) -> RateQuote {
        let one = round_rate(Decimal::ONE);
        RateQuote {
            currency: self.config.base_currency.clone(),
            name: None,
            bid: one,
            ask: one,
            mid: one,
            date,
        }
    }
}
