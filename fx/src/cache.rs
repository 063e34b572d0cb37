//! Day-scoped quote cache.

use chrono::{Duration, NaiveDate};
use dashmap::DashMap;
use kantor_common::{Currency, RateQuote, Timestamp};
use parking_lot::RwLock;
use tracing::debug;

/// Where a cached quote came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSource {
    /// Fetched by today's sync.
    Synced,
    /// Most recent persisted rate, served while the feed is down.
    Fallback,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    quote: RateQuote,
    source: QuoteSource,
    cached_on: NaiveDate,
    cached_at: Timestamp,
}

impl CacheEntry {
    fn is_valid(&self, now: Timestamp, fallback_ttl: Duration) -> bool {
        match self.source {
            // Valid until the calendar day turns over, whatever the table's effective date.
            QuoteSource::Synced => self.cached_on == now.date_naive(),
            QuoteSource::Fallback => now.signed_duration_since(self.cached_at) < fallback_ttl,
        }
    }
}

/// Thread-safe quote cache.
///
/// Synced quotes stay valid for the rest of the day they were synced on.
/// Fallback quotes expire after a short TTL so the feed is retried.
pub struct QuoteCache {
    entries: DashMap<Currency, CacheEntry>,
    synced_on: RwLock<Option<NaiveDate>>,
    fallback_ttl: Duration,
}

impl QuoteCache {
    /// Create an empty cache.
    pub fn new(fallback_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            synced_on: RwLock::new(None),
            fallback_ttl,
        }
    }

    /// Get a quote if still valid at `now`.
    pub fn get(&self, currency: &Currency, now: Timestamp) -> Option<RateQuote> {
        let entry = self.entries.get(currency)?;
        if entry.is_valid(now, self.fallback_ttl) {
            debug!(currency = %currency, source = ?entry.source, "Quote cache hit");
            return Some(entry.quote.clone());
        }
        drop(entry);
        self.entries.remove(currency);
        debug!(currency = %currency, "Quote cache entry expired");
        None
    }

    /// Store a quote.
    pub fn insert(&self, quote: RateQuote, source: QuoteSource, now: Timestamp) {
        let entry = CacheEntry {
            source,
            cached_on: now.date_naive(),
            cached_at: now,
            quote,
        };
        self.entries.insert(entry.quote.currency.clone(), entry);
    }

    /// Replace every synced quote after a successful sync on `now`'s date.
    pub fn replace_synced(&self, quotes: impl IntoIterator<Item = RateQuote>, now: Timestamp) {
        for quote in quotes {
            self.insert(quote, QuoteSource::Synced, now);
        }
        *self.synced_on.write() = Some(now.date_naive());
    }

    /// Whether a sync already succeeded on `today`.
    pub fn is_synced_for(&self, today: NaiveDate) -> bool {
        *self.synced_on.read() == Some(today)
    }

    /// All valid quotes, ordered by currency code.
    pub fn valid_quotes(&self, now: Timestamp) -> Vec<RateQuote> {
        let mut quotes: Vec<RateQuote> = self
            .entries
            .iter()
            .filter(|e| e.is_valid(now, self.fallback_ttl))
            .map(|e| e.quote.clone())
            .collect();
        quotes.sort_by(|a, b| a.currency.cmp(&b.currency));
        quotes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything, including the sync marker.
    pub fn clear(&self) {
        self.entries.clear();
        *self.synced_on.write() = None;
    }
}
