//! Exchange service configuration.

use std::time::Duration;

use kantor_common::{constants, Currency, DurationExt};
use kantor_fx::{RateFeedConfig, RateResolverConfig, NBP_QUOTE_CURRENCY};
use kantor_ledger::LockConfig;

/// Rate sync trigger configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between scheduled syncs.
    pub interval: Duration,
    /// Sync once immediately at startup.
    pub run_on_start: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: constants::rate_sync_interval().as_std(),
            run_on_start: true,
        }
    }
}

/// Main exchange configuration.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Database URL; in-memory stores are used when absent.
    pub database_url: Option<String>,
    /// Wallet lock configuration.
    pub lock: LockConfig,
    /// Rate resolution configuration, including the base currency.
    pub resolver: RateResolverConfig,
    /// Rate feed endpoint.
    pub feed: RateFeedConfig,
    /// Scheduled sync.
    pub sync: SyncConfig,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            lock: LockConfig::default(),
            resolver: RateResolverConfig::default(),
            feed: RateFeedConfig::default(),
            sync: SyncConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ExchangeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(code) = lookup("EXCHANGE_BASE_CURRENCY") {
            config.resolver.base_currency = Currency::new(code.trim());
        }

        if let Some(ms) = lookup("EXCHANGE_LOCK_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.lock.acquire_timeout = Duration::from_millis(ms);
        }

        if let Some(secs) = lookup("EXCHANGE_LOCK_CLEANUP_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            config.lock.cleanup_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = lookup("EXCHANGE_RATE_SYNC_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            config.sync.interval = Duration::from_secs(secs);
        }

        if let Some(url) = lookup("EXCHANGE_RATE_FEED_URL") {
            config.feed.base_url = url;
        }

        if let Some(secs) = lookup("EXCHANGE_RATE_FEED_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.feed.timeout = Duration::from_secs(secs);
        }

        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.is_empty()) {
            config.database_url = Some(url);
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Base currency every quote is expressed against.
    pub fn base_currency(&self) -> &Currency {
        &self.resolver.base_currency
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if Currency::parse(self.base_currency().code()).is_err() {
            return Err(format!(
                "Base currency must be a 3-letter code, got {:?}",
                self.base_currency().code()
            ));
        }

        // The only feed quotes against PLN; any other base misprices every pair.
        if self.base_currency().code() != NBP_QUOTE_CURRENCY {
            return Err(format!(
                "Base currency must be {} to match the rate feed, got {}",
                NBP_QUOTE_CURRENCY,
                self.base_currency()
            ));
        }

        if self.lock.acquire_timeout.is_zero() {
            return Err("Lock acquisition timeout cannot be 0".to_string());
        }

        if self.lock.cleanup_interval.is_zero() {
            return Err("Lock cleanup interval cannot be 0".to_string());
        }

        if self.sync.interval.is_zero() {
            return Err("Rate sync interval cannot be 0".to_string());
        }

        if self.feed.timeout.is_zero() {
            return Err("Rate feed timeout cannot be 0".to_string());
        }

        if !self.feed.base_url.starts_with("http://") && !self.feed.base_url.starts_with("https://") {
            return Err(format!("Rate feed URL must be http(s): {}", self.feed.base_url));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ExchangeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_currency(), &Currency::pln());
        assert_eq!(config.lock.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("EXCHANGE_BASE_CURRENCY", " pln "),
            ("EXCHANGE_LOCK_CLEANUP_INTERVAL_SECS", "30"),
            ("EXCHANGE_LOCK_TIMEOUT_MS", "250"),
            ("EXCHANGE_RATE_SYNC_INTERVAL_SECS", "600"),
            ("EXCHANGE_RATE_FEED_TIMEOUT_SECS", "not-a-number"),
            ("DATABASE_URL", "postgres://localhost/kantor"),
        ]
        .into_iter()
        .collect();

        let config = ExchangeConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.base_currency(), &Currency::pln());
        assert_eq!(config.lock.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.lock.cleanup_interval, Duration::from_secs(30));
        assert_eq!(config.sync.interval, Duration::from_secs(600));
        assert_eq!(config.feed.timeout, Duration::from_secs(10));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/kantor"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ExchangeConfig::default();
        config.lock.acquire_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ExchangeConfig::default();
        config.resolver.base_currency = Currency::new("ZLOTY");
        assert!(config.validate().is_err());

        let mut config = ExchangeConfig::default();
        config.feed.base_url = "ftp://example".to_string();
        assert!(config.validate().is_err());

        let config = ExchangeConfig::from_lookup(|k| {
            (k == "EXCHANGE_BASE_CURRENCY").then(|| "EUR".to_string())
        });
        let err = config.validate().unwrap_err();
        assert!(err.contains("PLN"));
    }
}
