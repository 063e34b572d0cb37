//! FX error types.

use chrono::NaiveDate;
use kantor_common::{Currency, ExchangeError};
use thiserror::Error;

/// Errors reported by a rate feed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// The feed has no table for the requested date.
    #[error("No rate table published for {}", describe_date(.0))]
    NotFound(Option<NaiveDate>),

    /// Network or upstream failure.
    #[error("Rate feed unavailable: {0}")]
    Unavailable(String),
}

fn describe_date(date: &Option<NaiveDate>) -> String {
    match date {
        Some(d) => d.to_string(),
        None => "the current date".to_string(),
    }
}

/// Errors that can occur while resolving or applying rates.
#[derive(Debug, Error)]
pub enum FxError {
    /// Neither the feed nor persisted history can price the currency.
    #[error("Rate unavailable for {currency}{}: {reason}", .date.map(|d| format!(" on {d}")).unwrap_or_default())]
    RateUnavailable {
        currency: Currency,
        date: Option<NaiveDate>,
        reason: String,
    },

    /// No rates at all are known.
    #[error("No exchange rates available: {0}")]
    NoRatesAvailable(String),

    /// A quote cannot be used for pricing.
    #[error("Invalid quote for {currency}: {reason}")]
    InvalidQuote { currency: Currency, reason: String },

    /// Source and target currency are identical.
    #[error("Cannot convert {0} into itself")]
    SameCurrency(Currency),

    /// A priced amount does not fit a wallet balance.
    #[error("Amount out of range: {0}")]
    AmountOutOfRange(String),

    /// Inclusive date range with `from` after `to`.
    #[error("Invalid date range {from}..={to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },

    /// Feed failure surfaced directly (sync paths).
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// Rate persistence failure.
    #[error("Rate store error: {0}")]
    Storage(String),
}

impl FxError {
    /// Shorthand for an unavailable rate.
    pub fn unavailable(
        currency: &Currency,
        date: Option<NaiveDate>,
        reason: impl Into<String>,
    ) -> Self {
        FxError::RateUnavailable {
            currency: currency.clone(),
            date,
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for FxError {
    fn from(err: sqlx::Error) -> Self {
        FxError::Storage(err.to_string())
    }
}

impl From<FxError> for ExchangeError {
    fn from(err: FxError) -> Self {
        match err {
            FxError::RateUnavailable {
                currency, reason, ..
            } => ExchangeError::RateUnavailable { currency, reason },
            FxError::InvalidQuote { currency, reason } => ExchangeError::RateUnavailable {
                currency,
                reason: format!("invalid quote: {reason}"),
            },
            FxError::SameCurrency(currency) => ExchangeError::SameCurrency(currency),
            FxError::AmountOutOfRange(reason) => ExchangeError::InvalidAmount(reason),
            FxError::InvalidRange { from, to } => ExchangeError::Validation {
                message: format!("Invalid date range {from}..={to}"),
                field: Some("date".to_string()),
            },
            FxError::NoRatesAvailable(reason) => ExchangeError::RatesNotFound(reason),
            FxError::Feed(feed) => ExchangeError::RateFeed(feed.to_string()),
            FxError::Storage(message) => ExchangeError::Storage(message),
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_maps_to_exchange_error() {
        let err = FxError::unavailable(&Currency::usd(), None, "feed down, no history");
        let mapped: ExchangeError = err.into();

        assert_eq!(mapped.error_code(), "RATE_UNAVAILABLE");
        assert!(mapped.is_rejection());
    }

    #[test]
    fn test_feed_error_display() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(
            FeedError::NotFound(Some(date)).to_string(),
            "No rate table published for 2024-03-02"
        );

        let mapped: ExchangeError = FxError::from(FeedError::Unavailable("timeout".into())).into();
        assert!(mapped.is_retryable());
    }
}
