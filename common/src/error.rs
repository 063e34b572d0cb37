//! Error types for the Kantor engine.

use crate::{Currency, WalletKey};
use thiserror::Error;

/// Main error type for exchange and ledger operations.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Request rejected before any lock was taken.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Source and target currency are identical.
    #[error("Source and target currency must differ: {0}")]
    SameCurrency(Currency),

    /// Amount is zero or negative.
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(String),

    /// A wallet required by the operation does not exist.
    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletKey),

    /// Neither the feed nor persisted history can price the currency.
    #[error("Rate unavailable for {currency}: {reason}")]
    RateUnavailable { currency: Currency, reason: String },

    /// No rate table is known for the request.
    #[error("No exchange rates available: {0}")]
    RatesNotFound(String),

    /// The rate feed could not be queried.
    #[error("Rate feed error: {0}")]
    RateFeed(String),

    /// Debit would drive the balance below zero.
    #[error("Insufficient funds in {wallet}: required {required}, available {available}")]
    InsufficientFunds {
        wallet: WalletKey,
        required: String,
        available: String,
    },

    /// Lock acquisition exceeded its bounded wait.
    #[error("Timed out after {waited_ms}ms waiting for lock on {wallet}")]
    ConcurrencyTimeout { wallet: WalletKey, waited_ms: u64 },

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    /// Shorthand for a validation failure without a field.
    pub fn validation(message: impl Into<String>) -> Self {
        ExchangeError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Check if this error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::ConcurrencyTimeout { .. }
                | ExchangeError::RateFeed(_)
                | ExchangeError::Storage(_)
        )
    }

    /// Whether the request was rejected by local validation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ExchangeError::Validation { .. }
                | ExchangeError::SameCurrency(_)
                | ExchangeError::InvalidAmount(_)
        )
    }

    /// Whether this is a business rejection rather than an infrastructure fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ExchangeError::Validation { .. }
                | ExchangeError::SameCurrency(_)
                | ExchangeError::InvalidAmount(_)
                | ExchangeError::WalletNotFound(_)
                | ExchangeError::RateUnavailable { .. }
                | ExchangeError::RatesNotFound(_)
                | ExchangeError::InsufficientFunds { .. }
                | ExchangeError::ConcurrencyTimeout { .. }
        )
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ExchangeError::ConcurrencyTimeout { .. } => Some(250),
            ExchangeError::RateFeed(_) => Some(5000),
            ExchangeError::Storage(_) => Some(1000),
            _ => None,
        }
    }

    /// Get a stable error code for callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            ExchangeError::Validation { .. } => "VALIDATION_ERROR",
            ExchangeError::SameCurrency(_) => "SAME_CURRENCY",
            ExchangeError::InvalidAmount(_) => "INVALID_AMOUNT",
            ExchangeError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            ExchangeError::RateUnavailable { .. } => "RATE_UNAVAILABLE",
            ExchangeError::RatesNotFound(_) => "RATES_NOT_FOUND",
            ExchangeError::RateFeed(_) => "RATE_FEED_ERROR",
            ExchangeError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            ExchangeError::ConcurrencyTimeout { .. } => "CONCURRENCY_TIMEOUT",
            ExchangeError::Storage(_) => "STORAGE_ERROR",
            ExchangeError::Configuration(_) => "CONFIGURATION_ERROR",
            ExchangeError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserId;

    #[test]
    fn test_retryable() {
        let key = WalletKey::new(UserId::new("u1"), Currency::usd());
        let timeout = ExchangeError::ConcurrencyTimeout {
            wallet: key.clone(),
            waited_ms: 5000,
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.retry_after_ms(), Some(250));

        let funds = ExchangeError::InsufficientFunds {
            wallet: key,
            required: "10.00".into(),
            available: "5.00".into(),
        };
        assert!(!funds.is_retryable());
        assert!(funds.is_rejection());
        assert_eq!(funds.error_code(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn test_same_currency_is_validation_class() {
        let err = ExchangeError::SameCurrency(Currency::pln());
        assert!(err.is_rejection());
        assert!(!err.is_retryable());
        assert_eq!(err.error_code(), "SAME_CURRENCY");
    }
}
