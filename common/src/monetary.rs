//! Monetary types for the Kantor engine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scale of every wallet balance and transaction amount.
pub const AMOUNT_SCALE: u32 = 2;

/// Scale of bid/ask quotes and recorded effective rates.
pub const RATE_SCALE: u32 = 6;

/// The single rounding mode applied by every conversion path (half-up).
pub const ROUNDING: RoundingStrategy = RoundingStrategy::MidpointAwayFromZero;

/// Largest value a stored amount can hold, `NUMERIC(19, 2)`.
pub fn max_amount() -> Decimal {
    Decimal::from_i128_with_scale(99_999_999_999_999_999_99, AMOUNT_SCALE)
}

/// Whether `value` fits a stored amount column.
pub fn within_amount_range(value: Decimal) -> bool {
    value.abs() <= max_amount()
}

/// Round a monetary amount to wallet scale.
pub fn round_amount(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(AMOUNT_SCALE, ROUNDING);
    rounded.rescale(AMOUNT_SCALE);
    rounded
}

/// Round a rate to quote scale.
pub fn round_rate(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(RATE_SCALE, ROUNDING);
    rounded.rescale(RATE_SCALE);
    rounded
}

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Parse a code, accepting only three ASCII letters.
    pub fn parse(code: &str) -> Result<Self, InvalidCurrencyError> {
        let trimmed = code.trim();
        if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self::new(trimmed))
        } else {
            Err(InvalidCurrencyError(code.to_string()))
        }
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Base currency every rate is quoted against.
    pub fn pln() -> Self {
        Self::new("PLN")
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }

    pub fn chf() -> Self {
        Self::new("CHF")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Error for malformed currency codes.
#[derive(Debug, Clone)]
pub struct InvalidCurrencyError(pub String);

impl fmt::Display for InvalidCurrencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid currency code: {:?}", self.0)
    }
}

impl std::error::Error for InvalidCurrencyError {}

/// A persisted bid/ask observation for one currency on one date.
///
/// Quotes are against the base currency. Once written for a date the row is
/// never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// The quoted currency.
    pub currency: Currency,
    /// Display name reported by the feed.
    pub name: Option<String>,
    /// Effective date of the rate table.
    pub rate_date: NaiveDate,
    /// Price the system pays when buying the currency from the user.
    pub bid: Decimal,
    /// Price the system charges when selling the currency to the user.
    pub ask: Decimal,
    /// When this row was first recorded.
    pub created_at: DateTime<Utc>,
}

impl ExchangeRate {
    /// Create a new rate row, normalising both sides to quote scale.
    pub fn new(
        currency: Currency,
        name: Option<String>,
        rate_date: NaiveDate,
        bid: Decimal,
        ask: Decimal,
    ) -> Self {
        Self {
            currency,
            name,
            rate_date,
            bid: round_rate(bid),
            ask: round_rate(ask),
            created_at: Utc::now(),
        }
    }

    /// Both sides must be strictly positive.
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO
    }

    /// Mid-market rate, for display only.
    pub fn mid(&self) -> Decimal {
        round_rate((self.bid + self.ask) / Decimal::TWO)
    }

    /// Difference between ask and bid.
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Project into the quote shape handed to callers.
    pub fn quote(&self) -> RateQuote {
        RateQuote {
            currency: self.currency.clone(),
            name: self.name.clone(),
            bid: self.bid,
            ask: self.ask,
            mid: self.mid(),
            date: self.rate_date,
        }
    }
}

/// Best-known bid/ask for a currency on a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateQuote {
    pub currency: Currency,
    pub name: Option<String>,
    pub bid: Decimal,
    pub ask: Decimal,
    pub mid: Decimal,
    pub date: NaiveDate,
}
