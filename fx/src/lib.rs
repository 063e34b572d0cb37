//! Kantor FX
//!
//! Exchange-rate resolution and conversion pricing against a base currency.
//!
//! # Features
//!
//! - Pluggable rate feed (`RateFeed`) with an NBP table C adapter
//! - Persisted rate history (`RateStore`), never overwritten once written
//! - Day-scoped quote cache with fallback to the most recent persisted rate
//! - Direct and pivot (cross) conversion pricing with one rounding policy
//!
//! # Example
//!
//! ```rust,ignore
//! use kantor_fx::{RateResolver, RateResolverConfig, NbpRateFeed, MemoryRateStore};
//! use kantor_common::Currency;
//!
//! let resolver = RateResolver::new(feed, store, RateResolverConfig::default());
//!
//! // Best-known quote for today
//! let quote = resolver.get_current_rate(&Currency::usd()).await?;
//!
//! // Price 100.00 PLN into USD
//! let conversion = resolver.price(&Currency::pln(), &Currency::usd(), dec!(100)).await?;
//! ```

pub mod resolver;
pub mod provider;
pub mod nbp;
pub mod store;
pub mod postgres;
pub mod cache;
pub mod conversion;
pub mod error;

pub use resolver::{RateResolver, RateResolverConfig, SyncReport};
pub use provider::{FeedRate, RateFeed, RateTable};
pub use nbp::{NbpRateFeed, RateFeedConfig, DEFAULT_NBP_URL, NBP_QUOTE_CURRENCY};
pub use store::{InsertOutcome, MemoryRateStore, RateStore};
pub use postgres::PgRateStore;
pub use cache::{QuoteCache, QuoteSource};
pub use conversion::{Conversion, ConversionPath};
pub use error::{FeedError, FxError, FxResult};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateFeed;
