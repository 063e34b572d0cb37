//! Kantor Common Types
//!
//! This crate contains shared types used across the Kantor exchange engine,
//! including identifiers, monetary types, transaction records and the error
//! taxonomy surfaced to callers.

pub mod identifiers;
pub mod monetary;
pub mod transaction;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use transaction::*;
pub use error::*;
pub use time::*;
