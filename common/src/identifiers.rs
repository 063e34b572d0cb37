//! Identifier types for Kantor entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::Currency;

/// Unique identifier for a transaction.
/// Uses UUID v7 for time-ordered identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Create a new transaction ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to the owning user.
///
/// Identity is resolved outside the engine; the core only threads the value
/// through and never inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a new user ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the user ID format.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.len() <= 64 && !self.0.chars().any(char::is_whitespace)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of a wallet: at most one wallet exists per key.
///
/// The derived ordering (user, then currency code) is the lock acquisition
/// order used by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletKey {
    /// The user that owns this wallet.
    pub user_id: UserId,
    /// Currency of the wallet (ISO 4217).
    pub currency: Currency,
}

impl WalletKey {
    /// Create a new wallet key.
    pub fn new(user_id: UserId, currency: Currency) -> Self {
        Self { user_id, currency }
    }

    /// Create a canonical string representation.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.user_id, self.currency)
    }
}

impl fmt::Display for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}
