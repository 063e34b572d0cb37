//! Wallet records.

use chrono::{DateTime, Utc};
use kantor_common::{round_amount, Currency, UserId, WalletKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A per-(user, currency) balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Owner and currency; at most one wallet exists per key.
    pub key: WalletKey,
    /// Current balance, never negative, at wallet scale.
    pub balance: Decimal,
    /// When the wallet was created.
    pub created_at: DateTime<Utc>,
    /// When the balance last changed.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet.
    pub fn new(key: WalletKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            balance: round_amount(Decimal::ZERO),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.key.user_id
    }

    pub fn currency(&self) -> &Currency {
        &self.key.currency
    }

    /// Check if the wallet covers a debit.
    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    /// Whether the wallet may be removed.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_wallet_is_empty() {
        let wallet = Wallet::new(WalletKey::new(UserId::new("u1"), Currency::pln()));

        assert!(wallet.is_empty());
        assert_eq!(wallet.balance.to_string(), "0.00");
        assert!(wallet.has_sufficient_funds(Decimal::ZERO));
        assert!(!wallet.has_sufficient_funds(dec!(0.01)));
        assert_eq!(wallet.currency(), &Currency::pln());
    }
}
