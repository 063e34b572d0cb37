//! Staged balance changes.

use kantor_common::WalletKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A balance mutation staged under a wallet lock, applied at commit.
///
/// `before` is the balance the change was computed from. Stores refuse to
/// apply a change whose `before` no longer matches the persisted balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub key: WalletKey,
    pub before: Decimal,
    pub after: Decimal,
    /// The wallet row is created by the same commit.
    #[serde(default)]
    pub created: bool,
}

impl BalanceChange {
    /// Signed difference applied to the wallet.
    pub fn delta(&self) -> Decimal {
        self.after - self.before
    }

    pub fn is_debit(&self) -> bool {
        self.after < self.before
    }

    /// Check if the resulting balance respects the non-negative invariant.
    pub fn is_valid(&self) -> bool {
        self.after >= Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kantor_common::{Currency, UserId};
    use rust_decimal_macros::dec;

    #[test]
    fn test_delta_and_direction() {
        let change = BalanceChange {
            key: WalletKey::new(UserId::new("u1"), Currency::pln()),
            before: dec!(1000.00),
            after: dec!(900.00),
            created: false,
        };

        assert_eq!(change.delta(), dec!(-100.00));
        assert!(change.is_debit());
        assert!(change.is_valid());
    }
}
