//! Transaction records and their lifecycle.

use std::collections::BTreeMap;

use crate::{round_amount, round_rate, Currency, TransactionId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of monetary event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Simulated top-up of the base currency wallet.
    Deposit,
    /// Funds leaving the system.
    Withdrawal,
    /// Base currency exchanged into a foreign one (and cross exchanges).
    Buy,
    /// Foreign currency exchanged into the base currency.
    Sell,
    /// Movement between wallets without pricing.
    Transfer,
}

impl TransactionType {
    /// Classify an exchange: base -> foreign is a buy, foreign -> base a sell,
    /// and foreign -> foreign is recorded as a buy.
    pub fn for_exchange(base: &Currency, from: &Currency, to: &Currency) -> Self {
        if from == base {
            TransactionType::Buy
        } else if to == base {
            TransactionType::Sell
        } else {
            TransactionType::Buy
        }
    }

    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
            TransactionType::Transfer => "TRANSFER",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEPOSIT" => Some(TransactionType::Deposit),
            "WITHDRAWAL" => Some(TransactionType::Withdrawal),
            "BUY" => Some(TransactionType::Buy),
            "SELL" => Some(TransactionType::Sell),
            "TRANSFER" => Some(TransactionType::Transfer),
            _ => None,
        }
    }
}

/// Transaction status representing the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Accepted but not yet applied.
    Pending,
    /// Applied to the ledger.
    Completed,
    /// Could not be applied.
    Failed,
    /// Withdrawn before being applied.
    Cancelled,
}

impl TransactionStatus {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[TransactionStatus] {
        match self {
            TransactionStatus::Pending => &[
                TransactionStatus::Completed,
                TransactionStatus::Failed,
                TransactionStatus::Cancelled,
            ],
            TransactionStatus::Completed => &[],
            TransactionStatus::Failed => &[],
            TransactionStatus::Cancelled => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransactionStatus::Pending),
            "COMPLETED" => Some(TransactionStatus::Completed),
            "FAILED" => Some(TransactionStatus::Failed),
            "CANCELLED" => Some(TransactionStatus::Cancelled),
            _ => None,
        }
    }
}

/// An append-only record of a monetary event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier.
    pub id: TransactionId,
    /// Owning user.
    pub user_id: UserId,
    /// Kind of event.
    pub transaction_type: TransactionType,
    pub from_currency: Option<Currency>,
    pub to_currency: Option<Currency>,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    /// Rate actually applied (quote scale), absent for pure deposits.
    pub rate: Option<Decimal>,
    /// Current status.
    pub status: TransactionStatus,
    /// Free-form description.
    pub description: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// A completed exchange between two wallets of the same user.
    #[allow(clippy::too_many_arguments)]
    pub fn exchange(
        user_id: UserId,
        transaction_type: TransactionType,
        from_currency: Currency,
        to_currency: Currency,
        from_amount: Decimal,
        to_amount: Decimal,
        rate: Decimal,
    ) -> Self {
        let description = format!("Exchange {} to {}", from_currency, to_currency);
        Self {
            id: TransactionId::new(),
            user_id,
            transaction_type,
            from_currency: Some(from_currency),
            to_currency: Some(to_currency),
            from_amount: round_amount(from_amount),
            to_amount: round_amount(to_amount),
            rate: Some(round_rate(rate)),
            status: TransactionStatus::Completed,
            description: Some(description),
            created_at: Utc::now(),
        }
    }

    /// A completed simulated top-up.
    pub fn deposit(user_id: UserId, currency: Currency, amount: Decimal) -> Self {
        Self {
            id: TransactionId::new(),
            user_id,
            transaction_type: TransactionType::Deposit,
            from_currency: Some(currency.clone()),
            to_currency: Some(currency),
            from_amount: round_amount(amount),
            to_amount: round_amount(amount),
            rate: Some(round_rate(Decimal::ONE)),
            status: TransactionStatus::Completed,
            description: Some("Top-up (simulated)".to_string()),
            created_at: Utc::now(),
        }
    }

    /// Whether the event has been applied to the ledger.
    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }
}

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    /// Largest accepted page size.
    pub const MAX_SIZE: u32 = 100;

    /// Create a page request, clamping the size into `1..=MAX_SIZE`.
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
}

impl<T> Page<T> {
    /// Build a page from its rows and the total count.
    pub fn new(items: Vec<T>, request: PageRequest, total_elements: u64) -> Self {
        Self {
            items,
            page: request.page,
            size: request.size,
            total_elements,
        }
    }

    /// Total number of pages.
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        self.total_elements.div_ceil(u64::from(self.size))
    }

    /// Whether a later page exists.
    pub fn has_next(&self) -> bool {
        u64::from(self.page) + 1 < self.total_pages()
    }
}

/// Aggregate view over a user's transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub total_count: u64,
    pub completed_count: u64,
    pub most_traded_currency: Option<Currency>,
    /// Sum of `from_amount` over completed transactions, by `from_currency`.
    pub volume_by_currency: BTreeMap<Currency, Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_type_for_exchange() {
        let pln = Currency::pln();
        assert_eq!(
            TransactionType::for_exchange(&pln, &pln, &Currency::usd()),
            TransactionType::Buy
        );
        assert_eq!(
            TransactionType::for_exchange(&pln, &Currency::usd(), &pln),
            TransactionType::Sell
        );
        assert_eq!(
            TransactionType::for_exchange(&pln, &Currency::eur(), &Currency::usd()),
            TransactionType::Buy
        );
    }

    #[test]
    fn test_status_transitions() {
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Completed));
        assert!(!TransactionStatus::Completed.can_transition_to(TransactionStatus::Failed));
        assert!(!TransactionStatus::Failed.can_transition_to(TransactionStatus::Completed));
        assert!(TransactionStatus::Cancelled.is_final());
        assert!(!TransactionStatus::Pending.is_final());
    }

    #[test]
    fn test_storage_names_roundtrip() {
        for t in [
            TransactionType::Deposit,
            TransactionType::Withdrawal,
            TransactionType::Buy,
            TransactionType::Sell,
            TransactionType::Transfer,
        ] {
            assert_eq!(TransactionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TransactionStatus::parse("COMPLETED"), Some(TransactionStatus::Completed));
        assert_eq!(TransactionStatus::parse("done"), None);
    }

    #[test]
    fn test_serde_uses_screaming_case() {
        let json = serde_json::to_string(&TransactionType::Sell).unwrap();
        assert_eq!(json, "\"SELL\"");
    }

    #[test]
    fn test_exchange_record_scales() {
        let tx = Transaction::exchange(
            UserId::new("u1"),
            TransactionType::Buy,
            Currency::pln(),
            Currency::usd(),
            dec!(100),
            dec!(25),
            dec!(4),
        );

        assert!(tx.is_completed());
        assert_eq!(tx.from_amount.to_string(), "100.00");
        assert_eq!(tx.to_amount.to_string(), "25.00");
        assert_eq!(tx.rate.unwrap().to_string(), "4.000000");
    }

    #[test]
    fn test_page_math() {
        let request = PageRequest::new(1, 10);
        let page: Page<u8> = Page::new(vec![], request, 25);

        assert_eq!(request.offset(), 10);
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());

        let last: Page<u8> = Page::new(vec![], PageRequest::new(2, 10), 25);
        assert!(!last.has_next());
    }

    #[test]
    fn test_page_request_clamps_size() {
        assert_eq!(PageRequest::new(0, 0).size, 1);
        assert_eq!(PageRequest::new(0, 1000).size, PageRequest::MAX_SIZE);
    }
}
