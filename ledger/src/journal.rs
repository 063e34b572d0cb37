//! Append-only transaction log.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;

use kantor_common::{
    Currency, ExchangeError, Page, PageRequest, Result, Transaction, TransactionStatus,
    TransactionSummary, UserId,
};

use crate::store::LedgerStore;

/// History and summaries over recorded transactions.
///
/// Records that move balances are written by [`WalletLedger::commit`](crate::WalletLedger::commit);
/// this log appends the rest and answers queries.
pub struct TransactionLog {
    store: Arc<dyn LedgerStore>,
}

impl TransactionLog {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Append a final record.
    pub async fn append(&self, transaction: &Transaction) -> Result<()> {
        if !transaction.status.is_final() {
            return Err(ExchangeError::Internal(format!(
                "refusing to record {} transaction {}",
                transaction.status.as_str(),
                transaction.id
            )));
        }
        self.store.append_transaction(transaction).await?;
        debug!(transaction_id = %transaction.id, "Transaction appended");
        Ok(())
    }

    /// A user's transactions, newest first.
    pub async fn list_by_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        self.store.transactions_for_user(user_id, page).await
    }

    /// Aggregate counts and volumes for a user.
    pub async fn summarize(&self, user_id: &UserId) -> Result<TransactionSummary> {
        let transactions = self.store.all_transactions_for_user(user_id).await?;
        Ok(summarize(&transactions))
    }
}

/// Summarize a set of transactions.
///
/// Volumes sum `from_amount` of completed transactions by `from_currency`.
/// The most traded currency has the most completed transactions by
/// `from_currency`; ties go to the alphabetically smallest code.
pub fn summarize(transactions: &[Transaction]) -> TransactionSummary {
    let mut volume_by_currency: BTreeMap<Currency, Decimal> = BTreeMap::new();
    let mut counts: BTreeMap<&Currency, u64> = BTreeMap::new();
    let mut completed_count = 0;

    for tx in transactions
        .iter()
        .filter(|t| t.status == TransactionStatus::Completed)
    {
        completed_count += 1;
        if let Some(currency) = &tx.from_currency {
            *volume_by_currency.entry(currency.clone()).or_default() += tx.from_amount;
            *counts.entry(currency).or_default() += 1;
        }
    }

    // BTreeMap iterates in code order, so keeping the first maximum breaks ties.
    let most_traded_currency = counts
        .into_iter()
        .fold(None::<(&Currency, u64)>, |best, (currency, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((currency, count)),
        })
        .map(|(currency, _)| currency.clone());

    TransactionSummary {
        total_count: transactions.len() as u64,
        completed_count,
        most_traded_currency,
        volume_by_currency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use kantor_common::TransactionType;
    use rust_decimal_macros::dec;

    fn exchange(from: Currency, to: Currency, amount: Decimal) -> Transaction {
        Transaction::exchange(
            UserId::new("u1"),
            TransactionType::for_exchange(&Currency::pln(), &from, &to),
            from,
            to,
            amount,
            dec!(1),
            dec!(1),
        )
    }

    #[test]
    fn test_summary_volumes_and_most_traded() {
        let mut failed = exchange(Currency::gbp(), Currency::pln(), dec!(500));
        failed.status = TransactionStatus::Failed;

        let transactions = vec![
            Transaction::deposit(UserId::new("u1"), Currency::pln(), dec!(1000)),
            exchange(Currency::pln(), Currency::usd(), dec!(100)),
            exchange(Currency::usd(), Currency::pln(), dec!(10)),
            exchange(Currency::usd(), Currency::eur(), dec!(5)),
            failed,
        ];

        let summary = summarize(&transactions);
        assert_eq!(summary.total_count, 5);
        assert_eq!(summary.completed_count, 4);
        assert_eq!(summary.volume_by_currency[&Currency::pln()], dec!(1100.00));
        assert_eq!(summary.volume_by_currency[&Currency::usd()], dec!(15.00));
        assert!(!summary.volume_by_currency.contains_key(&Currency::gbp()));
        // PLN and USD both have two; PLN sorts first.
        assert_eq!(summary.most_traded_currency, Some(Currency::pln()));
    }

    #[test]
    fn test_summary_of_nothing() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_count, 0);
        assert_eq!(summary.most_traded_currency, None);
        assert!(summary.volume_by_currency.is_empty());
    }

    #[tokio::test]
    async fn test_append_refuses_pending() {
        let log = TransactionLog::new(Arc::new(MemoryLedgerStore::new()));
        let mut tx = exchange(Currency::pln(), Currency::usd(), dec!(1));
        tx.status = TransactionStatus::Pending;

        tokio_test::assert_err!(log.append(&tx).await);

        tx.status = TransactionStatus::Cancelled;
        log.append(&tx).await.unwrap();

        let page = log
            .list_by_user(&UserId::new("u1"), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total_elements, 1);

        let summary = log.summarize(&UserId::new("u1")).await.unwrap();
        assert_eq!(summary.completed_count, 0);
    }
}
