//! Ledger persistence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use kantor_common::{
    ExchangeError, Page, PageRequest, Result, Transaction, UserId, WalletKey,
};

use crate::balance::BalanceChange;
use crate::wallet::Wallet;

/// Storage for wallets and transactions.
///
/// `commit` is the only way balances change, and it writes the balance
/// changes and the transaction record as one atomic unit.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Look up a wallet.
    async fn find_wallet(&self, key: &WalletKey) -> Result<Option<Wallet>>;

    /// All wallets of a user, ordered by currency code.
    async fn wallets_for_user(&self, user_id: &UserId) -> Result<Vec<Wallet>>;

    /// Insert the wallet unless one exists for its key; returns the stored row.
    async fn insert_wallet_if_absent(&self, wallet: Wallet) -> Result<Wallet>;

    /// Apply balance changes and append the transaction atomically.
    ///
    /// Changes marked `created` insert their wallet row in the same unit.
    /// Fails without side effects if any other wallet is missing, a balance no
    /// longer equals `before`, or a resulting balance would be negative.
    async fn commit(&self, changes: &[BalanceChange], transaction: &Transaction) -> Result<()>;

    /// Append a transaction that moves no balance.
    async fn append_transaction(&self, transaction: &Transaction) -> Result<()>;

    /// A user's transactions, newest first.
    async fn transactions_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Transaction>>;

    /// Every transaction of a user, newest first.
    async fn all_transactions_for_user(&self, user_id: &UserId) -> Result<Vec<Transaction>>;
}

#[derive(Default)]
struct MemoryState {
    wallets: BTreeMap<WalletKey, Wallet>,
    transactions: Vec<Transaction>,
}

/// In-memory ledger store. Commits are serialized by a single mutex.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every wallet, ordered by key.
    pub fn all_wallets(&self) -> Vec<Wallet> {
        self.state.lock().wallets.values().cloned().collect()
    }

    /// Every transaction, in append order.
    pub fn all_transactions(&self) -> Vec<Transaction> {
        self.state.lock().transactions.clone()
    }

    pub fn transaction_count(&self) -> usize {
        self.state.lock().transactions.len()
    }
}

fn newest_first(state: &MemoryState, user_id: &UserId) -> Vec<Transaction> {
    let mut rows: Vec<Transaction> = state
        .transactions
        .iter()
        .rev()
        .filter(|t| &t.user_id == user_id)
        .cloned()
        .collect();
    // Stable: equal timestamps keep reverse append order.
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rows
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn find_wallet(&self, key: &WalletKey) -> Result<Option<Wallet>> {
        Ok(self.state.lock().wallets.get(key).cloned())
    }

    async fn wallets_for_user(&self, user_id: &UserId) -> Result<Vec<Wallet>> {
        Ok(self
            .state
            .lock()
            .wallets
            .values()
            .filter(|w| w.user_id() == user_id)
            .cloned()
            .collect())
    }

    async fn insert_wallet_if_absent(&self, wallet: Wallet) -> Result<Wallet> {
        let mut state = self.state.lock();
        Ok(state
            .wallets
            .entry(wallet.key.clone())
            .or_insert(wallet)
            .clone())
    }

    async fn commit(&self, changes: &[BalanceChange], transaction: &Transaction) -> Result<()> {
        let mut state = self.state.lock();

        // Validate everything before touching anything.
        for change in changes {
            let current = match state.wallets.get(&change.key) {
                Some(wallet) => wallet.balance,
                None if change.created => Decimal::ZERO,
                None => return Err(ExchangeError::WalletNotFound(change.key.clone())),
            };
            if current != change.before {
                return Err(ExchangeError::Storage(format!(
                    "stale balance for {}: expected {}, found {}",
                    change.key, change.before, current
                )));
            }
            if !change.is_valid() {
                return Err(ExchangeError::InsufficientFunds {
                    wallet: change.key.clone(),
                    required: (-change.delta()).to_string(),
                    available: change.before.to_string(),
                });
            }
        }

        let now = Utc::now();
        for change in changes {
            let wallet = state
                .wallets
                .entry(change.key.clone())
                .or_insert_with(|| Wallet::new(change.key.clone()));
            wallet.balance = change.after;
            wallet.updated_at = now;
        }
        state.transactions.push(transaction.clone());
        Ok(())
    }

    async fn append_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.state.lock().transactions.push(transaction.clone());
        Ok(())
    }

    async fn transactions_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        let state = self.state.lock();
        let rows = newest_first(&state, user_id);
        let total = rows.len() as u64;
        let items = rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect();
        Ok(Page::new(items, page, total))
    }

    async fn all_transactions_for_user(&self, user_id: &UserId) -> Result<Vec<Transaction>> {
        Ok(newest_first(&self.state.lock(), user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kantor_common::{Currency, TransactionType};
    use rust_decimal_macros::dec;

    fn key(currency: Currency) -> WalletKey {
        WalletKey::new(UserId::new("u1"), currency)
    }

    fn exchange_tx() -> Transaction {
        Transaction::exchange(
            UserId::new("u1"),
            TransactionType::Buy,
            Currency::pln(),
            Currency::usd(),
            dec!(100),
            dec!(25),
            dec!(4),
        )
    }

    async fn funded_store() -> MemoryLedgerStore {
        let store = MemoryLedgerStore::new();
        let mut pln = Wallet::new(key(Currency::pln()));
        pln.balance = dec!(1000.00);
        store.insert_wallet_if_absent(pln).await.unwrap();
        store
            .insert_wallet_if_absent(Wallet::new(key(Currency::usd())))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_if_absent_returns_existing() {
        let store = funded_store().await;
        let again = store
            .insert_wallet_if_absent(Wallet::new(key(Currency::pln())))
            .await
            .unwrap();

        assert_eq!(again.balance, dec!(1000.00));
        assert_eq!(store.all_wallets().len(), 2);
    }

    #[tokio::test]
    async fn test_commit_applies_all_changes_and_records() {
        let store = funded_store().await;
        let changes = vec![
            BalanceChange {
                key: key(Currency::pln()),
                before: dec!(1000.00),
                after: dec!(900.00),
                created: false,
            },
            BalanceChange {
                key: key(Currency::usd()),
                before: dec!(0.00),
                after: dec!(25.00),
                created: false,
            },
        ];

        store.commit(&changes, &exchange_tx()).await.unwrap();

        let pln = store.find_wallet(&key(Currency::pln())).await.unwrap().unwrap();
        let usd = store.find_wallet(&key(Currency::usd())).await.unwrap().unwrap();
        assert_eq!(pln.balance, dec!(900.00));
        assert_eq!(usd.balance, dec!(25.00));
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = funded_store().await;
        let changes = vec![
            BalanceChange {
                key: key(Currency::pln()),
                before: dec!(1000.00),
                after: dec!(900.00),
                created: false,
            },
            BalanceChange {
                key: key(Currency::usd()),
                before: dec!(5.00),
                after: dec!(30.00),
                created: false,
            },
        ];

        let err = store.commit(&changes, &exchange_tx()).await.unwrap_err();
        assert_eq!(err.error_code(), "STORAGE_ERROR");

        let pln = store.find_wallet(&key(Currency::pln())).await.unwrap().unwrap();
        assert_eq!(pln.balance, dec!(1000.00));
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_creates_staged_wallet_only_on_success() {
        let store = funded_store().await;
        let eur = |before| BalanceChange {
            key: key(Currency::eur()),
            before,
            after: dec!(10.00),
            created: true,
        };
        let stale_pln = BalanceChange {
            key: key(Currency::pln()),
            before: dec!(999.00),
            after: dec!(950.00),
            created: false,
        };

        tokio_test::assert_err!(store.commit(&[stale_pln, eur(dec!(0.00))], &exchange_tx()).await);
        assert!(store.find_wallet(&key(Currency::eur())).await.unwrap().is_none());

        store.commit(&[eur(dec!(0.00))], &exchange_tx()).await.unwrap();
        let created = store.find_wallet(&key(Currency::eur())).await.unwrap().unwrap();
        assert_eq!(created.balance, dec!(10.00));
        assert_eq!(store.all_wallets().len(), 3);
    }

    #[tokio::test]
    async fn test_commit_rejects_negative_result() {
        let store = funded_store().await;
        let changes = vec![BalanceChange {
            key: key(Currency::pln()),
            before: dec!(1000.00),
            after: dec!(-1.00),
            created: false,
        }];

        let err = store.commit(&changes, &exchange_tx()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_transactions_paged_newest_first() {
        let store = MemoryLedgerStore::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let tx = exchange_tx();
            ids.push(tx.id);
            store.append_transaction(&tx).await.unwrap();
        }

        let page = store
            .transactions_for_user(&UserId::new("u1"), PageRequest::new(0, 2))
            .await
            .unwrap();
        assert_eq!(page.total_elements, 5);
        assert_eq!(page.total_pages(), 3);
        assert_eq!(page.items[0].id, ids[4]);

        let last = store
            .transactions_for_user(&UserId::new("u1"), PageRequest::new(2, 2))
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].id, ids[0]);

        let other = store
            .transactions_for_user(&UserId::new("u2"), PageRequest::default())
            .await
            .unwrap();
        assert!(other.items.is_empty());
    }
}
