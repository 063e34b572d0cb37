//! Wallet ledger.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use kantor_common::{
    max_amount, round_amount, within_amount_range, Currency, ExchangeError, Result, Transaction,
    UserId, WalletKey,
};

use crate::balance::BalanceChange;
use crate::lock_manager::{LockConfig, WalletLock, WalletLockManager};
use crate::store::LedgerStore;
use crate::wallet::Wallet;

/// A locked wallet with a staged balance.
///
/// Debits and credits only change the staged balance. They reach the store
/// through [`WalletLedger::commit`]; dropping the handle discards them and
/// releases the lock.
#[derive(Debug)]
pub struct WalletHandle {
    lock: WalletLock,
    wallet: Wallet,
    original: Decimal,
    is_new: bool,
}

impl WalletHandle {
    fn new(lock: WalletLock, wallet: Wallet) -> Self {
        let original = wallet.balance;
        Self {
            lock,
            wallet,
            original,
            is_new: false,
        }
    }

    fn staged(lock: WalletLock) -> Self {
        let wallet = Wallet::new(lock.key().clone());
        Self {
            is_new: true,
            ..Self::new(lock, wallet)
        }
    }

    pub fn key(&self) -> &WalletKey {
        self.lock.key()
    }

    /// Staged balance.
    pub fn balance(&self) -> Decimal {
        self.wallet.balance
    }

    /// Balance when the handle was opened.
    pub fn original_balance(&self) -> Decimal {
        self.original
    }

    /// Staged view of the wallet.
    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// Whether the wallet row only exists once this handle is committed.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Subtract `amount` from the staged balance.
    pub fn debit(&mut self, amount: Decimal) -> Result<()> {
        let amount = positive_amount(amount)?;
        if !self.wallet.has_sufficient_funds(amount) {
            return Err(ExchangeError::InsufficientFunds {
                wallet: self.key().clone(),
                required: amount.to_string(),
                available: self.wallet.balance.to_string(),
            });
        }
        let balance = self
            .wallet
            .balance
            .checked_sub(amount)
            .ok_or_else(|| out_of_range(self.key(), amount))?;
        self.wallet.balance = round_amount(balance);
        Ok(())
    }

    /// Add `amount` to the staged balance.
    ///
    /// Fails with `InvalidAmount` if the result would not fit a stored balance.
    pub fn credit(&mut self, amount: Decimal) -> Result<()> {
        let amount = positive_amount(amount)?;
        let balance = self
            .wallet
            .balance
            .checked_add(amount)
            .filter(|b| within_amount_range(*b))
            .ok_or_else(|| out_of_range(self.key(), amount))?;
        self.wallet.balance = round_amount(balance);
        Ok(())
    }

    /// The pending change, if the staged balance differs from the original
    /// or the wallet still has to be created.
    pub fn change(&self) -> Option<BalanceChange> {
        (self.is_new || self.wallet.balance != self.original).then(|| BalanceChange {
            key: self.key().clone(),
            before: self.original,
            after: self.wallet.balance,
            created: self.is_new,
        })
    }
}

fn positive_amount(amount: Decimal) -> Result<Decimal> {
    if !within_amount_range(amount) {
        return Err(ExchangeError::InvalidAmount(format!(
            "{} exceeds the maximum of {}",
            amount,
            max_amount()
        )));
    }
    let amount = round_amount(amount);
    if amount <= Decimal::ZERO {
        return Err(ExchangeError::InvalidAmount(amount.to_string()));
    }
    Ok(amount)
}

fn out_of_range(key: &WalletKey, amount: Decimal) -> ExchangeError {
    ExchangeError::InvalidAmount(format!(
        "moving {} on {} leaves the balance outside 0..={}",
        amount,
        key,
        max_amount()
    ))
}

/// Owner of per-(user, currency) balances.
pub struct WalletLedger {
    store: Arc<dyn LedgerStore>,
    locks: WalletLockManager,
}

impl WalletLedger {
    /// Create a new ledger.
    pub fn new(store: Arc<dyn LedgerStore>, config: LockConfig) -> Self {
        Self {
            store,
            locks: WalletLockManager::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn lock_manager(&self) -> &WalletLockManager {
        &self.locks
    }

    /// Return the wallet for the key, creating an empty one if absent.
    ///
    /// Racing creators all observe the single stored row.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, user_id: &UserId, currency: &Currency) -> Result<Wallet> {
        let key = WalletKey::new(user_id.clone(), currency.clone());
        if let Some(wallet) = self.store.find_wallet(&key).await? {
            return Ok(wallet);
        }

        let wallet = self.store.insert_wallet_if_absent(Wallet::new(key)).await?;
        info!(wallet = %wallet.key, "Wallet created");
        Ok(wallet)
    }

    /// Look up a wallet without locking.
    pub async fn get_wallet(&self, key: &WalletKey) -> Result<Option<Wallet>> {
        self.store.find_wallet(key).await
    }

    /// All wallets of a user, ordered by currency code.
    pub async fn wallets(&self, user_id: &UserId) -> Result<Vec<Wallet>> {
        self.store.wallets_for_user(user_id).await
    }

    /// Lock an existing wallet for update.
    #[instrument(skip_all, fields(wallet = %key))]
    pub async fn lock_for_update(&self, key: &WalletKey) -> Result<WalletHandle> {
        let lock = self.locks.acquire(key).await?;
        self.open(lock).await
    }

    /// Take the locks for several wallets in the total key order.
    pub async fn lock_keys(&self, keys: &[WalletKey]) -> Result<Vec<WalletLock>> {
        self.locks.acquire_all(keys).await
    }

    /// Load an existing wallet under a lock already held.
    pub async fn open(&self, lock: WalletLock) -> Result<WalletHandle> {
        let wallet = self
            .store
            .find_wallet(lock.key())
            .await?
            .ok_or_else(|| ExchangeError::WalletNotFound(lock.key().clone()))?;
        Ok(WalletHandle::new(lock, wallet))
    }

    /// Load a wallet under a lock already held, staging a new empty one if
    /// it does not exist.
    ///
    /// A staged wallet is only written by [`WalletLedger::commit`], so an
    /// aborted operation leaves no row behind.
    pub async fn open_or_create(&self, lock: WalletLock) -> Result<WalletHandle> {
        match self.store.find_wallet(lock.key()).await? {
            Some(wallet) => Ok(WalletHandle::new(lock, wallet)),
            None => {
                debug!(wallet = %lock.key(), "Wallet staged for creation");
                Ok(WalletHandle::staged(lock))
            }
        }
    }

    /// Persist the staged changes of `handles` together with `transaction`.
    ///
    /// Either every change and the record are stored, or none is. Locks are
    /// released when the handles drop at the end of this call.
    #[instrument(skip_all, fields(transaction_id = %transaction.id))]
    pub async fn commit(
        &self,
        handles: Vec<WalletHandle>,
        transaction: &Transaction,
    ) -> Result<Vec<Wallet>> {
        let changes: Vec<BalanceChange> = handles.iter().filter_map(WalletHandle::change).collect();
        self.store.commit(&changes, transaction).await?;

        debug!(changes = changes.len(), "Ledger commit applied");
        Ok(handles.into_iter().map(|h| h.wallet).collect())
    }
}
