//! Exchange engine.
//!
//! Orchestrates the exchange flow:
//! 1. Validate the request
//! 2. Lock both wallets in key order and load the source
//! 3. Price the conversion at current quotes
//! 4. Load or create the target wallet
//! 5. Stage debit and credit
//! 6. Commit balances and the transaction record together

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use kantor_common::{
    max_amount, within_amount_range, Currency, ExchangeError, ExchangeRate, Page, PageRequest,
    RateQuote, Result, Transaction, TransactionSummary, TransactionType, UserId, WalletKey,
    AMOUNT_SCALE,
};
use kantor_fx::{RateResolver, SyncReport};
use kantor_ledger::{LedgerStore, LockConfig, TransactionLog, Wallet, WalletLedger, WalletLock};

use crate::metrics::{Metrics, SharedMetrics};
use crate::state::{ExchangeProgress, ExchangeState};

/// Converts funds between a user's wallets at current rates.
pub struct ExchangeEngine {
    ledger: WalletLedger,
    journal: TransactionLog,
    resolver: Arc<RateResolver>,
    metrics: SharedMetrics,
}

impl ExchangeEngine {
    /// Create a new engine.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        resolver: Arc<RateResolver>,
        lock_config: LockConfig,
    ) -> Self {
        Self {
            ledger: WalletLedger::new(store.clone(), lock_config),
            journal: TransactionLog::new(store),
            resolver,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn base_currency(&self) -> &Currency {
        self.resolver.base_currency()
    }

    pub fn ledger(&self) -> &WalletLedger {
        &self.ledger
    }

    pub fn resolver(&self) -> &Arc<RateResolver> {
        &self.resolver
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Exchange `amount` of `from` into `to` for `user_id`.
    ///
    /// On success both balances and the COMPLETED transaction are stored.
    /// On any error nothing is written.
    #[instrument(skip_all, fields(user = %user_id, from = %from, to = %to, amount = %amount))]
    pub async fn exchange(
        &self,
        user_id: &UserId,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
    ) -> Result<Transaction> {
        let _active = self.metrics.exchange_started();
        let mut progress = ExchangeProgress::new();

        let result = self
            .run_exchange(&mut progress, user_id, from, to, amount)
            .await;

        match &result {
            Ok(tx) => {
                self.metrics.exchange_completed();
                info!(
                    transaction_id = %tx.id,
                    to_amount = %tx.to_amount,
                    elapsed_ms = progress.elapsed_ms(),
                    "Exchange recorded"
                );
            }
            Err(e) => {
                if matches!(e, ExchangeError::ConcurrencyTimeout { .. }) {
                    self.metrics.lock_timeout();
                }
                let at = progress.state();
                match progress.abort(e) {
                    ExchangeState::Rejected => {
                        self.metrics.exchange_rejected();
                        info!(state = %at, code = e.error_code(), error = %e, "Exchange rejected");
                    }
                    _ => {
                        self.metrics.exchange_failed();
                        warn!(state = %at, code = e.error_code(), error = %e, "Exchange failed");
                    }
                }
            }
        }

        result
    }

    async fn run_exchange(
        &self,
        progress: &mut ExchangeProgress,
        user_id: &UserId,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
    ) -> Result<Transaction> {
        // Step 1: Validate
        validate_user(user_id)?;
        if from == to {
            return Err(ExchangeError::SameCurrency(from.clone()));
        }
        validate_amount(amount)?;

        // Step 2: Lock both wallets and load the source
        let source_key = WalletKey::new(user_id.clone(), from.clone());
        let target_key = WalletKey::new(user_id.clone(), to.clone());
        let locks = self
            .ledger
            .lock_keys(&[source_key.clone(), target_key.clone()])
            .await?;
        let (source_lock, target_lock) = split_locks(locks, &source_key)?;

        let mut source = self.ledger.open(source_lock).await?;
        progress.advance(ExchangeState::SourceLocked)?;

        if source.balance() < amount {
            return Err(ExchangeError::InsufficientFunds {
                wallet: source_key,
                required: amount.to_string(),
                available: source.balance().to_string(),
            });
        }

        // Step 3: Price the conversion
        let conversion = self.resolver.price(from, to, amount).await?;
        if conversion.target_amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidAmount(format!(
                "{} {} converts to {} {}",
                amount, from, conversion.target_amount, to
            )));
        }
        progress.advance(ExchangeState::RatesResolved)?;
        debug!(
            target_amount = %conversion.target_amount,
            rate = %conversion.applied_rate,
            cross = conversion.path.is_cross(),
            "Conversion priced"
        );

        // Step 4: Load or create the target
        let mut target = self.ledger.open_or_create(target_lock).await?;
        progress.advance(ExchangeState::TargetLocked)?;

        // Step 5: Stage debit and credit
        source.debit(conversion.amount)?;
        target.credit(conversion.target_amount)?;
        progress.advance(ExchangeState::Applied)?;

        // Step 6: Commit
        let transaction = Transaction::exchange(
            user_id.clone(),
            TransactionType::for_exchange(self.base_currency(), from, to),
            from.clone(),
            to.clone(),
            conversion.amount,
            conversion.target_amount,
            conversion.applied_rate,
        );
        self.ledger.commit(vec![source, target], &transaction).await?;
        progress.advance(ExchangeState::Recorded)?;

        Ok(transaction)
    }

    /// Credit `amount` of the base currency to the user's wallet.
    ///
    /// Creates the wallet when missing. The DEPOSIT record is stored with the
    /// balance change.
    #[instrument(skip_all, fields(user = %user_id, amount = %amount))]
    pub async fn deposit(&self, user_id: &UserId, amount: Decimal) -> Result<Wallet> {
        validate_user(user_id)?;
        validate_amount(amount)?;

        let base = self.base_currency().clone();
        let key = WalletKey::new(user_id.clone(), base.clone());
        let lock = self.ledger.lock_manager().acquire(&key).await?;
        let mut wallet = self.ledger.open_or_create(lock).await?;
        wallet.credit(amount)?;

        let transaction = Transaction::deposit(user_id.clone(), base, amount);
        let mut wallets = self.ledger.commit(vec![wallet], &transaction).await?;
        self.metrics.deposit_recorded();

        let wallet = wallets
            .pop()
            .ok_or_else(|| ExchangeError::Internal("deposit committed no wallet".to_string()))?;
        info!(transaction_id = %transaction.id, balance = %wallet.balance, "Deposit recorded");
        Ok(wallet)
    }

    /// Open the user's base-currency wallet. Idempotent.
    pub async fn register_user(&self, user_id: &UserId) -> Result<Wallet> {
        validate_user(user_id)?;
        self.ledger.get_or_create(user_id, self.base_currency()).await
    }

    /// All wallets of a user, ordered by currency code.
    pub async fn get_wallets(&self, user_id: &UserId) -> Result<Vec<Wallet>> {
        self.ledger.wallets(user_id).await
    }

    pub async fn get_current_rate(&self, currency: &Currency) -> Result<RateQuote> {
        Ok(self.resolver.get_current_rate(currency).await?)
    }

    pub async fn get_current_rates(&self) -> Result<Vec<RateQuote>> {
        Ok(self.resolver.get_current_rates().await?)
    }

    pub async fn get_rate_on_date(&self, currency: &Currency, date: NaiveDate) -> Result<RateQuote> {
        Ok(self.resolver.get_rate_on_date(currency, date).await?)
    }

    pub async fn get_rates_on_date(&self, date: NaiveDate) -> Result<Vec<RateQuote>> {
        Ok(self.resolver.get_rates_on_date(date).await?)
    }

    /// Persisted rates for a currency over an inclusive date range.
    pub async fn rate_history(
        &self,
        currency: &Currency,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ExchangeRate>> {
        Ok(self.resolver.get_rate_history(currency, from, to).await?)
    }

    /// Force a rate sync.
    pub async fn sync_rates(&self) -> Result<SyncReport> {
        let result = self.resolver.sync().await;
        self.metrics.rate_sync(result.is_ok());
        Ok(result?)
    }

    /// A user's transactions, newest first.
    pub async fn transaction_history(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        self.journal.list_by_user(user_id, page).await
    }

    /// Counts and volumes over a user's transactions.
    pub async fn summary(&self, user_id: &UserId) -> Result<TransactionSummary> {
        self.journal.summarize(user_id).await
    }
}

fn validate_user(user_id: &UserId) -> Result<()> {
    if !user_id.is_valid() {
        return Err(ExchangeError::Validation {
            message: format!("Invalid user id {:?}", user_id.as_str()),
            field: Some("user_id".to_string()),
        });
    }
    Ok(())
}

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(ExchangeError::InvalidAmount(amount.to_string()));
    }
    if !within_amount_range(amount) {
        return Err(ExchangeError::InvalidAmount(format!(
            "{} exceeds the maximum of {}",
            amount,
            max_amount()
        )));
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(ExchangeError::Validation {
            message: format!("Amount {} has more than {} decimal places", amount, AMOUNT_SCALE),
            field: Some("amount".to_string()),
        });
    }
    Ok(())
}

fn split_locks(locks: Vec<WalletLock>, source: &WalletKey) -> Result<(WalletLock, WalletLock)> {
    let mut source_lock = None;
    let mut target_lock = None;
    for lock in locks {
        if lock.key() == source {
            source_lock = Some(lock);
        } else {
            target_lock = Some(lock);
        }
    }
    match (source_lock, target_lock) {
        (Some(s), Some(t)) => Ok((s, t)),
        _ => Err(ExchangeError::Internal(
            "expected source and target wallet locks".to_string(),
        )),
    }
}
