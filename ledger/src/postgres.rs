//! PostgreSQL ledger store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use kantor_common::{
    Currency, ExchangeError, Page, PageRequest, Result, Transaction, TransactionId,
    TransactionStatus, TransactionType, UserId, WalletKey,
};

use crate::balance::BalanceChange;
use crate::store::LedgerStore;
use crate::wallet::Wallet;

const WALLET_COLUMNS: &str = "user_id, currency, balance, created_at, updated_at";
const TRANSACTION_COLUMNS: &str = "id, user_id, type AS transaction_type, from_currency, \
    to_currency, from_amount, to_amount, rate, status, description, created_at";

fn db_error(err: sqlx::Error) -> ExchangeError {
    ExchangeError::Storage(err.to_string())
}

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    user_id: String,
    currency: String,
    balance: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Wallet {
            key: WalletKey::new(UserId::new(row.user_id), Currency::new(row.currency)),
            balance: row.balance,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: String,
    transaction_type: String,
    from_currency: Option<String>,
    to_currency: Option<String>,
    from_amount: Decimal,
    to_amount: Decimal,
    rate: Option<Decimal>,
    status: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = ExchangeError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        let transaction_type = TransactionType::parse(&row.transaction_type).ok_or_else(|| {
            ExchangeError::Storage(format!("unknown transaction type {:?}", row.transaction_type))
        })?;
        let status = TransactionStatus::parse(&row.status)
            .ok_or_else(|| ExchangeError::Storage(format!("unknown status {:?}", row.status)))?;

        Ok(Transaction {
            id: TransactionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id),
            transaction_type,
            from_currency: row.from_currency.map(Currency::new),
            to_currency: row.to_currency.map(Currency::new),
            from_amount: row.from_amount,
            to_amount: row.to_amount,
            rate: row.rate,
            status,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

/// Ledger store over the `wallets` and `transactions` tables.
///
/// A commit is one database transaction. Each balance update is guarded so a
/// writer outside this process still cannot drive a balance negative.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_transaction<'e, E>(executor: E, transaction: &Transaction) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            "INSERT INTO transactions (id, user_id, type, from_currency, to_currency, \
             from_amount, to_amount, rate, status, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(*transaction.id.as_uuid())
        .bind(transaction.user_id.as_str())
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.from_currency.as_ref().map(|c| c.code().to_string()))
        .bind(transaction.to_currency.as_ref().map(|c| c.code().to_string()))
        .bind(transaction.from_amount)
        .bind(transaction.to_amount)
        .bind(transaction.rate)
        .bind(transaction.status.as_str())
        .bind(transaction.description.as_deref())
        .bind(transaction.created_at)
        .execute(executor)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn find_wallet(&self, key: &WalletKey) -> Result<Option<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 AND currency = $2");
        let row = sqlx::query_as::<_, WalletRow>(&sql)
            .bind(key.user_id.as_str())
            .bind(key.currency.code())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(Wallet::from))
    }

    async fn wallets_for_user(&self, user_id: &UserId) -> Result<Vec<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 ORDER BY currency");
        let rows = sqlx::query_as::<_, WalletRow>(&sql)
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(Wallet::from).collect())
    }

    async fn insert_wallet_if_absent(&self, wallet: Wallet) -> Result<Wallet> {
        let sql = format!(
            "INSERT INTO wallets ({WALLET_COLUMNS}) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, currency) DO NOTHING RETURNING {WALLET_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, WalletRow>(&sql)
            .bind(wallet.key.user_id.as_str())
            .bind(wallet.key.currency.code())
            .bind(wallet.balance)
            .bind(wallet.created_at)
            .bind(wallet.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        debug!(wallet = %wallet.key, "Wallet already exists, reading it back");
        self.find_wallet(&wallet.key)
            .await?
            .ok_or_else(|| ExchangeError::Storage(format!("wallet {} vanished", wallet.key)))
    }

    async fn commit(&self, changes: &[BalanceChange], transaction: &Transaction) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        for change in changes {
            if change.created {
                sqlx::query(
                    "INSERT INTO wallets (user_id, currency, balance, created_at, updated_at) \
                     VALUES ($1, $2, 0, now(), now()) ON CONFLICT (user_id, currency) DO NOTHING",
                )
                .bind(change.key.user_id.as_str())
                .bind(change.key.currency.code())
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            }

            let result = sqlx::query(
                "UPDATE wallets SET balance = balance + $3, updated_at = now() \
                 WHERE user_id = $1 AND currency = $2 AND balance + $3 >= 0",
            )
            .bind(change.key.user_id.as_str())
            .bind(change.key.currency.code())
            .bind(change.delta())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            if result.rows_affected() != 1 {
                warn!(wallet = %change.key, delta = %change.delta(), "Guarded balance update refused");
                // Dropping `tx` rolls back every update made so far.
                return Err(ExchangeError::InsufficientFunds {
                    wallet: change.key.clone(),
                    required: (-change.delta()).to_string(),
                    available: change.before.to_string(),
                });
            }
        }

        Self::insert_transaction(&mut *tx, transaction).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn append_transaction(&self, transaction: &Transaction) -> Result<()> {
        Self::insert_transaction(&self.pool, transaction).await
    }

    async fn transactions_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE user_id = $1")
            .bind(user_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(user_id.as_str())
            .bind(i64::from(page.size))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        let items = rows
            .into_iter()
            .map(Transaction::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(items, page, total.max(0) as u64))
    }

    async fn all_transactions_for_user(&self, user_id: &UserId) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(Transaction::try_from)
            .collect()
    }
}
