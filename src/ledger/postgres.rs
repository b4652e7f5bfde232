//! PostgreSQL ledger
//!
//! Guarded `UPDATE ... WHERE status = expected` statements implement the
//! compare-and-set operations; the three-way settlement write runs inside a
//! single SQL transaction. `external_ref` carries a UNIQUE constraint that
//! backs the settlement idempotency key.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

use super::models::{Account, Listing, ListingStatus, Transaction, TransactionStatus};
use super::{LedgerError, LedgerStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS listings_tb (
        listing_id  BIGINT PRIMARY KEY,
        seller_id   BIGINT NOT NULL,
        price       NUMERIC(12,2) NOT NULL,
        status      SMALLINT NOT NULL DEFAULT 0,
        buyer_id    BIGINT,
        sold_at     TIMESTAMPTZ,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions_tb (
        transaction_id TEXT PRIMARY KEY,
        listing_id     BIGINT NOT NULL REFERENCES listings_tb(listing_id),
        buyer_id       BIGINT NOT NULL,
        seller_id      BIGINT NOT NULL,
        gross          NUMERIC(12,2) NOT NULL,
        fee            NUMERIC(12,2) NOT NULL,
        payout         NUMERIC(12,2) NOT NULL,
        status         SMALLINT NOT NULL DEFAULT 0,
        external_ref   TEXT NOT NULL UNIQUE,
        checkout_url   TEXT NOT NULL,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_pending
        ON transactions_tb (listing_id, buyer_id) WHERE status = 0
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts_tb (
        user_id           BIGINT PRIMARY KEY,
        payout_ref        TEXT,
        charges_enabled   BOOLEAN NOT NULL DEFAULT FALSE,
        payouts_enabled   BOOLEAN NOT NULL DEFAULT FALSE,
        details_submitted BOOLEAN NOT NULL DEFAULT FALSE,
        balance           NUMERIC(14,2) NOT NULL DEFAULT 0
    )
    "#,
];

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Create a new ledger connection pool.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL ledger connection pool established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create ledger tables when missing. Idempotent.
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        tracing::info!("Ledger schema ready");
        Ok(())
    }

    fn row_to_listing(row: &PgRow) -> Result<Listing, LedgerError> {
        let status_id: i16 = row.get("status");
        let status = ListingStatus::from_id(status_id)
            .ok_or_else(|| LedgerError::Corrupt(format!("invalid listing status: {}", status_id)))?;

        Ok(Listing {
            listing_id: row.get("listing_id"),
            seller_id: row.get("seller_id"),
            price: row.get("price"),
            status,
            buyer_id: row.get("buyer_id"),
            sold_at: row.get("sold_at"),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_transaction(row: &PgRow) -> Result<Transaction, LedgerError> {
        let status_id: i16 = row.get("status");
        let status = TransactionStatus::from_id(status_id).ok_or_else(|| {
            LedgerError::Corrupt(format!("invalid transaction status: {}", status_id))
        })?;

        Ok(Transaction {
            transaction_id: row.get("transaction_id"),
            listing_id: row.get("listing_id"),
            buyer_id: row.get("buyer_id"),
            seller_id: row.get("seller_id"),
            gross: row.get("gross"),
            fee: row.get("fee"),
            payout: row.get("payout"),
            status,
            external_ref: row.get("external_ref"),
            checkout_url: row.get("checkout_url"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

const TX_COLUMNS: &str = "transaction_id, listing_id, buyer_id, seller_id, gross, fee, payout, \
                          status, external_ref, checkout_url, created_at, updated_at";

#[async_trait::async_trait]
impl LedgerStore for PgLedger {
    async fn get_listing(&self, listing_id: i64) -> Result<Option<Listing>, LedgerError> {
        let row = sqlx::query(
            r#"SELECT listing_id, seller_id, price, status, buyer_id, sold_at, created_at
               FROM listings_tb WHERE listing_id = $1"#,
        )
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_listing(&r)).transpose()
    }

    async fn insert_listing(&self, listing: &Listing) -> Result<(), LedgerError> {
        sqlx::query(
            r#"INSERT INTO listings_tb (listing_id, seller_id, price, status, buyer_id, sold_at, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(listing.listing_id)
        .bind(listing.seller_id)
        .bind(listing.price)
        .bind(listing.status.id())
        .bind(listing.buyer_id)
        .bind(listing.sold_at)
        .bind(listing.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reserve_listing(&self, listing_id: i64) -> Result<bool, LedgerError> {
        // One atomic conditional write; losing racers see rows_affected == 0.
        let result = sqlx::query(
            r#"UPDATE listings_tb SET status = $1
               WHERE listing_id = $2 AND status = $3"#,
        )
        .bind(ListingStatus::Reserved.id())
        .bind(listing_id)
        .bind(ListingStatus::Available.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_listing(&self, listing_id: i64) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"UPDATE listings_tb SET status = $1
               WHERE listing_id = $2 AND status = $3"#,
        )
        .bind(ListingStatus::Available.id())
        .bind(listing_id)
        .bind(ListingStatus::Reserved.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"INSERT INTO transactions_tb
                   (transaction_id, listing_id, buyer_id, seller_id, gross, fee, payout,
                    status, external_ref, checkout_url, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(&tx.transaction_id)
        .bind(tx.listing_id)
        .bind(tx.buyer_id)
        .bind(tx.seller_id)
        .bind(tx.gross)
        .bind(tx.fee)
        .bind(tx.payout)
        .bind(tx.status.id())
        .bind(&tx.external_ref)
        .bind(&tx.checkout_url)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(db_err) = e.as_database_error() {
                    if db_err.is_unique_violation() {
                        return Err(LedgerError::DuplicateExternalRef(tx.external_ref.clone()));
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn transaction_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions_tb WHERE external_ref = $1",
            TX_COLUMNS
        ))
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_transaction(&r)).transpose()
    }

    async fn transaction_by_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions_tb WHERE transaction_id = $1",
            TX_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_transaction(&r)).transpose()
    }

    async fn pending_transaction_for(
        &self,
        listing_id: i64,
        buyer_id: i64,
    ) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions_tb \
             WHERE listing_id = $1 AND buyer_id = $2 AND status = $3 \
             ORDER BY created_at DESC LIMIT 1",
            TX_COLUMNS
        ))
        .bind(listing_id)
        .bind(buyer_id)
        .bind(TransactionStatus::Pending.id())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_transaction(&r)).transpose()
    }

    async fn apply_settlement(
        &self,
        external_ref: &str,
        sold_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let mut db_tx = self.pool.begin().await?;

        // CAS the transaction to Completed; the returned row carries
        // everything the remaining writes need.
        let row = sqlx::query(
            r#"UPDATE transactions_tb SET status = $1, updated_at = $2
               WHERE external_ref = $3 AND status = $4
               RETURNING listing_id, buyer_id, seller_id, payout"#,
        )
        .bind(TransactionStatus::Completed.id())
        .bind(sold_at)
        .bind(external_ref)
        .bind(TransactionStatus::Pending.id())
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            // Already terminal (replay) or unknown; nothing to apply.
            return Ok(false);
        };
        let listing_id: i64 = row.get("listing_id");
        let buyer_id: i64 = row.get("buyer_id");
        let seller_id: i64 = row.get("seller_id");
        let payout: rust_decimal::Decimal = row.get("payout");

        let updated = sqlx::query(
            r#"UPDATE listings_tb SET status = $1, buyer_id = $2, sold_at = $3
               WHERE listing_id = $4 AND status = $5"#,
        )
        .bind(ListingStatus::Sold.id())
        .bind(buyer_id)
        .bind(sold_at)
        .bind(listing_id)
        .bind(ListingStatus::Reserved.id())
        .execute(&mut *db_tx)
        .await?;

        if updated.rows_affected() == 0 {
            // A pending transaction implies a reserved listing; anything else
            // is corruption. Rolling back leaves no partial effect.
            db_tx.rollback().await?;
            return Err(LedgerError::Corrupt(format!(
                "settlement of {} found listing {} not reserved",
                external_ref, listing_id
            )));
        }

        sqlx::query(
            r#"INSERT INTO accounts_tb (user_id, balance) VALUES ($1, $2)
               ON CONFLICT (user_id)
               DO UPDATE SET balance = accounts_tb.balance + EXCLUDED.balance"#,
        )
        .bind(seller_id)
        .bind(payout)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(true)
    }

    async fn apply_cancellation(&self, external_ref: &str) -> Result<bool, LedgerError> {
        let mut db_tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"UPDATE transactions_tb SET status = $1, updated_at = NOW()
               WHERE external_ref = $2 AND status = $3
               RETURNING listing_id"#,
        )
        .bind(TransactionStatus::Failed.id())
        .bind(external_ref)
        .bind(TransactionStatus::Pending.id())
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            return Ok(false);
        };
        let listing_id: i64 = row.get("listing_id");

        sqlx::query(
            r#"UPDATE listings_tb SET status = $1
               WHERE listing_id = $2 AND status = $3"#,
        )
        .bind(ListingStatus::Available.id())
        .bind(listing_id)
        .bind(ListingStatus::Reserved.id())
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(true)
    }

    async fn pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions_tb \
             WHERE status = $1 AND updated_at < $2 \
             ORDER BY updated_at ASC LIMIT 100",
            TX_COLUMNS
        ))
        .bind(TransactionStatus::Pending.id())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(Self::row_to_transaction(&row)?);
        }
        Ok(records)
    }

    async fn get_account(&self, user_id: i64) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query(
            r#"SELECT user_id, payout_ref, charges_enabled, payouts_enabled,
                      details_submitted, balance
               FROM accounts_tb WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Account {
            user_id: r.get("user_id"),
            payout_ref: r.get("payout_ref"),
            charges_enabled: r.get("charges_enabled"),
            payouts_enabled: r.get("payouts_enabled"),
            details_submitted: r.get("details_submitted"),
            balance: r.get("balance"),
        }))
    }

    async fn upsert_account(&self, account: &Account) -> Result<(), LedgerError> {
        sqlx::query(
            r#"INSERT INTO accounts_tb
                   (user_id, payout_ref, charges_enabled, payouts_enabled, details_submitted, balance)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (user_id) DO UPDATE SET
                   payout_ref = EXCLUDED.payout_ref,
                   charges_enabled = EXCLUDED.charges_enabled,
                   payouts_enabled = EXCLUDED.payouts_enabled,
                   details_submitted = EXCLUDED.details_submitted"#,
        )
        .bind(account.user_id)
        .bind(&account.payout_ref)
        .bind(account.charges_enabled)
        .bind(account.payouts_enabled)
        .bind(account.details_submitted)
        .bind(account.balance)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
