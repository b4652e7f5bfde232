//! Ledger Store
//!
//! Durable, transactional storage for Listing, Transaction and Account
//! records. All listing/transaction state changes go through explicit
//! compare-and-set operations so concurrent purchase attempts serialize at
//! the storage layer, never in application code.

pub mod memory;
pub mod models;
pub mod postgres;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

pub use memory::MemoryLedger;
pub use models::{Account, Listing, ListingStatus, Transaction, TransactionStatus};
pub use postgres::PgLedger;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The unique constraint on `external_ref` rejected an insert.
    #[error("Duplicate external reference: {0}")]
    DuplicateExternalRef(String),

    #[error("Ledger corruption: {0}")]
    Corrupt(String),
}

/// Storage seam for the purchase orchestrator.
///
/// CAS methods return `true` when this caller performed the transition and
/// `false` when the guard did not match (another caller won, or the record
/// was already past that state). They never error for a lost race.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_listing(&self, listing_id: i64) -> Result<Option<Listing>, LedgerError>;

    async fn insert_listing(&self, listing: &Listing) -> Result<(), LedgerError>;

    /// CAS `Available -> Reserved`. The single serialization point that
    /// prevents double-sale.
    async fn reserve_listing(&self, listing_id: i64) -> Result<bool, LedgerError>;

    /// CAS `Reserved -> Available` (cancellation / gateway failure rollback).
    async fn release_listing(&self, listing_id: i64) -> Result<bool, LedgerError>;

    /// Persist a pending transaction. Fails with
    /// [`LedgerError::DuplicateExternalRef`] when the external reference is
    /// already recorded.
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError>;

    async fn transaction_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Transaction>, LedgerError>;

    async fn transaction_by_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// The unexpired pending attempt for (listing, buyer), if any. Used to
    /// return the existing checkout session on a double-click retry.
    async fn pending_transaction_for(
        &self,
        listing_id: i64,
        buyer_id: i64,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// Terminal settlement, applied as one atomic unit:
    /// transaction `Pending -> Completed`, listing `Reserved -> Sold` with
    /// buyer and sold-at stamped, seller credited the recorded payout.
    ///
    /// Returns `false` (no partial effect) when the transaction is no longer
    /// pending.
    async fn apply_settlement(
        &self,
        external_ref: &str,
        sold_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError>;

    /// Terminal cancellation, applied as one atomic unit: transaction
    /// `Pending -> Failed`, listing `Reserved -> Available`.
    ///
    /// Returns `false` (no partial effect) when the transaction is no longer
    /// pending.
    async fn apply_cancellation(&self, external_ref: &str) -> Result<bool, LedgerError>;

    /// Pending transactions last touched before `cutoff`, oldest first.
    /// Feeds the expiry and reconciliation sweeps.
    async fn pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, LedgerError>;

    async fn get_account(&self, user_id: i64) -> Result<Option<Account>, LedgerError>;

    async fn upsert_account(&self, account: &Account) -> Result<(), LedgerError>;

    /// Credited balance for a user (zero when no account row exists).
    async fn account_balance(&self, user_id: i64) -> Result<Decimal, LedgerError> {
        Ok(self
            .get_account(user_id)
            .await?
            .map(|a| a.balance)
            .unwrap_or(Decimal::ZERO))
    }

    /// Liveness probe for the health endpoint.
    async fn health_check(&self) -> Result<(), LedgerError>;
}
