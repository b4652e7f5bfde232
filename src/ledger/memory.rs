//! In-memory ledger
//!
//! One mutex guards the whole store, so every multi-record operation is
//! trivially atomic with the same observable semantics as the SQL
//! implementation. Used for scenario tests and database-less dev runs.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::models::{Account, Listing, ListingStatus, Transaction, TransactionStatus};
use super::{LedgerError, LedgerStore};

#[derive(Default)]
struct Inner {
    listings: HashMap<i64, Listing>,
    /// Keyed by external_ref; the map key is the uniqueness constraint.
    transactions: HashMap<String, Transaction>,
    accounts: HashMap<i64, Account>,
}

#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<MutexGuard<'_, Inner>, LedgerError> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Corrupt("ledger mutex poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_listing(&self, listing_id: i64) -> Result<Option<Listing>, LedgerError> {
        Ok(self.guard()?.listings.get(&listing_id).cloned())
    }

    async fn insert_listing(&self, listing: &Listing) -> Result<(), LedgerError> {
        self.guard()?
            .listings
            .insert(listing.listing_id, listing.clone());
        Ok(())
    }

    async fn reserve_listing(&self, listing_id: i64) -> Result<bool, LedgerError> {
        let mut inner = self.guard()?;
        match inner.listings.get_mut(&listing_id) {
            Some(l) if l.status == ListingStatus::Available => {
                l.status = ListingStatus::Reserved;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_listing(&self, listing_id: i64) -> Result<bool, LedgerError> {
        let mut inner = self.guard()?;
        match inner.listings.get_mut(&listing_id) {
            Some(l) if l.status == ListingStatus::Reserved => {
                l.status = ListingStatus::Available;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let mut inner = self.guard()?;
        if inner.transactions.contains_key(&tx.external_ref) {
            return Err(LedgerError::DuplicateExternalRef(tx.external_ref.clone()));
        }
        inner.transactions.insert(tx.external_ref.clone(), tx.clone());
        Ok(())
    }

    async fn transaction_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.guard()?.transactions.get(external_ref).cloned())
    }

    async fn transaction_by_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .guard()?
            .transactions
            .values()
            .find(|t| t.transaction_id == transaction_id)
            .cloned())
    }

    async fn pending_transaction_for(
        &self,
        listing_id: i64,
        buyer_id: i64,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .guard()?
            .transactions
            .values()
            .find(|t| {
                t.listing_id == listing_id
                    && t.buyer_id == buyer_id
                    && t.status == TransactionStatus::Pending
            })
            .cloned())
    }

    async fn apply_settlement(
        &self,
        external_ref: &str,
        sold_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let mut inner = self.guard()?;

        let (listing_id, buyer_id, seller_id, payout) =
            match inner.transactions.get(external_ref) {
                Some(t) if t.status == TransactionStatus::Pending => {
                    (t.listing_id, t.buyer_id, t.seller_id, t.payout)
                }
                _ => return Ok(false),
            };

        // All three writes happen under the same guard; a failure before the
        // last one leaves nothing applied.
        match inner.listings.get(&listing_id) {
            Some(l) if l.status == ListingStatus::Reserved => {}
            Some(l) => {
                return Err(LedgerError::Corrupt(format!(
                    "settlement of {} found listing {} in state {}",
                    external_ref, listing_id, l.status
                )));
            }
            None => {
                return Err(LedgerError::Corrupt(format!(
                    "settlement of {} references missing listing {}",
                    external_ref, listing_id
                )));
            }
        }

        if let Some(t) = inner.transactions.get_mut(external_ref) {
            t.status = TransactionStatus::Completed;
            t.updated_at = sold_at;
        }
        if let Some(l) = inner.listings.get_mut(&listing_id) {
            l.status = ListingStatus::Sold;
            l.buyer_id = Some(buyer_id);
            l.sold_at = Some(sold_at);
        }
        inner
            .accounts
            .entry(seller_id)
            .or_insert_with(|| Account::new(seller_id))
            .balance += payout;

        Ok(true)
    }

    async fn apply_cancellation(&self, external_ref: &str) -> Result<bool, LedgerError> {
        let mut inner = self.guard()?;

        let listing_id = match inner.transactions.get(external_ref) {
            Some(t) if t.status == TransactionStatus::Pending => t.listing_id,
            _ => return Ok(false),
        };

        if let Some(t) = inner.transactions.get_mut(external_ref) {
            t.status = TransactionStatus::Failed;
            t.updated_at = Utc::now();
        }
        if let Some(l) = inner.listings.get_mut(&listing_id) {
            if l.status == ListingStatus::Reserved {
                l.status = ListingStatus::Available;
            }
        }

        Ok(true)
    }

    async fn pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut pending: Vec<Transaction> = self
            .guard()?
            .transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Pending && t.updated_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(pending)
    }

    async fn get_account(&self, user_id: i64) -> Result<Option<Account>, LedgerError> {
        Ok(self.guard()?.accounts.get(&user_id).cloned())
    }

    async fn upsert_account(&self, account: &Account) -> Result<(), LedgerError> {
        self.guard()?.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), LedgerError> {
        self.guard().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn listing(id: i64, seller: i64, price: &str) -> Listing {
        Listing {
            listing_id: id,
            seller_id: seller,
            price: Decimal::from_str(price).unwrap(),
            status: ListingStatus::Available,
            buyer_id: None,
            sold_at: None,
            created_at: Utc::now(),
        }
    }

    fn pending_tx(listing_id: i64, buyer: i64, seller: i64, external_ref: &str) -> Transaction {
        Transaction::pending(
            listing_id,
            buyer,
            seller,
            Decimal::from_str("19.99").unwrap(),
            Decimal::from_str("2.00").unwrap(),
            Decimal::from_str("17.99").unwrap(),
            external_ref.to_string(),
            format!("https://pay.example/{}", external_ref),
        )
    }

    #[tokio::test]
    async fn test_reserve_is_exclusive() {
        let store = MemoryLedger::new();
        store.insert_listing(&listing(1, 10, "19.99")).await.unwrap();

        assert!(store.reserve_listing(1).await.unwrap());
        assert!(!store.reserve_listing(1).await.unwrap()); // second CAS loses
        assert!(store.release_listing(1).await.unwrap());
        assert!(store.reserve_listing(1).await.unwrap()); // free again
    }

    #[tokio::test]
    async fn test_duplicate_external_ref_rejected() {
        let store = MemoryLedger::new();
        store.insert_transaction(&pending_tx(1, 20, 10, "cs_1")).await.unwrap();
        let err = store
            .insert_transaction(&pending_tx(2, 21, 11, "cs_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateExternalRef(_)));
    }

    #[tokio::test]
    async fn test_settlement_applies_all_three_writes_once() {
        let store = MemoryLedger::new();
        store.insert_listing(&listing(1, 10, "19.99")).await.unwrap();
        store.reserve_listing(1).await.unwrap();
        store.insert_transaction(&pending_tx(1, 20, 10, "cs_1")).await.unwrap();

        let now = Utc::now();
        assert!(store.apply_settlement("cs_1", now).await.unwrap());
        // Replay is a clean no-op.
        assert!(!store.apply_settlement("cs_1", now).await.unwrap());

        let l = store.get_listing(1).await.unwrap().unwrap();
        assert_eq!(l.status, ListingStatus::Sold);
        assert_eq!(l.buyer_id, Some(20));
        assert!(l.is_consistent());

        let balance = store.account_balance(10).await.unwrap();
        assert_eq!(balance, Decimal::from_str("17.99").unwrap());
    }

    #[tokio::test]
    async fn test_cancellation_releases_listing() {
        let store = MemoryLedger::new();
        store.insert_listing(&listing(1, 10, "19.99")).await.unwrap();
        store.reserve_listing(1).await.unwrap();
        store.insert_transaction(&pending_tx(1, 20, 10, "cs_1")).await.unwrap();

        assert!(store.apply_cancellation("cs_1").await.unwrap());
        assert!(!store.apply_cancellation("cs_1").await.unwrap());

        let l = store.get_listing(1).await.unwrap().unwrap();
        assert_eq!(l.status, ListingStatus::Available);

        // Settlement of a failed transaction never resurrects it.
        assert!(!store.apply_settlement("cs_1", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_pending_older_than_orders_oldest_first() {
        let store = MemoryLedger::new();
        let mut old = pending_tx(1, 20, 10, "cs_old");
        old.updated_at = Utc::now() - chrono::Duration::hours(2);
        let mut older = pending_tx(2, 20, 10, "cs_older");
        older.updated_at = Utc::now() - chrono::Duration::hours(3);
        store.insert_transaction(&old).await.unwrap();
        store.insert_transaction(&older).await.unwrap();
        store.insert_transaction(&pending_tx(3, 20, 10, "cs_new")).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let stale = store.pending_older_than(cutoff).await.unwrap();
        assert_eq!(stale.len(), 2);
        assert_eq!(stale[0].external_ref, "cs_older");
        assert_eq!(stale[1].external_ref, "cs_old");
    }
}
