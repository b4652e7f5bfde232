//! Ledger records: listings, transactions, seller accounts

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Sale status of a listing.
///
/// `Available -> Reserved` when a purchase intent opens, `Reserved -> Sold`
/// on settlement, `Reserved -> Available` on cancellation/expiry. `Sold` is
/// final; a listing is never re-listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum ListingStatus {
    Available = 0,
    Reserved = 1,
    Sold = 2,
}

impl ListingStatus {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ListingStatus::Available),
            1 => Some(ListingStatus::Reserved),
            2 => Some(ListingStatus::Sold),
            _ => None,
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingStatus::Available => write!(f, "available"),
            ListingStatus::Reserved => write!(f, "reserved"),
            ListingStatus::Sold => write!(f, "sold"),
        }
    }
}

/// A sellable idea.
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub listing_id: i64,
    pub seller_id: i64,
    /// Positive, fixed currency, at most 2 fraction digits.
    /// Immutable once the listing leaves `Available`.
    pub price: Decimal,
    pub status: ListingStatus,
    /// Set exactly when `status == Sold`, never cleared afterwards.
    pub buyer_id: Option<i64>,
    pub sold_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Structural invariant: buyer present iff sold.
    pub fn is_consistent(&self) -> bool {
        (self.status == ListingStatus::Sold) == self.buyer_id.is_some()
    }
}

/// Status of one purchase attempt. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum TransactionStatus {
    Pending = 0,
    Completed = 1,
    Failed = 2,
}

impl TransactionStatus {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransactionStatus::Pending),
            1 => Some(TransactionStatus::Completed),
            2 => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Immutable record of one purchase attempt and its outcome.
///
/// `external_ref` is the gateway's checkout/payment identifier and is unique
/// across all transactions; it is the idempotency key for settlement.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    /// ULID, generated locally with no coordination.
    pub transaction_id: String,
    pub listing_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub gross: Decimal,
    pub fee: Decimal,
    pub payout: Decimal,
    pub status: TransactionStatus,
    pub external_ref: String,
    /// Where the buyer completes payment; returned again on duplicate
    /// initiate calls by the same buyer.
    pub checkout_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        listing_id: i64,
        buyer_id: i64,
        seller_id: i64,
        gross: Decimal,
        fee: Decimal,
        payout: Decimal,
        external_ref: String,
        checkout_url: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: Ulid::new().to_string(),
            listing_id,
            buyer_id,
            seller_id,
            gross,
            fee,
            payout,
            status: TransactionStatus::Pending,
            external_ref,
            checkout_url,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bookkeeping invariant: the split always sums to gross.
    pub fn is_balanced(&self) -> bool {
        self.fee + self.payout == self.gross
    }
}

/// Seller (or buyer) payout identity and internally credited balance.
///
/// Capability flags mirror the gateway's view and are advisory only: they
/// gate new checkout sessions, never settlement of money already captured.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub user_id: i64,
    /// The gateway's connected-account reference for payouts.
    pub payout_ref: Option<String>,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    /// Sum of payouts credited by settlement.
    pub balance: Decimal,
}

impl Account {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            payout_ref: None,
            charges_enabled: false,
            payouts_enabled: false,
            details_submitted: false,
            balance: Decimal::ZERO,
        }
    }

    pub fn with_payout_ref(user_id: i64, payout_ref: impl Into<String>) -> Self {
        Self {
            payout_ref: Some(payout_ref.into()),
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
            ..Self::new(user_id)
        }
    }
}
