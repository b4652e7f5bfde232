use thiserror::Error;

use crate::ledger::LedgerError;
use crate::payment::GatewayError;

#[derive(Error, Debug)]
pub enum PurchaseError {
    #[error("Listing not found")]
    NotFound,

    /// Listing-state conflict: the reservation CAS lost or the listing is
    /// already sold. Final; never retried automatically.
    #[error("Listing is no longer available")]
    AlreadySold,

    /// Authorization/role failure: not a buyer, or buying one's own listing.
    #[error("Buyer is not eligible for this purchase")]
    NotEligible,

    /// Transient gateway failure. The provisional reservation has already
    /// been rolled back; the caller may retry.
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Seller has not completed payout onboarding")]
    SellerNotOnboarded,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<GatewayError> for PurchaseError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unavailable(msg) => PurchaseError::GatewayUnavailable(msg),
            GatewayError::SellerNotOnboarded => PurchaseError::SellerNotOnboarded,
            GatewayError::InvalidAmount(msg) => PurchaseError::InvalidAmount(msg),
            // Signature failures are handled at the webhook boundary and
            // never reach the orchestrator.
            GatewayError::InvalidSignature(msg) => PurchaseError::GatewayUnavailable(msg),
        }
    }
}
