use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Network failure or processor 5xx. Transient; the caller may retry.
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The seller has no usable payout destination at the processor.
    #[error("Seller has no enabled payout destination")]
    SellerNotOnboarded,

    /// The processor rejected the amount.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Webhook payload failed authentication. Fail closed, never retry.
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),
}

/// Internal purchase intent, translated by an adapter into the processor's
/// checkout primitives. Metadata travels to the processor and comes back on
/// the webhook for reconciliation.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub listing_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub gross: Decimal,
    /// Platform cut, already computed by the fee policy.
    pub fee: Decimal,
    /// The seller's connected-account reference; `None` means the seller
    /// never completed onboarding.
    pub payout_ref: Option<String>,
}

/// A created checkout session: the unique external reference (settlement
/// idempotency key) and where to send the buyer.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub external_ref: String,
    pub checkout_url: String,
}

/// Processor-side view of a checkout session, used only by the
/// reconciliation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Created, buyer has not paid yet.
    Open,
    /// Money captured.
    Paid,
    /// Session expired or was abandoned.
    Expired,
}

/// Cached capability flags for a connected account. Advisory only: shown to
/// the seller UI and checked before opening new sessions, never consulted by
/// settlement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountStatus {
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

impl AccountStatus {
    pub fn is_onboarded(&self) -> bool {
        self.charges_enabled && self.payouts_enabled
    }
}

/// Adapter seam to the external payment processor.
///
/// Implementations make network calls only; they never write to the ledger.
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a checkout session carrying the fee split and reconciliation
    /// metadata.
    async fn create_checkout_session(
        &self,
        req: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError>;

    /// The processor's own record of a session. Reconciliation sweep only.
    async fn lookup_session(&self, external_ref: &str) -> Result<SessionStatus, GatewayError>;

    /// Read-through capability flags for a connected account. May be served
    /// from a short-TTL cache; staleness is acceptable (UI-facing only).
    async fn account_status(&self, payout_ref: &str) -> Result<AccountStatus, GatewayError>;
}
