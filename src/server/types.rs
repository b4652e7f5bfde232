use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::Transaction;

/// Unified API response envelope.
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    pub code: i32,
    /// Response message
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create success response
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Create error response
    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const NOT_ELIGIBLE: i32 = 1002;
    pub const INVALID_SIGNATURE: i32 = 1003;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const AUTH_FAILED: i32 = 2002;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4001;
    pub const ALREADY_SOLD: i32 = 4091;
    pub const SELLER_NOT_ONBOARDED: i32 = 4221;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const GATEWAY_UNAVAILABLE: i32 = 5031;
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseRequest {
    pub listing_id: i64,
}

/// Purchase state as exposed over the API.
#[derive(Debug, Serialize)]
pub struct PurchaseData {
    pub transaction_id: String,
    pub listing_id: i64,
    pub status: String,
    /// Where the buyer completes payment. Only meaningful while pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    pub gross: Decimal,
    pub fee: Decimal,
    pub payout: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseData {
    pub fn from_transaction(tx: Transaction) -> Self {
        let status = tx.status.to_string();
        let checkout_url = if tx.status.is_terminal() {
            None
        } else {
            Some(tx.checkout_url)
        };
        Self {
            transaction_id: tx.transaction_id,
            listing_id: tx.listing_id,
            status,
            checkout_url,
            gross: tx.gross,
            fee: tx.fee,
            payout: tx.payout,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

/// Seller onboarding/payout state.
#[derive(Debug, Serialize)]
pub struct PaymentStatusData {
    pub onboarded: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: String,
}

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: String,
    pub version: String,
}
