use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;
use tracing::{error, warn};

use crate::auth::Claims;
use crate::payment::AccountStatus;
use crate::purchase::PurchaseError;
use crate::webhook::{WebhookError, WebhookOutcome, log_outcome};

use super::state::AppState;
use super::types::{
    ApiResponse, CreatePurchaseRequest, HealthData, PaymentStatusData, PurchaseData, WebhookAck,
    error_codes,
};

type ApiError = (StatusCode, Json<ApiResponse<()>>);

fn api_error(status: StatusCode, code: i32, msg: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::<()>::error(code, msg)))
}

fn purchase_error(e: PurchaseError) -> ApiError {
    match e {
        PurchaseError::NotFound => {
            api_error(StatusCode::NOT_FOUND, error_codes::NOT_FOUND, e.to_string())
        }
        PurchaseError::AlreadySold => {
            api_error(StatusCode::CONFLICT, error_codes::ALREADY_SOLD, e.to_string())
        }
        PurchaseError::NotEligible => {
            api_error(StatusCode::FORBIDDEN, error_codes::NOT_ELIGIBLE, e.to_string())
        }
        PurchaseError::GatewayUnavailable(_) => api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::GATEWAY_UNAVAILABLE,
            e.to_string(),
        ),
        PurchaseError::SellerNotOnboarded => api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            error_codes::SELLER_NOT_ONBOARDED,
            e.to_string(),
        ),
        PurchaseError::InvalidAmount(_) => api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            e.to_string(),
        ),
        PurchaseError::Ledger(err) => {
            error!(error = %err, "Ledger failure while serving request");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "Internal error",
            )
        }
    }
}

fn claims_user_id(claims: &Claims) -> Result<i64, ApiError> {
    claims.user_id().ok_or_else(|| {
        api_error(
            StatusCode::UNAUTHORIZED,
            error_codes::AUTH_FAILED,
            "Invalid subject in token",
        )
    })
}

/// POST /api/v1/purchases
///
/// Opens a purchase for the authenticated buyer. Returns 202: the sale is
/// not final until the payment confirmation arrives on the webhook.
pub async fn create_purchase(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePurchaseRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PurchaseData>>), ApiError> {
    let buyer_id = claims_user_id(&claims)?;

    let tx = state
        .orchestrator
        .initiate(req.listing_id, buyer_id, claims.role)
        .await
        .map_err(purchase_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(PurchaseData::from_transaction(tx))),
    ))
}

/// GET /api/v1/purchases/{transaction_id}
///
/// Visible only to the buyer and the seller on the transaction; anyone
/// else sees 404 rather than a confirmation the id exists.
pub async fn get_purchase(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(transaction_id): Path<String>,
) -> Result<Json<ApiResponse<PurchaseData>>, ApiError> {
    let user_id = claims_user_id(&claims)?;

    let tx = state
        .ledger
        .transaction_by_id(&transaction_id)
        .await
        .map_err(|e| purchase_error(e.into()))?
        .filter(|tx| tx.buyer_id == user_id || tx.seller_id == user_id)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                error_codes::NOT_FOUND,
                "Transaction not found",
            )
        })?;

    Ok(Json(ApiResponse::success(PurchaseData::from_transaction(tx))))
}

/// GET /api/v1/sellers/me/payment-status
///
/// Onboarding state straight from the processor (cached), plus the credited
/// balance from the ledger.
pub async fn seller_payment_status(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<PaymentStatusData>>, ApiError> {
    let user_id = claims_user_id(&claims)?;

    let account = state
        .ledger
        .get_account(user_id)
        .await
        .map_err(|e| purchase_error(e.into()))?;

    let (payout_ref, balance) = match account {
        Some(a) => (a.payout_ref, a.balance),
        None => (None, rust_decimal::Decimal::ZERO),
    };

    let status = match payout_ref {
        Some(ref payout_ref) => state
            .gateway
            .account_status(payout_ref)
            .await
            .map_err(|e| purchase_error(e.into()))?,
        None => AccountStatus {
            charges_enabled: false,
            payouts_enabled: false,
            details_submitted: false,
        },
    };

    Ok(Json(ApiResponse::success(PaymentStatusData {
        onboarded: status.is_onboarded(),
        charges_enabled: status.charges_enabled,
        payouts_enabled: status.payouts_enabled,
        details_submitted: status.details_submitted,
        balance,
    })))
}

/// POST /api/v1/payments/webhook
///
/// Raw body in, verified before parsing. 200 acknowledges the delivery;
/// 400 rejects it for good; 5xx asks the processor to redeliver.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookAck>>, ApiError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                error_codes::INVALID_SIGNATURE,
                "Missing signature header",
            )
        })?;

    let outcome = state
        .reconciler
        .process(&state.orchestrator, &body, signature)
        .await
        .map_err(|e| match e {
            WebhookError::InvalidSignature(msg) => {
                warn!(error = %msg, "Rejected webhook with bad signature");
                api_error(
                    StatusCode::BAD_REQUEST,
                    error_codes::INVALID_SIGNATURE,
                    "Invalid signature",
                )
            }
            WebhookError::MalformedPayload(msg) => api_error(
                StatusCode::BAD_REQUEST,
                error_codes::INVALID_PARAMETER,
                msg,
            ),
            WebhookError::Processing(err) => {
                error!(error = %err, "Webhook processing failed; expecting redelivery");
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_codes::INTERNAL_ERROR,
                    "Event processing failed",
                )
            }
        })?;

    log_outcome(outcome, "payments.webhook");
    Ok(Json(ApiResponse::success(WebhookAck {
        received: true,
        outcome: outcome_label(outcome).to_string(),
    })))
}

fn outcome_label(outcome: WebhookOutcome) -> &'static str {
    match outcome {
        WebhookOutcome::Settled => "settled",
        WebhookOutcome::Cancelled => "cancelled",
        WebhookOutcome::AlreadyProcessed => "already_processed",
        WebhookOutcome::UnknownTransaction => "unknown_transaction",
        WebhookOutcome::Ignored => "ignored",
    }
}

/// GET /api/v1/health
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<HealthData>>, ApiError> {
    state.ledger.health_check().await.map_err(|e| {
        error!(error = %e, "Health check failed");
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::GATEWAY_UNAVAILABLE,
            "Ledger unavailable",
        )
    })?;

    Ok(Json(ApiResponse::success(HealthData {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })))
}
