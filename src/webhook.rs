//! Webhook reconciler
//!
//! Consumes payment-processor event notifications and drives the matching
//! transactions to their terminal state. The processor delivers at least
//! once with no ordering guarantee, so every path here must be idempotent;
//! the orchestrator's settle/cancel transitions already are.
//!
//! Signature verification happens over the raw request body BEFORE any JSON
//! parsing. An unverified byte is never deserialized.

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::payment::{GatewayError, SignatureVerifier};
use crate::purchase::{CancelOutcome, PurchaseError, PurchaseOrchestrator, SettleOutcome};

pub const EVENT_CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const EVENT_CHECKOUT_EXPIRED: &str = "checkout.session.expired";

#[derive(Error, Debug)]
pub enum WebhookError {
    /// Signature missing, malformed, stale, or wrong. The delivery is
    /// rejected outright (processors do not retry a 400).
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Malformed event payload: {0}")]
    MalformedPayload(String),

    /// Internal failure while applying the event; the processor should
    /// retry the delivery.
    #[error("Event processing failed: {0}")]
    Processing(#[from] PurchaseError),
}

/// What the reconciler did with a verified delivery. Every variant is
/// acknowledged to the processor; only errors trigger redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Settled,
    Cancelled,
    /// Replay or race: the transaction was already terminal.
    AlreadyProcessed,
    /// Event references no transaction of ours. Acked so the processor
    /// stops retrying; the reference is logged for the operator.
    UnknownTransaction,
    /// Event type this service does not consume. Acked and dropped.
    Ignored,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
struct WebhookEventData {
    object: WebhookEventObject,
}

#[derive(Debug, Deserialize)]
struct WebhookEventObject {
    /// The checkout session id; matches `Transaction::external_ref`.
    id: String,
}

pub struct WebhookReconciler {
    verifier: SignatureVerifier,
}

impl WebhookReconciler {
    pub fn new(verifier: SignatureVerifier) -> Self {
        Self { verifier }
    }

    /// Verify and apply one delivery. `payload` is the raw request body,
    /// untouched; `signature_header` is the processor's signature header.
    pub async fn process(
        &self,
        orchestrator: &PurchaseOrchestrator,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome, WebhookError> {
        self.verifier
            .verify(payload, signature_header)
            .map_err(|e| match e {
                GatewayError::InvalidSignature(msg) => WebhookError::InvalidSignature(msg),
                other => WebhookError::InvalidSignature(other.to_string()),
            })?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
        let external_ref = event.data.object.id;

        match event.event_type.as_str() {
            EVENT_CHECKOUT_COMPLETED => {
                match orchestrator.settle(&external_ref).await? {
                    SettleOutcome::Applied => Ok(WebhookOutcome::Settled),
                    SettleOutcome::AlreadyCompleted | SettleOutcome::IgnoredFailed => {
                        Ok(WebhookOutcome::AlreadyProcessed)
                    }
                    SettleOutcome::UnknownRef => Ok(WebhookOutcome::UnknownTransaction),
                }
            }
            EVENT_CHECKOUT_EXPIRED => {
                match orchestrator.cancel_or_expire(&external_ref).await? {
                    CancelOutcome::Cancelled => Ok(WebhookOutcome::Cancelled),
                    CancelOutcome::AlreadyTerminal => Ok(WebhookOutcome::AlreadyProcessed),
                    CancelOutcome::UnknownRef => Ok(WebhookOutcome::UnknownTransaction),
                }
            }
            other => {
                info!(event_type = other, "Ignoring unconsumed webhook event type");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }
}

/// Log a delivery outcome at the level the operator cares about.
pub fn log_outcome(outcome: WebhookOutcome, event_type: &str) {
    match outcome {
        WebhookOutcome::Settled | WebhookOutcome::Cancelled => {
            info!(event_type, ?outcome, "Webhook applied");
        }
        WebhookOutcome::AlreadyProcessed | WebhookOutcome::Ignored => {
            info!(event_type, ?outcome, "Webhook acknowledged without effect");
        }
        WebhookOutcome::UnknownTransaction => {
            warn!(event_type, "Webhook references no known transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PurchaseConfig;
    use crate::ledger::models::{Listing, ListingStatus};
    use crate::ledger::{Account, LedgerStore, MemoryLedger, TransactionStatus};
    use crate::payment::{MockGateway, PaymentGateway};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::Arc;

    const SECRET: &str = "whsec_test";

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(SECRET.to_string(), 300)
    }

    fn signed(payload: &str) -> String {
        verifier().sign(payload.as_bytes(), Utc::now().timestamp())
    }

    fn event_body(event_type: &str, external_ref: &str) -> String {
        serde_json::json!({
            "type": event_type,
            "data": { "object": { "id": external_ref } }
        })
        .to_string()
    }

    async fn setup() -> (Arc<MemoryLedger>, PurchaseOrchestrator, WebhookReconciler) {
        let ledger = Arc::new(MemoryLedger::new());
        let gateway = Arc::new(MockGateway::new());

        ledger
            .insert_listing(&Listing {
                listing_id: 1,
                seller_id: 10,
                price: Decimal::from_str("19.99").unwrap(),
                status: ListingStatus::Available,
                buyer_id: None,
                sold_at: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        ledger
            .upsert_account(&Account::with_payout_ref(10, "acct_seller"))
            .await
            .unwrap();

        let orchestrator = PurchaseOrchestrator::new(
            ledger.clone() as Arc<dyn LedgerStore>,
            gateway as Arc<dyn PaymentGateway>,
            PurchaseConfig::default(),
        );
        (ledger, orchestrator, WebhookReconciler::new(verifier()))
    }

    #[tokio::test]
    async fn test_completed_event_settles() {
        let (ledger, orch, reconciler) = setup().await;
        let tx = orch.initiate(1, 20, crate::auth::Role::Buyer).await.unwrap();

        let body = event_body(EVENT_CHECKOUT_COMPLETED, &tx.external_ref);
        let outcome = reconciler
            .process(&orch, body.as_bytes(), &signed(&body))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Settled);

        let stored = ledger
            .transaction_by_external_ref(&tx.external_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_acked_once_applied() {
        let (ledger, orch, reconciler) = setup().await;
        let tx = orch.initiate(1, 20, crate::auth::Role::Buyer).await.unwrap();

        let body = event_body(EVENT_CHECKOUT_COMPLETED, &tx.external_ref);
        let sig = signed(&body);
        assert_eq!(
            reconciler.process(&orch, body.as_bytes(), &sig).await.unwrap(),
            WebhookOutcome::Settled
        );
        assert_eq!(
            reconciler.process(&orch, body.as_bytes(), &sig).await.unwrap(),
            WebhookOutcome::AlreadyProcessed
        );

        // Credited exactly once.
        assert_eq!(
            ledger.account_balance(10).await.unwrap(),
            Decimal::from_str("17.99").unwrap()
        );
    }

    #[tokio::test]
    async fn test_expired_event_cancels() {
        let (ledger, orch, reconciler) = setup().await;
        let tx = orch.initiate(1, 20, crate::auth::Role::Buyer).await.unwrap();

        let body = event_body(EVENT_CHECKOUT_EXPIRED, &tx.external_ref);
        assert_eq!(
            reconciler
                .process(&orch, body.as_bytes(), &signed(&body))
                .await
                .unwrap(),
            WebhookOutcome::Cancelled
        );

        let listing = ledger.get_listing(1).await.unwrap().unwrap();
        assert_eq!(listing.status, ListingStatus::Available);
    }

    #[tokio::test]
    async fn test_invalid_signature_rejected_before_parse() {
        let (_ledger, orch, reconciler) = setup().await;

        // Body is not even valid JSON; the signature check must fire first.
        let body = b"not json at all";
        let err = reconciler
            .process(&orch, body, "t=123,v1=deadbeef")
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn test_tampered_body_rejected() {
        let (_ledger, orch, reconciler) = setup().await;

        let body = event_body(EVENT_CHECKOUT_COMPLETED, "cs_x");
        let sig = signed(&body);
        let tampered = event_body(EVENT_CHECKOUT_COMPLETED, "cs_y");
        let err = reconciler
            .process(&orch, tampered.as_bytes(), &sig)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_ignored() {
        let (_ledger, orch, reconciler) = setup().await;

        let body = event_body("invoice.paid", "in_123");
        assert_eq!(
            reconciler
                .process(&orch, body.as_bytes(), &signed(&body))
                .await
                .unwrap(),
            WebhookOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_acked() {
        let (_ledger, orch, reconciler) = setup().await;

        let body = event_body(EVENT_CHECKOUT_COMPLETED, "cs_someone_elses");
        assert_eq!(
            reconciler
                .process(&orch, body.as_bytes(), &signed(&body))
                .await
                .unwrap(),
            WebhookOutcome::UnknownTransaction
        );
    }

    #[tokio::test]
    async fn test_verified_but_malformed_payload() {
        let (_ledger, orch, reconciler) = setup().await;

        let body = r#"{"type": "checkout.session.completed"}"#;
        let err = reconciler
            .process(&orch, body.as_bytes(), &signed(body))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::MalformedPayload(_)));
    }
}
