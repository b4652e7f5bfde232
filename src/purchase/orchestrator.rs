//! Purchase state machine
//!
//! One transaction per attempt: `Pending -> Completed | Failed`. The
//! `Available -> Reserved` compare-and-set in `initiate` is the single
//! serialization point against double-sale; the three-way write in `settle`
//! (transaction completed + listing sold + seller credited) is applied as
//! one atomic ledger operation keyed by the gateway's external reference.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::PurchaseConfig;
use crate::fees;
use crate::ledger::{LedgerStore, Transaction, TransactionStatus};
use crate::payment::{CheckoutRequest, PaymentGateway, SessionStatus};

use super::error::PurchaseError;
use crate::auth::Role;

/// Result of driving a confirmed-payment event into the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This call performed the settlement.
    Applied,
    /// Replay: the transaction was already completed. No effect.
    AlreadyCompleted,
    /// The transaction already failed (expired/cancelled); confirmation
    /// arrived too late and is never resurrected.
    IgnoredFailed,
    /// No transaction carries this external reference. Logged and dropped;
    /// the reference may belong to an unrelated processor account.
    UnknownRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Already completed or failed; nothing to do.
    AlreadyTerminal,
    UnknownRef,
}

/// Counters from one maintenance sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub reconciled_settled: u64,
    pub reconciled_cancelled: u64,
    pub expired: u64,
}

pub struct PurchaseOrchestrator {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: PurchaseConfig,
}

impl PurchaseOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: PurchaseConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Open a purchase: validate eligibility, reserve the listing, create a
    /// checkout session, persist the pending transaction.
    ///
    /// Exactly one of N concurrent callers wins the reservation CAS; the
    /// rest fail with [`PurchaseError::AlreadySold`]. A gateway failure
    /// after the reservation rolls the listing back to available.
    pub async fn initiate(
        &self,
        listing_id: i64,
        buyer_id: i64,
        buyer_role: Role,
    ) -> Result<Transaction, PurchaseError> {
        let listing = self
            .ledger
            .get_listing(listing_id)
            .await?
            .ok_or(PurchaseError::NotFound)?;

        if buyer_role != Role::Buyer || buyer_id == listing.seller_id {
            return Err(PurchaseError::NotEligible);
        }

        // Double-click tie-break: an unexpired pending attempt by the same
        // buyer gets the existing session back instead of a second
        // reservation and a duplicate gateway session.
        if let Some(pending) = self
            .ledger
            .pending_transaction_for(listing_id, buyer_id)
            .await?
        {
            let expires_at =
                pending.updated_at + Duration::seconds(self.config.pending_ttl_secs);
            if Utc::now() < expires_at {
                info!(
                    listing_id,
                    buyer_id,
                    external_ref = %pending.external_ref,
                    "Returning existing pending session for repeat initiate"
                );
                return Ok(pending);
            }
        }

        // The availability check and the reservation are one conditional
        // write at the storage layer; only one racing buyer wins.
        if !self.ledger.reserve_listing(listing_id).await? {
            return Err(PurchaseError::AlreadySold);
        }

        let split = fees::split(listing.price)
            .map_err(|e| PurchaseError::InvalidAmount(e.to_string()));
        let split = match split {
            Ok(s) => s,
            Err(e) => {
                self.rollback_reservation(listing_id).await;
                return Err(e);
            }
        };

        let payout_ref = match self.ledger.get_account(listing.seller_id).await {
            Ok(account) => account.and_then(|a| a.payout_ref),
            Err(e) => {
                self.rollback_reservation(listing_id).await;
                return Err(e.into());
            }
        };

        let checkout = CheckoutRequest {
            listing_id,
            buyer_id,
            seller_id: listing.seller_id,
            gross: listing.price,
            fee: split.fee,
            payout_ref,
        };
        let session = match self.gateway.create_checkout_session(&checkout).await {
            Ok(s) => s,
            Err(e) => {
                self.rollback_reservation(listing_id).await;
                return Err(e.into());
            }
        };

        let tx = Transaction::pending(
            listing_id,
            buyer_id,
            listing.seller_id,
            listing.price,
            split.fee,
            split.payout,
            session.external_ref,
            session.checkout_url,
        );
        if let Err(e) = self.ledger.insert_transaction(&tx).await {
            // Includes a duplicate external_ref, which would mean the
            // gateway reused a session id. Roll back and surface as
            // transient so the buyer can retry cleanly.
            error!(
                listing_id,
                buyer_id,
                external_ref = %tx.external_ref,
                error = %e,
                "Failed to persist pending transaction after session creation"
            );
            self.rollback_reservation(listing_id).await;
            return Err(PurchaseError::GatewayUnavailable(e.to_string()));
        }

        info!(
            listing_id,
            buyer_id,
            transaction_id = %tx.transaction_id,
            external_ref = %tx.external_ref,
            gross = %tx.gross,
            fee = %tx.fee,
            payout = %tx.payout,
            "Purchase initiated"
        );
        Ok(tx)
    }

    /// Terminal transition for a confirmed payment. Idempotent under
    /// at-least-once delivery: replays and races resolve to a no-op.
    pub async fn settle(&self, external_ref: &str) -> Result<SettleOutcome, PurchaseError> {
        let Some(tx) = self.ledger.transaction_by_external_ref(external_ref).await? else {
            warn!(external_ref, "Settlement for unknown external reference (dropped)");
            return Ok(SettleOutcome::UnknownRef);
        };

        match tx.status {
            TransactionStatus::Completed => {
                info!(external_ref, "Settlement replay on completed transaction (no-op)");
                return Ok(SettleOutcome::AlreadyCompleted);
            }
            TransactionStatus::Failed => {
                warn!(
                    external_ref,
                    transaction_id = %tx.transaction_id,
                    "Payment confirmation for a failed transaction (not resurrected)"
                );
                return Ok(SettleOutcome::IgnoredFailed);
            }
            TransactionStatus::Pending => {}
        }

        if self.ledger.apply_settlement(external_ref, Utc::now()).await? {
            info!(
                external_ref,
                transaction_id = %tx.transaction_id,
                listing_id = tx.listing_id,
                buyer_id = tx.buyer_id,
                seller_id = tx.seller_id,
                payout = %tx.payout,
                "Purchase settled"
            );
            Ok(SettleOutcome::Applied)
        } else {
            // Lost the race against a concurrent settle of the same ref.
            Ok(SettleOutcome::AlreadyCompleted)
        }
    }

    /// Buyer cancellation or TTL expiry: fail the pending transaction and
    /// return the listing to the market. Terminal states are untouched.
    pub async fn cancel_or_expire(
        &self,
        external_ref: &str,
    ) -> Result<CancelOutcome, PurchaseError> {
        let Some(tx) = self.ledger.transaction_by_external_ref(external_ref).await? else {
            warn!(external_ref, "Cancellation for unknown external reference (dropped)");
            return Ok(CancelOutcome::UnknownRef);
        };

        if tx.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        if self.ledger.apply_cancellation(external_ref).await? {
            info!(
                external_ref,
                transaction_id = %tx.transaction_id,
                listing_id = tx.listing_id,
                "Purchase cancelled, listing released"
            );
            Ok(CancelOutcome::Cancelled)
        } else {
            Ok(CancelOutcome::AlreadyTerminal)
        }
    }

    /// One maintenance pass: reconcile first, then expire.
    ///
    /// Reconciliation runs before expiry so a payment the processor already
    /// captured settles instead of being cancelled by the TTL. The sweep is
    /// the safety net for "money taken, listing not marked sold": any
    /// transaction still pending past the grace period is checked against
    /// the processor's own record.
    pub async fn sweep_once(&self) -> Result<SweepReport, PurchaseError> {
        let mut report = SweepReport::default();

        // Reconcile pending transactions past the grace window.
        let grace_cutoff = Utc::now() - Duration::seconds(self.config.reconcile_grace_secs);
        for tx in self.ledger.pending_older_than(grace_cutoff).await? {
            match self.gateway.lookup_session(&tx.external_ref).await {
                Ok(SessionStatus::Paid) => {
                    if self.settle(&tx.external_ref).await? == SettleOutcome::Applied {
                        warn!(
                            external_ref = %tx.external_ref,
                            "Reconciliation settled a paid transaction the webhook missed"
                        );
                        report.reconciled_settled += 1;
                    }
                }
                Ok(SessionStatus::Expired) => {
                    if self.cancel_or_expire(&tx.external_ref).await? == CancelOutcome::Cancelled {
                        report.reconciled_cancelled += 1;
                    }
                }
                Ok(SessionStatus::Open) => {}
                Err(e) => {
                    // Transient; the next sweep retries.
                    warn!(external_ref = %tx.external_ref, error = %e, "Reconciliation lookup failed");
                }
            }
        }

        // Expire pending transactions past the TTL with no confirmation.
        let ttl_cutoff = Utc::now() - Duration::seconds(self.config.pending_ttl_secs);
        for tx in self.ledger.pending_older_than(ttl_cutoff).await? {
            if self.cancel_or_expire(&tx.external_ref).await? == CancelOutcome::Cancelled {
                info!(external_ref = %tx.external_ref, "Expired stale pending transaction");
                report.expired += 1;
            }
        }

        Ok(report)
    }

    /// Best-effort release after a failed initiate step. A listing stuck in
    /// `Reserved` would otherwise block all future buyers.
    async fn rollback_reservation(&self, listing_id: i64) {
        match self.ledger.release_listing(listing_id).await {
            Ok(true) => {}
            Ok(false) => {
                error!(listing_id, "Reservation rollback found listing not reserved");
            }
            Err(e) => {
                // The expiry sweep will release it via the (never-persisted)
                // transaction being absent; flag for the operator.
                error!(listing_id, error = %e, "Reservation rollback failed");
            }
        }
    }
}
