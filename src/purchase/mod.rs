//! Purchase Orchestrator
//!
//! The state machine that drives a purchase from intent to settlement or
//! failure. Owns every listing/transaction invariant; no other component
//! writes sale status, buyer, or transaction status.

pub mod error;
pub mod orchestrator;

pub use error::PurchaseError;
pub use orchestrator::{
    CancelOutcome, PurchaseOrchestrator, SettleOutcome, SweepReport,
};
