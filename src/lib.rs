//! IdeaMart - Purchase Settlement Core
//!
//! The money path of an online idea marketplace: exactly-once sale of a
//! listing, split-payment checkout through an external processor, webhook
//! reconciliation, and a durable ledger of listings, transactions and
//! seller accounts.
//!
//! # Modules
//!
//! - [`ledger`] - Durable listing/transaction/account store (Postgres or in-memory)
//! - [`fees`] - Marketplace fee policy (tiered rate, cap, floor)
//! - [`payment`] - Payment gateway adapter and webhook signature verification
//! - [`purchase`] - Purchase orchestrator: initiate, settle, cancel, sweep
//! - [`webhook`] - Processor event reconciler
//! - [`auth`] - JWT verification for buyer/seller requests
//! - [`server`] - HTTP API

pub mod auth;
pub mod config;
pub mod fees;
pub mod ledger;
pub mod logging;
pub mod payment;
pub mod purchase;
pub mod server;
pub mod webhook;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use fees::{FeeError, FeeSplit};
pub use ledger::{LedgerError, LedgerStore, MemoryLedger, PgLedger};
pub use payment::{MockGateway, PaymentGateway, SignatureVerifier, StripeGateway};
pub use purchase::{PurchaseError, PurchaseOrchestrator};
pub use webhook::WebhookReconciler;
