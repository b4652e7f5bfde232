//! Payment gateway adapter
//!
//! Thin boundary to the external split-payment processor: checkout-session
//! creation, session/account lookups, and webhook signature verification.
//! Holds no authoritative state; everything durable lives in the ledger.

pub mod gateway;
pub mod mock;
pub mod signature;
pub mod stripe;

pub use gateway::{
    AccountStatus, CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway, SessionStatus,
};
pub use mock::MockGateway;
pub use signature::SignatureVerifier;
pub use stripe::StripeGateway;
