//! In-process payment gateway
//!
//! Deterministic stand-in for the external processor, used by tests and
//! database-less dev runs. Sessions are held in memory and can be driven to
//! paid/expired by the caller to simulate the processor's side.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::gateway::{
    AccountStatus, CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway, SessionStatus,
};

/// Failure injection for the next gateway calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockFailure {
    #[default]
    None,
    Unavailable,
    SellerNotOnboarded,
}

#[derive(Default)]
struct MockState {
    sessions: HashMap<String, SessionStatus>,
    failure: MockFailure,
}

pub struct MockGateway {
    counter: AtomicU64,
    state: Mutex<MockState>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Make subsequent calls fail with the given mode until reset.
    pub fn set_failure(&self, failure: MockFailure) {
        if let Ok(mut state) = self.state.lock() {
            state.failure = failure;
        }
    }

    /// Simulate the processor capturing payment for a session.
    pub fn mark_paid(&self, external_ref: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.sessions.insert(external_ref.to_string(), SessionStatus::Paid);
        }
    }

    /// Simulate session expiry on the processor side.
    pub fn mark_expired(&self, external_ref: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .sessions
                .insert(external_ref.to_string(), SessionStatus::Expired);
        }
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().map(|s| s.sessions.len()).unwrap_or(0)
    }

    fn injected_failure(&self) -> Option<GatewayError> {
        match self.state.lock().map(|s| s.failure).unwrap_or_default() {
            MockFailure::None => None,
            MockFailure::Unavailable => {
                Some(GatewayError::Unavailable("injected outage".to_string()))
            }
            MockFailure::SellerNotOnboarded => Some(GatewayError::SellerNotOnboarded),
        }
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout_session(
        &self,
        req: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        if req.payout_ref.is_none() {
            return Err(GatewayError::SellerNotOnboarded);
        }
        if req.gross <= rust_decimal::Decimal::ZERO {
            return Err(GatewayError::InvalidAmount(req.gross.to_string()));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let external_ref = format!("cs_mock_{:08}", n);

        if let Ok(mut state) = self.state.lock() {
            state
                .sessions
                .insert(external_ref.clone(), SessionStatus::Open);
        }

        Ok(CheckoutSession {
            checkout_url: format!("https://pay.mock.local/c/{}", external_ref),
            external_ref,
        })
    }

    async fn lookup_session(&self, external_ref: &str) -> Result<SessionStatus, GatewayError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        let state = self
            .state
            .lock()
            .map_err(|_| GatewayError::Unavailable("mock state poisoned".to_string()))?;
        Ok(state
            .sessions
            .get(external_ref)
            .copied()
            .unwrap_or(SessionStatus::Expired))
    }

    async fn account_status(&self, _payout_ref: &str) -> Result<AccountStatus, GatewayError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        Ok(AccountStatus {
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
        })
    }
}
