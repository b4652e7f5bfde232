use std::sync::Arc;

use crate::auth::AuthService;
use crate::ledger::LedgerStore;
use crate::payment::PaymentGateway;
use crate::purchase::PurchaseOrchestrator;
use crate::webhook::WebhookReconciler;

/// Shared state for all HTTP handlers.
pub struct AppState {
    pub ledger: Arc<dyn LedgerStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub orchestrator: Arc<PurchaseOrchestrator>,
    pub reconciler: WebhookReconciler,
    pub auth: AuthService,
}

impl AppState {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        orchestrator: Arc<PurchaseOrchestrator>,
        reconciler: WebhookReconciler,
        auth: AuthService,
    ) -> Self {
        Self {
            ledger,
            gateway,
            orchestrator,
            reconciler,
            auth,
        }
    }
}
