//! IdeaMart service entry point.
//!
//! Wires the ledger (Postgres when configured, in-memory otherwise), the
//! payment gateway, the purchase orchestrator and the HTTP server, and
//! spawns the periodic reconciliation/expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use ideamart::auth::AuthService;
use ideamart::config::AppConfig;
use ideamart::ledger::{LedgerStore, MemoryLedger, PgLedger};
use ideamart::logging::init_logging;
use ideamart::payment::{MockGateway, PaymentGateway, SignatureVerifier, StripeGateway};
use ideamart::purchase::PurchaseOrchestrator;
use ideamart::server::{run_server, state::AppState};
use ideamart::webhook::WebhookReconciler;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);

    // Guard must live for the whole process or file logging stops.
    let _log_guard = init_logging(&config);
    info!(env = %env, "Starting ideamart");

    let ledger: Arc<dyn LedgerStore> = match &config.postgres_url {
        Some(url) => {
            let pg = PgLedger::connect(url).await?;
            pg.ensure_schema().await?;
            info!("Ledger: PostgreSQL");
            Arc::new(pg)
        }
        None => {
            warn!("No postgres_url configured; using in-memory ledger (data is not durable)");
            Arc::new(MemoryLedger::new())
        }
    };

    let gateway: Arc<dyn PaymentGateway> =
        if config.payment.secret_key.starts_with("sk_") {
            Arc::new(StripeGateway::new(config.payment.clone()))
        } else {
            warn!("No processor API key configured; using mock payment gateway");
            Arc::new(MockGateway::new())
        };

    let orchestrator = Arc::new(PurchaseOrchestrator::new(
        ledger.clone(),
        gateway.clone(),
        config.purchase.clone(),
    ));

    let verifier = SignatureVerifier::new(
        config.payment.webhook_secret.clone(),
        config.payment.signature_tolerance_secs,
    );
    let reconciler = WebhookReconciler::new(verifier);
    let auth = AuthService::new(config.jwt_secret.clone());

    // Periodic sweep: reconcile stuck-pending transactions against the
    // processor, then expire the ones past their TTL.
    let sweep_orchestrator = orchestrator.clone();
    let sweep_interval = Duration::from_secs(config.purchase.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep_orchestrator.sweep_once().await {
                Ok(report) => {
                    if report.reconciled_settled > 0
                        || report.reconciled_cancelled > 0
                        || report.expired > 0
                    {
                        info!(
                            settled = report.reconciled_settled,
                            cancelled = report.reconciled_cancelled,
                            expired = report.expired,
                            "Sweep applied changes"
                        );
                    }
                }
                Err(e) => error!(error = %e, "Sweep failed"),
            }
        }
    });

    let state = Arc::new(AppState::new(
        ledger,
        gateway,
        orchestrator,
        reconciler,
        auth,
    ));

    run_server(&config.server, state).await
}
