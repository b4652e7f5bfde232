pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::auth::jwt_auth_middleware;
use crate::config::ServerConfig;
use state::AppState;

/// Assemble the full route tree. Split out of [`run_server`] so tests can
/// drive the HTTP contract without binding a socket.
pub fn build_router(state: Arc<AppState>) -> Router {
    // The webhook route is public: the processor authenticates with the
    // signature header, not a bearer token.
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/payments/webhook", post(handlers::payment_webhook));

    let private_routes = Router::new()
        .route("/purchases", post(handlers::create_purchase))
        .route("/purchases/{transaction_id}", get(handlers::get_purchase))
        .route(
            "/sellers/me/payment-status",
            get(handlers::seller_payment_status),
        )
        .layer(from_fn_with_state(state.clone(), jwt_auth_middleware));

    Router::new()
        .nest("/api/v1", public_routes.merge(private_routes))
        .with_state(state)
}

/// Start the HTTP server. Blocks until the listener fails.
pub async fn run_server(config: &ServerConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
