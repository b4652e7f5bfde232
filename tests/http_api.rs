//! HTTP contract tests: status codes and response envelopes as clients and
//! the payment processor actually see them, driven through the router with
//! no socket.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;

use ideamart::auth::{AuthService, Role};
use ideamart::config::PurchaseConfig;
use ideamart::ledger::models::{Listing, ListingStatus};
use ideamart::ledger::{Account, LedgerStore, MemoryLedger};
use ideamart::payment::mock::{MockFailure, MockGateway};
use ideamart::payment::{PaymentGateway, SignatureVerifier};
use ideamart::purchase::PurchaseOrchestrator;
use ideamart::server::build_router;
use ideamart::server::state::AppState;
use ideamart::webhook::WebhookReconciler;

const SELLER: i64 = 100;
const BUYER: i64 = 200;
const LISTING: i64 = 1;
const JWT_SECRET: &str = "http-test-secret";
const WEBHOOK_SECRET: &str = "whsec_http_test";

struct Harness {
    app: Router,
    ledger: Arc<MemoryLedger>,
    gateway: Arc<MockGateway>,
    auth: AuthService,
}

async fn harness() -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let gateway = Arc::new(MockGateway::new());

    ledger
        .insert_listing(&Listing {
            listing_id: LISTING,
            seller_id: SELLER,
            price: Decimal::from_str("19.99").unwrap(),
            status: ListingStatus::Available,
            buyer_id: None,
            sold_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    ledger
        .upsert_account(&Account::with_payout_ref(SELLER, "acct_http_seller"))
        .await
        .unwrap();

    let orchestrator = Arc::new(PurchaseOrchestrator::new(
        ledger.clone() as Arc<dyn LedgerStore>,
        gateway.clone() as Arc<dyn PaymentGateway>,
        PurchaseConfig::default(),
    ));
    let reconciler =
        WebhookReconciler::new(SignatureVerifier::new(WEBHOOK_SECRET.to_string(), 300));

    let state = Arc::new(AppState::new(
        ledger.clone() as Arc<dyn LedgerStore>,
        gateway.clone() as Arc<dyn PaymentGateway>,
        orchestrator,
        reconciler,
        AuthService::new(JWT_SECRET.to_string()),
    ));

    Harness {
        app: build_router(state),
        ledger,
        gateway,
        auth: AuthService::new(JWT_SECRET.to_string()),
    }
}

fn bearer(auth: &AuthService, user_id: i64, role: Role) -> String {
    format!("Bearer {}", auth.issue_token(user_id, role).unwrap())
}

fn purchase_request(token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/purchases")
        .header(header::AUTHORIZATION, token)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(r#"{{"listing_id":{}}}"#, LISTING)))
        .unwrap()
}

fn webhook_request(body: String, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/payments/webhook")
        .header("Stripe-Signature", signature)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn signed_completed_event(external_ref: &str) -> (String, String) {
    let body = serde_json::json!({
        "type": "checkout.session.completed",
        "data": { "object": { "id": external_ref } }
    })
    .to_string();
    let sig = SignatureVerifier::new(WEBHOOK_SECRET.to_string(), 300)
        .sign(body.as_bytes(), Utc::now().timestamp());
    (body, sig)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn purchase_accepted_with_202_and_checkout_url() {
    let h = harness().await;
    let token = bearer(&h.auth, BUYER, Role::Buyer);

    let response = h.app.clone().oneshot(purchase_request(&token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["listing_id"], LISTING);
    assert_eq!(body["data"]["status"], "pending");
    assert!(body["data"]["checkout_url"].as_str().unwrap().starts_with("https://"));
}

#[tokio::test]
async fn second_buyer_gets_409() {
    let h = harness().await;

    let first = bearer(&h.auth, BUYER, Role::Buyer);
    let response = h.app.clone().oneshot(purchase_request(&first)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let second = bearer(&h.auth, BUYER + 1, Role::Buyer);
    let response = h.app.clone().oneshot(purchase_request(&second)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = json_body(response).await;
    assert_eq!(body["code"], 4091);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn seller_buying_own_listing_gets_403() {
    let h = harness().await;
    let token = bearer(&h.auth, SELLER, Role::Buyer);

    let response = h.app.clone().oneshot(purchase_request(&token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn gateway_outage_surfaces_as_503() {
    let h = harness().await;
    h.gateway.set_failure(MockFailure::Unavailable);

    let token = bearer(&h.auth, BUYER, Role::Buyer);
    let response = h.app.clone().oneshot(purchase_request(&token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // The failed attempt left the listing purchasable.
    let listing = h.ledger.get_listing(LISTING).await.unwrap().unwrap();
    assert_eq!(listing.status, ListingStatus::Available);
}

#[tokio::test]
async fn missing_bearer_token_gets_401() {
    let h = harness().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/purchases")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(r#"{{"listing_id":{}}}"#, LISTING)))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_settles_with_200_and_replay_still_200() {
    let h = harness().await;

    let token = bearer(&h.auth, BUYER, Role::Buyer);
    let response = h.app.clone().oneshot(purchase_request(&token)).await.unwrap();
    let body = json_body(response).await;
    let transaction_id = body["data"]["transaction_id"].as_str().unwrap();
    let tx = h
        .ledger
        .transaction_by_id(transaction_id)
        .await
        .unwrap()
        .unwrap();

    let (event, sig) = signed_completed_event(&tx.external_ref);

    let response = h
        .app
        .clone()
        .oneshot(webhook_request(event.clone(), &sig))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["outcome"], "settled");

    // At-least-once delivery: the duplicate is acknowledged, not re-applied.
    let response = h
        .app
        .clone()
        .oneshot(webhook_request(event, &sig))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["outcome"], "already_processed");

    let listing = h.ledger.get_listing(LISTING).await.unwrap().unwrap();
    assert_eq!(listing.status, ListingStatus::Sold);
}

#[tokio::test]
async fn webhook_with_bad_signature_gets_400() {
    let h = harness().await;

    let (event, _) = signed_completed_event("cs_whatever");
    let response = h
        .app
        .clone()
        .oneshot(webhook_request(event, "t=123,v1=deadbeef"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["code"], 1003);
}

#[tokio::test]
async fn webhook_without_signature_header_gets_400() {
    let h = harness().await;

    let (event, _) = signed_completed_event("cs_whatever");
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/payments/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(event))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_crate_version() {
    let h = harness().await;

    let request = Request::builder()
        .uri("/api/v1/health")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
}
