//! Stripe-flavored gateway client
//!
//! Speaks the processor's form-encoded checkout API. The fee split travels
//! as `application_fee_amount` + destination transfer on the payment intent;
//! `{listing_id, buyer_id, seller_id}` ride in metadata for reconciliation.

use cached::{Cached, TimedCache};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::sync::Mutex;

use crate::config::PaymentConfig;

use super::gateway::{
    AccountStatus, CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway, SessionStatus,
};

pub struct StripeGateway {
    http: reqwest::Client,
    config: PaymentConfig,
    /// Short-TTL cache for connected-account capability flags. Staleness is
    /// acceptable: these flags never gate settlement.
    status_cache: Mutex<TimedCache<String, AccountStatus>>,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    charges_enabled: bool,
    payouts_enabled: bool,
    details_submitted: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(config: PaymentConfig) -> Self {
        let ttl = config.account_status_ttl_secs;
        Self {
            http: reqwest::Client::new(),
            config,
            status_cache: Mutex::new(TimedCache::with_lifespan(ttl)),
        }
    }

    fn to_cents(amount: Decimal) -> Result<i64, GatewayError> {
        (amount * Decimal::ONE_HUNDRED)
            .to_i64()
            .ok_or_else(|| GatewayError::InvalidAmount(amount.to_string()))
    }

    async fn classify_error(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        if status.is_server_error() {
            return GatewayError::Unavailable(format!("processor returned {}", status));
        }

        let body = match response.json::<ErrorResponse>().await {
            Ok(b) => b,
            Err(e) => return GatewayError::Unavailable(format!("unreadable error body: {}", e)),
        };

        let code = body.error.code.as_deref().unwrap_or("");
        let message = body.error.message.unwrap_or_default();
        match code {
            "amount_too_small" | "amount_too_large" | "parameter_invalid_integer" => {
                GatewayError::InvalidAmount(message)
            }
            "account_invalid" | "insufficient_capabilities_for_transfer" => {
                GatewayError::SellerNotOnboarded
            }
            _ => GatewayError::Unavailable(format!("{} ({})", message, status)),
        }
    }
}

#[async_trait::async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        req: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let Some(payout_ref) = req.payout_ref.as_deref() else {
            return Err(GatewayError::SellerNotOnboarded);
        };

        let gross_cents = Self::to_cents(req.gross)?.to_string();
        let fee_cents = Self::to_cents(req.fee)?.to_string();
        let product_name = format!("Idea listing #{}", req.listing_id);
        let listing_id = req.listing_id.to_string();
        let buyer_id = req.buyer_id.to_string();
        let seller_id = req.seller_id.to_string();

        let form: Vec<(&str, &str)> = vec![
            ("mode", "payment"),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", "usd"),
            ("line_items[0][price_data][unit_amount]", &gross_cents),
            ("line_items[0][price_data][product_data][name]", &product_name),
            ("payment_intent_data[application_fee_amount]", &fee_cents),
            ("payment_intent_data[transfer_data][destination]", payout_ref),
            ("metadata[listing_id]", &listing_id),
            ("metadata[buyer_id]", &buyer_id),
            ("metadata[seller_id]", &seller_id),
            ("success_url", &self.config.success_url),
            ("cancel_url", &self.config.cancel_url),
        ];

        let response = self
            .http
            .post(format!("{}/checkout/sessions", self.config.api_base))
            .bearer_auth(&self.config.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("malformed session body: {}", e)))?;

        let checkout_url = session.url.ok_or_else(|| {
            GatewayError::Unavailable("session created without checkout url".to_string())
        })?;

        Ok(CheckoutSession {
            external_ref: session.id,
            checkout_url,
        })
    }

    async fn lookup_session(&self, external_ref: &str) -> Result<SessionStatus, GatewayError> {
        let response = self
            .http
            .get(format!(
                "{}/checkout/sessions/{}",
                self.config.api_base, external_ref
            ))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            // Sessions the processor no longer knows count as expired.
            return Ok(SessionStatus::Expired);
        }
        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("malformed session body: {}", e)))?;

        if session.payment_status.as_deref() == Some("paid") {
            return Ok(SessionStatus::Paid);
        }
        match session.status.as_deref() {
            Some("expired") => Ok(SessionStatus::Expired),
            _ => Ok(SessionStatus::Open),
        }
    }

    async fn account_status(&self, payout_ref: &str) -> Result<AccountStatus, GatewayError> {
        if let Ok(mut cache) = self.status_cache.lock() {
            if let Some(cached) = cache.cache_get(&payout_ref.to_string()) {
                return Ok(*cached);
            }
        }

        let response = self
            .http
            .get(format!("{}/accounts/{}", self.config.api_base, payout_ref))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::SellerNotOnboarded);
        }
        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let account: AccountResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("malformed account body: {}", e)))?;

        let status = AccountStatus {
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            details_submitted: account.details_submitted,
        };

        if let Ok(mut cache) = self.status_cache.lock() {
            cache.cache_set(payout_ref.to_string(), status);
        }

        Ok(status)
    }
}
