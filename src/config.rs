use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub server: ServerConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub purchase: PurchaseConfig,
    /// PostgreSQL connection URL for the ledger store.
    /// When absent the service runs on the in-memory ledger (dev only).
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// HS256 secret shared with the user service that mints buyer/seller JWTs.
    pub jwt_secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// External payment processor configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaymentConfig {
    /// Base URL of the processor API.
    pub api_base: String,
    /// Secret API key for outbound calls.
    pub secret_key: String,
    /// Webhook signing secret for inbound event verification.
    pub webhook_secret: String,
    /// Signature timestamp freshness window, seconds.
    pub signature_tolerance_secs: i64,
    /// Where the processor redirects the buyer after checkout.
    pub success_url: String,
    pub cancel_url: String,
    /// TTL for cached seller capability flags, seconds.
    pub account_status_ttl_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.stripe.com/v1".to_string(),
            // Deliberately not an sk_ key: an omitted payment section must
            // select the mock gateway, never the live processor.
            secret_key: "mock".to_string(),
            webhook_secret: "whsec_placeholder".to_string(),
            signature_tolerance_secs: 300,
            success_url: "https://ideamart.local/purchase/success".to_string(),
            cancel_url: "https://ideamart.local/purchase/cancel".to_string(),
            account_status_ttl_secs: 60,
        }
    }
}

/// Purchase lifecycle configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PurchaseConfig {
    /// A pending transaction with no webhook confirmation within this window
    /// is eligible for automatic expiry.
    pub pending_ttl_secs: i64,
    /// Pending transactions older than this are checked against the
    /// gateway's own record during the reconciliation sweep.
    pub reconcile_grace_secs: i64,
    /// Interval between sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 30 * 60,
            reconcile_grace_secs: 5 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
log_level: "info"
log_dir: "./logs"
log_file: "ideamart.log"
use_json: false
rotation: "daily"
server:
  host: "127.0.0.1"
  port: 8080
jwt_secret: "test-secret"
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert!(cfg.postgres_url.is_none());
        assert_eq!(cfg.purchase.pending_ttl_secs, 30 * 60);
        assert_eq!(cfg.payment.signature_tolerance_secs, 300);
    }

    #[test]
    fn test_omitted_payment_section_never_selects_live_gateway() {
        // Gateway selection keys on an sk_-prefixed secret; the default that
        // fills an omitted payment section must not look like a live key.
        let cfg = PaymentConfig::default();
        assert!(!cfg.secret_key.starts_with("sk_"));
    }
}
