//! Webhook signature verification
//!
//! The processor signs each delivery with HMAC-SHA256 over
//! `"{timestamp}.{raw_body}"` and sends `t=<unix>,v1=<hex>` in the signature
//! header. Verification is constant-time and rejects timestamps outside the
//! freshness window, which blunts replay at the transport level independently
//! of the data-level idempotency key.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::gateway::GatewayError;

type HmacSha256 = Hmac<Sha256>;

pub struct SignatureVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verify a raw payload against its signature header.
    ///
    /// Must be called on the exact bytes received, before any JSON parsing
    /// influences a decision.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<(), GatewayError> {
        self.verify_at(payload, signature_header, Utc::now().timestamp())
    }

    /// Verification with an injected clock, for tests.
    pub fn verify_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<(), GatewayError> {
        let (timestamp, received_hex) = parse_header(signature_header)?;

        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(GatewayError::InvalidSignature(
                "timestamp outside freshness window".to_string(),
            ));
        }

        let received = hex::decode(received_hex)
            .map_err(|_| GatewayError::InvalidSignature("malformed v1 hex".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| GatewayError::InvalidSignature("invalid signing key".to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        // verify_slice is constant-time.
        mac.verify_slice(&received)
            .map_err(|_| GatewayError::InvalidSignature("digest mismatch".to_string()))
    }

    /// Produce a valid header for a payload. Used by the mock gateway and by
    /// tests that simulate processor deliveries.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        )
    }
}

fn parse_header(header: &str) -> Result<(i64, &str), GatewayError> {
    let mut timestamp = None;
    let mut v1 = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    GatewayError::InvalidSignature("malformed timestamp".to_string())
                })?);
            }
            Some(("v1", value)) => v1 = Some(value),
            // Unknown scheme versions are ignored for forward compatibility.
            _ => {}
        }
    }

    match (timestamp, v1) {
        (Some(t), Some(sig)) => Ok((t, sig)),
        _ => Err(GatewayError::InvalidSignature(
            "header missing t= or v1=".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(SECRET, 300)
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let now = Utc::now().timestamp();
        let header = verifier().sign(payload, now);
        assert!(verifier().verify_at(payload, &header, now).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"{}";
        let now = Utc::now().timestamp();
        let header = SignatureVerifier::new("wrong_secret", 300).sign(payload, now);
        let err = verifier().verify_at(payload, &header, now).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidSignature(_)));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let payload = br#"{"amount":100}"#;
        let now = Utc::now().timestamp();
        let header = verifier().sign(payload, now);
        let tampered = br#"{"amount":999}"#;
        assert!(verifier().verify_at(tampered, &header, now).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = b"{}";
        let old = Utc::now().timestamp() - 3600;
        let header = verifier().sign(payload, old);
        let err = verifier()
            .verify_at(payload, &header, Utc::now().timestamp())
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidSignature(_)));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let payload = b"{}";
        let now = Utc::now().timestamp();
        let header = verifier().sign(payload, now + 3600);
        assert!(verifier().verify_at(payload, &header, now).is_err());
    }

    #[test]
    fn test_missing_parts_rejected() {
        let payload = b"{}";
        let now = Utc::now().timestamp();
        assert!(verifier().verify_at(payload, "v1=abcd", now).is_err());
        assert!(verifier().verify_at(payload, "t=12345", now).is_err());
        assert!(verifier().verify_at(payload, "", now).is_err());
        assert!(verifier().verify_at(payload, "t=xx,v1=zz", now).is_err());
    }

    #[test]
    fn test_unknown_scheme_versions_ignored() {
        let payload = b"{}";
        let now = Utc::now().timestamp();
        let header = format!("{},v0=deadbeef", verifier().sign(payload, now));
        assert!(verifier().verify_at(payload, &header, now).is_ok());
    }
}
