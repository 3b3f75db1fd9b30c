//! Payment provider integration: the REST client that opens payment
//! intents, and verification of signed webhook callbacks.
//!
//! Amounts cross this boundary in MINOR currency units (kopecks/cents);
//! everything stored locally is in major units. Keep the ×100 conversion
//! here and in `reconcile` only.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

use crate::error::{AppError, ProviderError};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a webhook signature timestamp.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// HTTP client for the card-payment provider.
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl ProviderClient {
    pub fn new(secret_key: String, api_base: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            secret_key,
            api_base,
        }
    }

    /// Opens a payment intent. The booking id and payer travel in intent
    /// metadata so webhook callbacks can be mapped back to the ledger.
    pub async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        booking_id: i64,
        paid_by: &str,
        description: &str,
    ) -> Result<PaymentIntent, ProviderError> {
        let params = [
            ("amount", amount_minor.to_string()),
            ("currency", currency.to_string()),
            ("description", description.to_string()),
            ("metadata[booking_id]", booking_id.to_string()),
            ("metadata[paid_by]", paid_by.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let resp = self
            .http
            .post(format!("{}/v1/payment_intents", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&params)
            .send()
            .await
            .map_err(ProviderError::from)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!("intent creation failed: {} - {}", status, body);
            return Err(ProviderError::Api { status, body });
        }

        let json: serde_json::Value = resp.json().await.map_err(ProviderError::from)?;

        let id = json["id"]
            .as_str()
            .ok_or_else(|| ProviderError::Malformed("нет идентификатора интента".into()))?
            .to_string();
        let client_secret = json["client_secret"]
            .as_str()
            .ok_or_else(|| ProviderError::Malformed("нет client_secret".into()))?
            .to_string();

        tracing::info!("payment intent {} created for booking {}", id, booking_id);
        Ok(PaymentIntent { id, client_secret })
    }
}

// ── Webhook signature verification ──

/// Verifies a signed webhook header of the form `t=<unix>,v1=<hex>` where
/// v1 = HMAC-SHA256(secret, "{t}.{raw body}"). Rejects stale timestamps.
pub fn verify_webhook_signature(secret: &str, body: &[u8], header: &str) -> Result<(), AppError> {
    verify_at(secret, body, header, chrono::Utc::now().timestamp())
}

fn verify_at(secret: &str, body: &[u8], header: &str, now: i64) -> Result<(), AppError> {
    let mut timestamp: Option<i64> = None;
    let mut signature: Option<&str> = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => signature = Some(v),
            _ => {}
        }
    }

    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return Err(AppError::Verification("Подпись вебхука не распознана".into()));
    };

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::Verification("Подпись вебхука устарела".into()));
    }

    let sig_bytes = hex::decode(signature)
        .map_err(|_| AppError::Verification("Подпись вебхука не распознана".into()))?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    // verify_slice is constant-time
    mac.verify_slice(&sig_bytes)
        .map_err(|_| AppError::Verification("Подпись вебхука не совпадает".into()))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    /// Builds a valid header the way the provider would.
    fn sign(secret: &str, body: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign(SECRET, body, 1_700_000_000);
        assert!(verify_at(SECRET, body, &header, 1_700_000_000).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = sign(SECRET, b"original", 1_700_000_000);
        let err = verify_at(SECRET, b"tampered", &header, 1_700_000_000).unwrap_err();
        assert!(matches!(err, AppError::Verification(_)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let header = sign("whsec_other", body, 1_700_000_000);
        let err = verify_at(SECRET, body, &header, 1_700_000_000).unwrap_err();
        assert!(matches!(err, AppError::Verification(_)));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let body = b"payload";
        let header = sign(SECRET, body, 1_700_000_000);
        let err = verify_at(SECRET, body, &header, 1_700_000_000 + 3600).unwrap_err();
        assert!(matches!(err, AppError::Verification(_)));
    }

    #[test]
    fn test_within_tolerance_accepted() {
        let body = b"payload";
        let header = sign(SECRET, body, 1_700_000_000);
        assert!(verify_at(SECRET, body, &header, 1_700_000_000 + 200).is_ok());
    }

    #[test]
    fn test_garbage_header_rejected() {
        let err = verify_at(SECRET, b"payload", "not-a-signature", 0).unwrap_err();
        assert!(matches!(err, AppError::Verification(_)));
    }

    #[test]
    fn test_missing_v1_rejected() {
        let err = verify_at(SECRET, b"payload", "t=1700000000", 1_700_000_000).unwrap_err();
        assert!(matches!(err, AppError::Verification(_)));
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let err = verify_at(SECRET, b"payload", "t=1700000000,v1=zzzz", 1_700_000_000).unwrap_err();
        assert!(matches!(err, AppError::Verification(_)));
    }
}
