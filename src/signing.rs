//! Request signatures for the provider and the gateway, and webhook verification.
//!
//! Both upstreams authenticate with an MD5 digest over a fixed concatenation of fields
//! and the shared secret. The concatenation order differs per call and must be
//! reproduced byte for byte.

use bigdecimal::BigDecimal;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

fn md5_hex(parts: &[&str]) -> String {
    format!("{:x}", md5::compute(parts.concat()))
}

/// `md5(username + api_key + ref_id)`
pub fn provider_sign(username: &str, api_key: &str, ref_id: &str) -> String {
    md5_hex(&[username, api_key, ref_id])
}

/// `md5(merchantCode + merchantOrderId + paymentAmount + apiKey)`
pub fn gateway_request_signature(merchant_code: &str, merchant_order_id: &str, amount: &str, api_key: &str) -> String {
    md5_hex(&[merchant_code, merchant_order_id, amount, api_key])
}

/// `md5(merchantCode + amount + merchantOrderId + apiKey)`
pub fn gateway_callback_signature(merchant_code: &str, amount: &str, merchant_order_id: &str, api_key: &str) -> String {
    md5_hex(&[merchant_code, amount, merchant_order_id, api_key])
}

/// `md5(merchantCode + merchantOrderId + apiKey)`
pub fn gateway_status_signature(merchant_code: &str, merchant_order_id: &str, api_key: &str) -> String {
    md5_hex(&[merchant_code, merchant_order_id, api_key])
}

/// Compares two hex digests without short-circuiting on the first difference.
pub fn digest_eq(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.trim().as_bytes();
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .iter()
        .zip(provided)
        .fold(0u8, |acc, (a, b)| acc | (a.to_ascii_lowercase() ^ b.to_ascii_lowercase()))
        == 0
}

/// Whole-unit amount string as the upstreams expect it (`10000`, never `10000.00`).
pub fn format_amount(amount: &BigDecimal) -> String {
    amount.with_scale(0).to_string()
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid signature format")]
    InvalidFormat,
    #[error("Invalid webhook secret configuration")]
    InvalidSecret,
    #[error("Signature verification failed")]
    Mismatch,
}

/// Verifies an `X-Hub-Signature` style header (`sha256=<hex>` or bare hex) against
/// the raw request body using HMAC-SHA256 and a constant-time comparison.
pub fn verify_hub_signature(secret: &str, body: &[u8], header: &str) -> Result<(), SignatureError> {
    let hex_part = header.trim().strip_prefix("sha256=").unwrap_or(header.trim());
    let expected = hex::decode(hex_part).map_err(|_| SignatureError::InvalidFormat)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

/// Produces the header value [`verify_hub_signature`] accepts.
pub fn hub_signature(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_sign_is_md5_of_concatenation() {
        // md5("userkeyref")
        assert_eq!(
            provider_sign("user", "key", "ref"),
            format!("{:x}", md5::compute("userkeyref"))
        );
        assert_eq!(provider_sign("a", "b", "c").len(), 32);
    }

    #[test]
    fn test_provider_sign_is_deterministic() {
        assert_eq!(
            provider_sign("vazz", "secret", "VAZZ123"),
            provider_sign("vazz", "secret", "VAZZ123")
        );
        assert_ne!(
            provider_sign("vazz", "secret", "VAZZ123"),
            provider_sign("vazz", "secret", "VAZZ124")
        );
    }

    #[test]
    fn test_gateway_field_order_matters() {
        let request = gateway_request_signature("D1", "VAZZ1", "10000", "k");
        let callback = gateway_callback_signature("D1", "10000", "VAZZ1", "k");
        assert_ne!(request, callback);
        assert_eq!(callback, format!("{:x}", md5::compute("D110000VAZZ1k")));
    }

    #[test]
    fn test_digest_eq_ignores_case() {
        let sig = gateway_status_signature("D1", "VAZZ1", "k");
        assert!(digest_eq(&sig, &sig.to_uppercase()));
        assert!(!digest_eq(&sig, "deadbeef"));
    }

    #[test]
    fn test_format_amount_drops_fraction() {
        let amount: BigDecimal = "10000.00".parse().unwrap();
        assert_eq!(format_amount(&amount), "10000");
    }

    #[test]
    fn test_hub_signature_roundtrip_and_mismatch() {
        let body = br#"{"data":{"ref_id":"VAZZ1","status":"Sukses"}}"#;
        let header = hub_signature("webhook-secret", body).unwrap();
        assert!(verify_hub_signature("webhook-secret", body, &header).is_ok());
        assert_eq!(
            verify_hub_signature("other-secret", body, &header),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_hub_signature("webhook-secret", body, "sha256=zz"),
            Err(SignatureError::InvalidFormat)
        );
    }
}
