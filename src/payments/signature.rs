//! Webhook signature primitives
//!
//! Two HMAC flavors cover the four providers: SHA-256 over the raw request
//! body (card processor, Gulf gateway, PayPal transmission sig) and SHA-512
//! over a provider-defined canonical string (regional gateway). Digests are
//! hex-encoded and compared in constant time.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Hex HMAC-SHA256 of `message` under `secret`
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Hex HMAC-SHA512 of `message` under `secret`
pub fn hmac_sha512_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha512::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time equality over the hex digests.
///
/// XOR-fold over the bytes so the comparison cost does not depend on where
/// the first mismatch occurs.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.trim();
    let b = b.trim();
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Verify a raw-body HMAC-SHA256 signature header
pub fn verify_sha256(secret: &[u8], body: &[u8], provided: &str) -> bool {
    constant_time_eq(&hmac_sha256_hex(secret, body), provided)
}

/// Verify an HMAC-SHA512 signature over a pre-built canonical string
pub fn verify_sha512(secret: &[u8], canonical: &[u8], provided: &str) -> bool {
    constant_time_eq(&hmac_sha512_hex(secret, canonical), provided)
}

/// SHA-256 hash of a payload, for logging rejected webhooks without ever
/// logging the body itself
pub fn payload_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_verifies_own_digest() {
        let secret = b"whsec_test";
        let body = br#"{"event":"charge.succeeded"}"#;
        let sig = hmac_sha256_hex(secret, body);
        assert!(verify_sha256(secret, body, &sig));
    }

    #[test]
    fn sha256_rejects_tampered_body() {
        let secret = b"whsec_test";
        let sig = hmac_sha256_hex(secret, b"original");
        assert!(!verify_sha256(secret, b"tampered", &sig));
    }

    #[test]
    fn sha512_rejects_wrong_secret() {
        let canonical = b"1000USDtrue42";
        let sig = hmac_sha512_hex(b"secret-a", canonical);
        assert!(!verify_sha512(b"secret-b", canonical, &sig));
    }

    #[test]
    fn sha512_is_order_sensitive() {
        let secret = b"hmac_key";
        let sig = hmac_sha512_hex(secret, b"1000USD");
        assert!(!verify_sha512(secret, b"USD1000", &sig));
    }

    #[test]
    fn comparison_handles_length_mismatch_and_whitespace() {
        assert!(!constant_time_eq("abcd", "abc"));
        assert!(constant_time_eq("abcd ", " abcd"));
    }

    #[test]
    fn payload_hash_is_stable() {
        assert_eq!(payload_hash(b"x"), payload_hash(b"x"));
        assert_ne!(payload_hash(b"x"), payload_hash(b"y"));
    }
}
