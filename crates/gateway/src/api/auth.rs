//! Channel-adapter request authentication.
//!
//! The adapter signs each request body with HMAC-SHA256 over the shared
//! secret and sends the hex digest in `X-Signature`. Verification is
//! constant-time. With no secret configured (dev mode) every request
//! passes.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify a request body signature. `None` secret = dev mode.
pub fn verify_signature(secret: Option<&[u8]>, body: &[u8], signature_hex: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    let Some(signature_hex) = signature_hex else {
        return false;
    };
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    expected.ct_eq(signature.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &[u8], body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_passes() {
        let secret = b"shared-secret";
        let body = b"{\"text\":\"hi\"}";
        let sig = sign(secret, body);
        assert!(verify_signature(Some(secret), body, Some(&sig)));
    }

    #[test]
    fn tampered_body_fails() {
        let secret = b"shared-secret";
        let sig = sign(secret, b"{\"text\":\"hi\"}");
        assert!(!verify_signature(Some(secret), b"{\"text\":\"bye\"}", Some(&sig)));
    }

    #[test]
    fn missing_signature_fails_when_secret_set() {
        assert!(!verify_signature(Some(b"s"), b"x", None));
    }

    #[test]
    fn dev_mode_passes_everything() {
        assert!(verify_signature(None, b"x", None));
    }
}
