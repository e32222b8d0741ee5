//! Webhook signature handling
//!
//! GitHub signs every delivery with HMAC-SHA256 over the raw body and sends
//! the result as `X-Hub-Signature-256: sha256=<hex>`.

use crate::{Result, WebhookError};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Webhook signer, the sending side of [`WebhookVerifier`]
pub struct WebhookSigner {
    secret: Secret<Vec<u8>>,
}

impl WebhookSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Secret::new(secret.as_bytes().to_vec()),
        }
    }

    /// Signature header value for a payload
    pub fn sign(&self, payload: &[u8]) -> String {
        let mac = compute_mac(self.secret.expose_secret(), payload);
        format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
    }
}

/// Webhook verifier for validating signatures
pub struct WebhookVerifier {
    secret: Secret<Vec<u8>>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Secret::new(secret.as_bytes().to_vec()),
        }
    }

    /// Verify a signature header against the raw payload.
    ///
    /// Every failure mode (bad prefix, bad hex, wrong digest) yields the same
    /// error, and the digest comparison runs in constant time.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        let expected = signature_header
            .trim()
            .strip_prefix(SIGNATURE_PREFIX)
            .and_then(|hex_sig| hex::decode(hex_sig).ok())
            .ok_or(WebhookError::SignatureVerificationFailed)?;

        compute_mac(self.secret.expose_secret(), payload)
            .verify_slice(&expected)
            .map_err(|_| WebhookError::SignatureVerificationFailed)
    }
}

impl From<&Secret<String>> for WebhookVerifier {
    fn from(secret: &Secret<String>) -> Self {
        Self::new(secret.expose_secret())
    }
}

fn compute_mac(secret: &[u8], payload: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so this never fails.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC can take a key of any size"),
    };
    mac.update(payload);
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = WebhookSigner::new("test-secret-key");
        let verifier = WebhookVerifier::new("test-secret-key");

        let payload = br#"{"action":"opened"}"#;
        let signature = signer.sign(payload);

        assert!(signature.starts_with("sha256="));
        assert!(verifier.verify(payload, &signature).is_ok());
    }

    #[test]
    fn test_known_vector() {
        // Example from GitHub's webhook validation docs
        let verifier = WebhookVerifier::new("It's a Secret to Everybody");
        let signature =
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";

        assert!(verifier.verify(b"Hello, World!", signature).is_ok());
    }

    #[test]
    fn test_wrong_secret() {
        let signer = WebhookSigner::new("secret-1");
        let verifier = WebhookVerifier::new("secret-2");

        let payload = b"test payload";
        let signature = signer.sign(payload);

        assert!(matches!(
            verifier.verify(payload, &signature),
            Err(WebhookError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_modified_payload() {
        let signer = WebhookSigner::new("test-secret");
        let verifier = WebhookVerifier::new("test-secret");

        let signature = signer.sign(b"original payload");

        assert!(verifier.verify(b"modified payload", &signature).is_err());
    }

    #[test]
    fn test_malformed_headers() {
        let verifier = WebhookVerifier::new("test-secret");

        for header in ["", "sha256=", "sha256=zz", "sha1=abcd", "abcd1234"] {
            assert!(
                matches!(
                    verifier.verify(b"payload", header),
                    Err(WebhookError::SignatureVerificationFailed)
                ),
                "header {:?} should be rejected",
                header
            );
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let verifier = WebhookVerifier::new("hunter2");
        assert!(!format!("{:?}", verifier).contains("hunter2"));
    }
}
