//! Webhook signature verification.
//!
//! Providers sign each delivery with an HMAC-SHA256 over the raw request
//! body, sent as a lowercase hex digest in the `X-Signature` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Verify a webhook delivery signature.
///
/// The digest is computed over the exact body bytes as received, before any
/// structural parsing. A missing or empty signature is itself the negative
/// result; nothing here panics or performs I/O.
///
/// # Arguments
///
/// * `secret` - The shared webhook signing secret
/// * `raw_body` - The request body bytes, verbatim
/// * `provided` - The `X-Signature` header value, if the header was present
///
/// # Returns
///
/// `true` if the signature matches the body under the secret, `false`
/// otherwise.
pub fn verify_webhook_signature(secret: &str, raw_body: &[u8], provided: Option<&str>) -> bool {
    let provided = match provided {
        Some(s) if !s.is_empty() => s,
        _ => {
            warn!("webhook_signature_missing");
            return false;
        }
    };

    if secret.is_empty() {
        warn!("webhook_secret_empty");
        return false;
    }

    // Compute expected signature: HMAC-SHA256(secret, raw_body)
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("webhook_signature_invalid_key");
            return false;
        }
    };

    mac.update(raw_body);

    let expected_signature = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison to prevent timing attacks
    let valid = constant_time_compare(&expected_signature, provided);

    if !valid {
        warn!(
            expected_length = expected_signature.len(),
            actual_length = provided.len(),
            "webhook_signature_mismatch"
        );
    }

    valid
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
