//! GitHub webhook signature verification.
//!
//! GitHub signs each delivery with HMAC-SHA256 over the raw request body and
//! sends the result as `X-Hub-Signature-256: sha256=<hex digest>`.
//! Reference: https://docs.github.com/en/webhooks/using-webhooks/validating-webhook-deliveries

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the `X-Hub-Signature-256` header value for `body`.
pub fn compute_github_signature(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a GitHub webhook signature.
///
/// # Arguments
///
/// * `secret` - The webhook secret configured on the repository hook
/// * `body` - The raw request body, exactly as received
/// * `signature` - The `X-Hub-Signature-256` header value
///
/// # Returns
///
/// `true` only if both secret and signature are present and the signature
/// matches. A missing or blank secret rejects every delivery. The secret is
/// used as the HMAC key byte for byte.
pub fn verify_github_signature(secret: Option<&str>, body: &[u8], signature: Option<&str>) -> bool {
    let secret = secret.unwrap_or_default();
    let signature = signature.map(str::trim).unwrap_or_default();
    let has_secret = !secret.trim().is_empty();

    if !has_secret || signature.is_empty() {
        warn!(
            has_secret = has_secret,
            has_signature = !signature.is_empty(),
            "github_signature_missing_fields"
        );
        return false;
    }

    let Some(expected) = compute_github_signature(secret, body) else {
        warn!("github_signature_invalid_key");
        return false;
    };

    let valid = constant_time_compare(&expected, signature);

    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = signature.len(),
            "github_signature_mismatch"
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

/// Check if a usable webhook secret is configured.
pub fn is_signature_verification_enabled(secret: &Option<String>) -> bool {
    secret
        .as_ref()
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"repository":{"name":"test-repo"},"action":"opened"}"#;

    #[test]
    fn test_verify_signature_missing_fields() {
        let signature = compute_github_signature("secret", BODY).unwrap();
        assert!(!verify_github_signature(None, BODY, Some(&signature)));
        assert!(!verify_github_signature(Some(""), BODY, Some(&signature)));
        assert!(!verify_github_signature(Some("   "), BODY, Some(&signature)));
        assert!(!verify_github_signature(Some("secret"), BODY, None));
        assert!(!verify_github_signature(Some("secret"), BODY, Some("")));
    }

    #[test]
    fn test_verify_signature_fixed_delivery() {
        let signature = compute_github_signature("test-secret", BODY).unwrap();
        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), "sha256=".len() + 64);

        assert!(verify_github_signature(Some("test-secret"), BODY, Some(&signature)));
        assert!(!verify_github_signature(Some("test-secret"), BODY, Some("sha256=invalid")));
        assert!(!verify_github_signature(Some("other-secret"), BODY, Some(&signature)));
    }

    #[test]
    fn test_verify_signature_keeps_secret_whitespace() {
        let padded = " test-secret\n";
        let signature = compute_github_signature(padded, BODY).unwrap();

        assert!(verify_github_signature(Some(padded), BODY, Some(&signature)));
        assert!(!verify_github_signature(Some("test-secret"), BODY, Some(&signature)));

        let trimmed = compute_github_signature("test-secret", BODY).unwrap();
        assert!(!verify_github_signature(Some(padded), BODY, Some(&trimmed)));
        assert!(verify_github_signature(Some("test-secret"), BODY, Some(&format!(" {} ", trimmed))));
    }

    #[test]
    fn test_verify_signature_rejects_any_bit_flip() {
        let signature = compute_github_signature("test-secret", BODY).unwrap();

        for index in 0..signature.len() {
            for bit in 0..8 {
                let mut bytes = signature.clone().into_bytes();
                bytes[index] ^= 1 << bit;
                let flipped = String::from_utf8_lossy(&bytes).into_owned();
                assert!(
                    !verify_github_signature(Some("test-secret"), BODY, Some(&flipped)),
                    "flip at byte {} bit {} accepted",
                    index,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_verify_signature_arbitrary_bodies() {
        for body in [&b""[..], b"x", b"\x00\xff binary", "héllo wörld".as_bytes()] {
            let signature = compute_github_signature("k3y", body).unwrap();
            assert!(verify_github_signature(Some("k3y"), body, Some(&signature)));
        }
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_is_signature_verification_enabled() {
        assert!(!is_signature_verification_enabled(&None));
        assert!(!is_signature_verification_enabled(&Some("".to_string())));
        assert!(!is_signature_verification_enabled(&Some("   ".to_string())));
        assert!(is_signature_verification_enabled(&Some("key123".to_string())));
    }
}
