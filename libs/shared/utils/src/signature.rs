use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_COMPARE_KEY: &[u8] = b"integration-token-compare";

/// Constant-time comparison of a webhook token against the configured secret.
/// Both sides are reduced to fixed-length HMAC tags so neither the content nor
/// the length of the secret leaks through timing.
pub fn tokens_match(provided: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }

    let expected_tag = match HmacSha256::new_from_slice(TOKEN_COMPARE_KEY) {
        Ok(mut mac) => {
            mac.update(expected.as_bytes());
            mac.finalize().into_bytes()
        }
        Err(_) => return false,
    };

    match HmacSha256::new_from_slice(TOKEN_COMPARE_KEY) {
        Ok(mut mac) => {
            mac.update(provided.as_bytes());
            mac.verify_slice(&expected_tag).is_ok()
        }
        Err(_) => false,
    }
}

/// SHA-256 hex digest of a JSON payload. `serde_json` keeps object keys
/// sorted, so equal payloads hash equally regardless of field order.
pub fn payload_hash(payload: &Value) -> String {
    let canonical = payload.to_string();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_comparison() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cret ", "s3cret"));
        assert!(!tokens_match("", "s3cret"));
        assert!(!tokens_match("anything", ""));
    }

    #[test]
    fn hash_ignores_key_order() {
        let a = json!({"start": "2024-05-01T09:00:00Z", "status": "free"});
        let b = json!({"status": "free", "start": "2024-05-01T09:00:00Z"});
        assert_eq!(payload_hash(&a), payload_hash(&b));
        assert_eq!(payload_hash(&a).len(), 64);
        assert_ne!(payload_hash(&a), payload_hash(&json!({"status": "booked"})));
    }
}
