use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Generate a random opaque token (32 bytes, hex-encoded).
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let token_bytes: [u8; 32] = rng.gen();
    hex::encode(token_bytes)
}

/// Generate a random numeric one-time code.
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| rng.gen_range(0..10).to_string())
        .collect()
}

/// Hash a short-lived code for storage. Only the hash is ever persisted.
pub fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Stable storage id for the per-email auth record: SHA-256 of the
/// normalized (trimmed, lowercased) address.
pub fn email_id(email: &str) -> String {
    hex::encode(Sha256::digest(email.trim().to_lowercase().as_bytes()))
}

/// Constant-time equality for short secrets (codes, proofs).
pub fn secrets_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Generate an HMAC-SHA256 request signature.
///
/// Format: HMAC-SHA256(session_id|timestamp, session_key)
pub fn generate_request_signature(
    key: &[u8],
    session_id: &Uuid,
    timestamp: i64,
) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    let payload = format!("{}|{}", session_id, timestamp);
    mac.update(payload.as_bytes());
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}

/// Verify an HMAC-SHA256 request signature using constant-time comparison.
pub fn verify_request_signature(
    key: &[u8],
    session_id: &Uuid,
    timestamp: i64,
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected = generate_request_signature(key, session_id, timestamp)?;
    Ok(secrets_equal(expected.as_bytes(), signature.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_generation_and_verification() {
        let key = b"per-session signing key";
        let session_id = Uuid::new_v4();
        let timestamp = 1678886400000;

        let signature = generate_request_signature(key, &session_id, timestamp).unwrap();
        assert!(!signature.is_empty());

        let is_valid =
            verify_request_signature(key, &session_id, timestamp, &signature).unwrap();
        assert!(is_valid);
    }

    #[test]
    fn test_invalid_signature() {
        let key = b"per-session signing key";
        let session_id = Uuid::new_v4();
        let timestamp = 1678886400000;

        let signature = generate_request_signature(key, &session_id, timestamp).unwrap();
        let invalid_signature = format!("a{}", &signature[1..]);

        let is_valid =
            verify_request_signature(key, &session_id, timestamp, &invalid_signature).unwrap();
        assert!(!is_valid);
    }

    #[test]
    fn test_tampered_timestamp() {
        let key = b"per-session signing key";
        let session_id = Uuid::new_v4();

        let signature = generate_request_signature(key, &session_id, 1678886400000).unwrap();
        let is_valid =
            verify_request_signature(key, &session_id, 1678886400001, &signature).unwrap();
        assert!(!is_valid);
    }

    #[test]
    fn test_email_id_normalizes() {
        assert_eq!(email_id(" Alice@X.com "), email_id("alice@x.com"));
        assert_ne!(email_id("alice@x.com"), email_id("bob@x.com"));
    }
}
