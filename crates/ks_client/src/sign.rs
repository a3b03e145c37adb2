//! Request signatures.
//!
//! Every vault-scoped relay request carries an Ed25519 signature proving
//! possession of the vault key (or the account key, for registration). The
//! signature covers the canonical string
//!
//!   `{METHOD},{URL},{timestamp-ms},{blake3-hex(body)}`
//!
//! and is sent base64url-encoded together with the signer's vault id:
//!
//!   Authorization: Keysync <vid>:<signature>
//!   X-Keysync-Timestamp: <timestamp-ms>
//!   X-Keysync-Hash: <blake3-hex(body)>

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use ks_crypto::{CryptoError, SigningKeyPair};

pub const AUTH_HEADER: &str = "Authorization";
pub const TIMESTAMP_HEADER: &str = "X-Keysync-Timestamp";
pub const HASH_HEADER: &str = "X-Keysync-Hash";

/// Signed header values for one request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub authorization: String,
    pub timestamp: String,
    pub content_hash: String,
}

/// Hex BLAKE3 of the request body (empty body hashes the empty string).
pub fn content_hash(body: &[u8]) -> String {
    blake3::hash(body).to_hex().to_string()
}

/// Build the canonical string covered by the signature.
fn canonical(method: &str, url: &str, timestamp_millis: i64, hash: &str) -> String {
    format!("{},{},{},{}", method.to_uppercase(), url, timestamp_millis, hash)
}

/// Sign a request with `key`.
pub fn sign_request(
    key: &SigningKeyPair,
    method: &str,
    url: &str,
    timestamp_millis: i64,
    body: &[u8],
) -> SignedHeaders {
    let hash = content_hash(body);
    let sig = key.sign(canonical(method, url, timestamp_millis, &hash).as_bytes());
    SignedHeaders {
        authorization: format!("Keysync {}:{}", key.vid(), URL_SAFE_NO_PAD.encode(sig)),
        timestamp: timestamp_millis.to_string(),
        content_hash: hash,
    }
}

/// Verify a signature header against the request it claims to cover.
/// Used by test doubles; the production relay does its own verification.
pub fn verify_request(
    authorization: &str,
    method: &str,
    url: &str,
    timestamp_millis: i64,
    body: &[u8],
) -> Result<ks_crypto::Vid, CryptoError> {
    let rest = authorization
        .strip_prefix("Keysync ")
        .ok_or_else(|| CryptoError::InvalidKey("bad authorization scheme".into()))?;
    let (vid_str, sig_b64) = rest
        .split_once(':')
        .ok_or_else(|| CryptoError::InvalidKey("bad authorization format".into()))?;
    let vid = ks_crypto::Vid::parse(vid_str)?;
    let sig = URL_SAFE_NO_PAD.decode(sig_b64)?;
    let hash = content_hash(body);
    let msg = canonical(method, url, timestamp_millis, &hash);
    SigningKeyPair::verify(&vid.to_bytes()?, msg.as_bytes(), &sig)?;
    Ok(vid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let key = SigningKeyPair::generate();
        let headers = sign_request(&key, "post", "https://relay/vault/abc/events", 1000, b"body");
        let vid =
            verify_request(&headers.authorization, "POST", "https://relay/vault/abc/events", 1000, b"body")
                .unwrap();
        assert_eq!(vid, key.vid());
    }

    #[test]
    fn verify_rejects_replayed_url() {
        let key = SigningKeyPair::generate();
        let headers = sign_request(&key, "POST", "https://relay/vault/abc/events", 1000, b"body");
        assert!(verify_request(&headers.authorization, "POST", "https://relay/vault/xyz/events", 1000, b"body")
            .is_err());
    }

    #[test]
    fn verify_rejects_modified_body() {
        let key = SigningKeyPair::generate();
        let headers = sign_request(&key, "POST", "https://relay/v", 1000, b"body");
        assert!(verify_request(&headers.authorization, "POST", "https://relay/v", 1000, b"evil").is_err());
    }
}
