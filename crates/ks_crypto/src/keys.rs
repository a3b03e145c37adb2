//! Signing keys and vault identifiers.
//!
//! Each vault is addressed by the public half of an Ed25519 keypair — the
//! vault id (`Vid`), base64url-encoded on the wire and in SQL. The same
//! keypair signs relay requests, and its X25519 conversion receives
//! sealed-box encrypted events.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

// ── Vault id ──────────────────────────────────────────────────────────────────

/// 32-byte Ed25519 public key identifying a vault, base64url-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vid(String);

impl Vid {
    pub fn from_public_bytes(bytes: &[u8; 32]) -> Self {
        Vid(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "Vault id must decode to 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Vid(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<[u8; 32], CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(&self.0)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Vault id not 32 bytes".into()))
    }

    /// X25519 public key for sealed-box encryption to this vault id.
    pub fn to_x25519_public(&self) -> Result<X25519Public, CryptoError> {
        ed25519_pub_to_x25519(&self.to_bytes()?)
    }
}

impl std::fmt::Display for Vid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Vid {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vid::parse(s)
    }
}

// ── Signing keypair ───────────────────────────────────────────────────────────

/// Ed25519 keypair for a vault (or the client key). Drop clears the secret.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SigningKeyPair {
    secret_bytes: [u8; 32],
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { secret_bytes: signing_key.to_bytes() }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self { secret_bytes: *seed }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("Signing key must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self { secret_bytes: arr })
    }

    /// Seed used by some tests; 0x01 repeated, 0x02 repeated etc.
    pub fn from_seed_byte(b: u8) -> Self {
        Self::from_seed(&[b; 32])
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.secret_bytes)
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing_key().verifying_key().to_bytes()
    }

    pub fn vid(&self) -> Vid {
        Vid::from_public_bytes(&self.public_bytes())
    }

    /// Sign arbitrary bytes; returns the raw 64-byte Ed25519 signature.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.signing_key().sign(msg).to_bytes().to_vec()
    }

    /// Verify a signature made by any Ed25519 public key.
    pub fn verify(public_bytes: &[u8], msg: &[u8], sig_bytes: &[u8]) -> Result<(), CryptoError> {
        let vk = VerifyingKey::from_bytes(
            public_bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("Bad pubkey len".into()))?,
        )
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig = Signature::from_bytes(
            sig_bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("Bad sig len".into()))?,
        );
        vk.verify(msg, &sig)
            .map_err(|_| CryptoError::SignatureVerification)
    }

    /// X25519 secret for opening sealed boxes addressed to this key.
    pub fn to_x25519_secret(&self) -> StaticSecret {
        ed25519_secret_to_x25519(&self.secret_bytes)
    }

    /// X25519 public half of this key.
    pub fn to_x25519_public(&self) -> Result<X25519Public, CryptoError> {
        ed25519_pub_to_x25519(&self.public_bytes())
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair").field("vid", &self.vid()).finish()
    }
}

// ── Ed25519 → X25519 conversion ───────────────────────────────────────────────

/// Convert an Ed25519 signing key (32 bytes) to an X25519 static secret.
/// This uses the clamped SHA-512 expansion that ed25519-dalek uses internally.
pub fn ed25519_secret_to_x25519(ed_secret: &[u8; 32]) -> StaticSecret {
    use sha2::{Digest, Sha512};
    let mut h = Sha512::digest(ed_secret);
    // Clamp as per RFC 7748 §5
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut key = [0u8; 32];
    key.copy_from_slice(&h[..32]);
    h.as_mut_slice().zeroize();
    StaticSecret::from(key)
}

/// Convert an Ed25519 verifying key (public, 32 bytes) to an X25519 public key.
/// Uses the birational map from the Ed25519 curve to Curve25519.
pub fn ed25519_pub_to_x25519(ed_pub: &[u8; 32]) -> Result<X25519Public, CryptoError> {
    use curve25519_dalek::edwards::CompressedEdwardsY;
    let compressed = CompressedEdwardsY::from_slice(ed_pub)
        .map_err(|_| CryptoError::InvalidKey("invalid Ed25519 public key".into()))?;
    let point = compressed
        .decompress()
        .ok_or_else(|| CryptoError::InvalidKey("Ed25519 public key decompression failed".into()))?;
    Ok(X25519Public::from(point.to_montgomery().to_bytes()))
}
