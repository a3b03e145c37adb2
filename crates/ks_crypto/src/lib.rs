//! ks_crypto — Keysync cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - All public APIs return opaque newtypes to prevent accidental misuse.
//!
//! # Module layout
//! - `keys`      — Ed25519 signing keypairs, vault ids, X25519 conversion
//! - `secretbox` — XChaCha20-Poly1305 symmetric sealed box (32-byte key)
//! - `sealedbox` — anonymous public-key sealed box to an X25519 public key
//! - `kdf`       — Argon2id password KDF + HKDF-SHA256
//! - `paperkey`  — BIP-39 paper-key phrase encoding of a 32-byte key
//! - `clock`     — injectable millisecond clock
//! - `error`     — unified error type

pub mod clock;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod paperkey;
pub mod sealedbox;
pub mod secretbox;

pub use clock::{Clock, SystemClock, TestClock};
pub use error::CryptoError;
pub use keys::{SigningKeyPair, Vid};

/// 32 random bytes from the OS RNG.
pub fn rand_32() -> [u8; 32] {
    use rand::RngCore;
    let mut b = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut b);
    b
}

/// Random identifier: base64url (no padding) of 32 random bytes.
pub fn rand_id() -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(rand_32())
}
