//! Anonymous public-key sealed box
//!
//! Encrypts to an X25519 public key so that only the holder of the matching
//! secret can open it; the sender is not identified (a fresh ephemeral
//! keypair is used per message and discarded).
//!
//! Wire format:
//!   [ ephemeral_pk (32 bytes) | nonce (24 bytes) | ciphertext + tag ]

use crypto_box::{
    aead::Aead,
    Nonce, PublicKey, SalsaBox, SecretKey,
};
use rand::RngCore;

use crate::error::CryptoError;

const EPHEMERAL_LEN: usize = 32;
const NONCE_LEN: usize = 24;

/// Seal `plaintext` to `recipient`.
pub fn seal(recipient: &x25519_dalek::PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral_sk = SecretKey::generate(&mut rand::rngs::OsRng);
    let ephemeral_pk = ephemeral_sk.public_key();

    let recipient_pk = PublicKey::from(*recipient.as_bytes());
    let salsa_box = SalsaBox::new(&recipient_pk, &ephemeral_sk);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = salsa_box
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CryptoError::SealFailed)?;

    let mut out = Vec::with_capacity(EPHEMERAL_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(ephemeral_pk.as_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open sealed bytes with the recipient's X25519 secret.
pub fn open(recipient: &x25519_dalek::StaticSecret, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < EPHEMERAL_LEN + NONCE_LEN {
        return Err(CryptoError::OpenFailed);
    }
    let (ephemeral_bytes, rest) = data.split_at(EPHEMERAL_LEN);
    let (nonce_bytes, ct) = rest.split_at(NONCE_LEN);

    let ephemeral_pk = PublicKey::from(
        <[u8; 32]>::try_from(ephemeral_bytes).map_err(|_| CryptoError::OpenFailed)?,
    );
    let recipient_sk = SecretKey::from(recipient.to_bytes());
    let salsa_box = SalsaBox::new(&ephemeral_pk, &recipient_sk);

    salsa_box
        .decrypt(Nonce::from_slice(nonce_bytes), ct)
        .map_err(|_| CryptoError::OpenFailed)
}
