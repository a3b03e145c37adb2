//! Write-side cipher choice.
//!
//! The sync engine moves opaque bytes; whether an event is encrypted is
//! decided where it is enqueued. `Sealed` seals to the vault key's own
//! X25519 public, so any device holding the vault key can open it.

use ks_crypto::{sealedbox, SigningKeyPair};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    /// Store the bytes as-is.
    None,
    /// Anonymous sealed box to the vault key's X25519 public.
    Sealed,
}

impl Cipher {
    pub fn encrypt(&self, data: &[u8], key: &SigningKeyPair) -> Result<Vec<u8>, Error> {
        match self {
            Cipher::None => Ok(data.to_vec()),
            Cipher::Sealed => Ok(sealedbox::seal(&key.to_x25519_public()?, data)?),
        }
    }

    pub fn decrypt(&self, data: &[u8], key: &SigningKeyPair) -> Result<Vec<u8>, Error> {
        match self {
            Cipher::None => Ok(data.to_vec()),
            Cipher::Sealed => Ok(sealedbox::open(&key.to_x25519_secret(), data)?),
        }
    }
}
