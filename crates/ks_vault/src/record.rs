//! Keyring key records.
//!
//! A key record describes one key the user holds or references: the key
//! material (private half optional), a relay subscription token when the key
//! names a synced vault, and user-facing metadata. Records travel between
//! devices as sealed-box encrypted msgpack events on the keyring vault.

use serde::{Deserialize, Serialize};

use ks_crypto::{SigningKeyPair, Vid};

use crate::error::Error;

/// Conventional label marking a key that names a synced vault.
pub const LABEL_VAULT: &str = "vault";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Ed25519,
    X25519,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Ed25519 => "ed25519",
            KeyKind::X25519 => "x25519",
        }
    }

    pub fn parse(s: &str) -> Option<KeyKind> {
        match s {
            "ed25519" => Some(KeyKind::Ed25519),
            "x25519" => Some(KeyKind::X25519),
            _ => None,
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A keyring row. `id` is unique; a record with `deleted` set is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: Vid,

    #[serde(rename = "type")]
    pub kind: KeyKind,

    #[serde(with = "serde_bytes", default)]
    pub private: Option<Vec<u8>>,

    #[serde(rename = "pub", with = "serde_bytes", default)]
    pub public: Vec<u8>,

    #[serde(default)]
    pub token: String,

    #[serde(rename = "cts", default)]
    pub created_at: i64,

    #[serde(rename = "uts", default)]
    pub updated_at: i64,

    #[serde(default)]
    pub notes: String,

    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default)]
    pub email: Option<String>,

    /// Free-form extension data (application-defined).
    #[serde(default)]
    pub ext: Option<String>,

    #[serde(rename = "del", default)]
    pub deleted: bool,
}

impl KeyRecord {
    /// Record for an Ed25519 keypair we hold both halves of.
    pub fn from_signing_key(key: &SigningKeyPair, created_at: i64) -> Self {
        KeyRecord {
            id: key.vid(),
            kind: KeyKind::Ed25519,
            private: Some(key.secret_bytes().to_vec()),
            public: key.public_bytes().to_vec(),
            token: String::new(),
            created_at,
            updated_at: created_at,
            notes: String::new(),
            labels: Vec::new(),
            email: None,
            ext: None,
            deleted: false,
        }
    }

    /// Public-only record (a key we reference but cannot sign with).
    pub fn public_only(id: Vid, created_at: i64) -> Result<Self, Error> {
        let public = id.to_bytes()?.to_vec();
        Ok(KeyRecord {
            id,
            kind: KeyKind::Ed25519,
            private: None,
            public,
            token: String::new(),
            created_at,
            updated_at: created_at,
            notes: String::new(),
            labels: Vec::new(),
            email: None,
            ext: None,
            deleted: false,
        })
    }

    /// Record for an X25519 secret (encryption-only key).
    pub fn from_x25519_secret(secret: &x25519_dalek::StaticSecret, created_at: i64) -> Self {
        let public = x25519_dalek::PublicKey::from(secret);
        KeyRecord {
            id: Vid::from_public_bytes(public.as_bytes()),
            kind: KeyKind::X25519,
            private: Some(secret.to_bytes().to_vec()),
            public: public.as_bytes().to_vec(),
            token: String::new(),
            created_at,
            updated_at: created_at,
            notes: String::new(),
            labels: Vec::new(),
            email: None,
            ext: None,
            deleted: false,
        }
    }

    /// Tombstone marking `id` deleted.
    pub fn tombstone(id: Vid, updated_at: i64) -> Self {
        KeyRecord {
            id,
            kind: KeyKind::Ed25519,
            private: None,
            public: Vec::new(),
            token: String::new(),
            created_at: 0,
            updated_at,
            notes: String::new(),
            labels: Vec::new(),
            email: None,
            ext: None,
            deleted: true,
        }
    }

    pub fn with_labels<I: IntoIterator<Item = S>, S: Into<String>>(mut self, labels: I) -> Self {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = notes.to_string();
        self
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = token.to_string();
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Reconstruct the signing keypair; `NotFound` when the private half is
    /// absent or the record is not an Ed25519 key.
    pub fn signing_key(&self) -> Result<SigningKeyPair, Error> {
        if self.kind != KeyKind::Ed25519 {
            return Err(Error::NotFound(self.id.to_string()));
        }
        match &self.private {
            Some(private) => Ok(SigningKeyPair::from_bytes(private)?),
            None => Err(Error::NotFound(self.id.to_string())),
        }
    }
}
