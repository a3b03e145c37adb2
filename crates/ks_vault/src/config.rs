//! Key/value config inside the vault database.
//!
//! The client key — the Ed25519 key whose vault id names this user's keyring
//! — is stored here once at setup, msgpack-encoded and base64-wrapped, under
//! a well-known name.

use base64::{engine::general_purpose::STANDARD, Engine};
use sqlx::{Row, SqlitePool};

use crate::error::Error;
use crate::record::KeyRecord;

/// Well-known config name for the client key record.
pub const CLIENT_KEY: &str = "client_key";

pub(crate) async fn set_config(pool: &SqlitePool, key: &str, value: &str) -> Result<(), Error> {
    sqlx::query("INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

pub(crate) async fn get_config(pool: &SqlitePool, key: &str) -> Result<Option<String>, Error> {
    let row = sqlx::query("SELECT value FROM config WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("value")))
}

pub(crate) async fn set_config_bytes(pool: &SqlitePool, key: &str, b: &[u8]) -> Result<(), Error> {
    if b.is_empty() {
        return set_config(pool, key, "").await;
    }
    set_config(pool, key, &STANDARD.encode(b)).await
}

pub(crate) async fn get_config_bytes(pool: &SqlitePool, key: &str) -> Result<Option<Vec<u8>>, Error> {
    match get_config(pool, key).await? {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => Ok(Some(STANDARD.decode(s).map_err(ks_crypto::CryptoError::from)?)),
    }
}

pub(crate) async fn set_client_key(pool: &SqlitePool, key: &KeyRecord) -> Result<(), Error> {
    let b = rmp_serde::to_vec_named(key).map_err(Error::encode)?;
    set_config_bytes(pool, CLIENT_KEY, &b).await
}

pub(crate) async fn client_key(pool: &SqlitePool) -> Result<Option<KeyRecord>, Error> {
    match get_config_bytes(pool, CLIENT_KEY).await? {
        None => Ok(None),
        Some(b) => Ok(Some(rmp_serde::from_slice(&b).map_err(Error::encode)?)),
    }
}
