//! The auth database.
//!
//! Plain (unencrypted) SQLite file; only the wrapped master keys inside are
//! sealed. Two tables: `auth` for the records, `config` for small key/value
//! settings.

use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::Row;
use tracing::debug;

use ks_crypto::{secretbox, Clock, SystemClock};

use crate::error::AuthError;
use crate::record::{Auth, MasterKey, Method};

pub struct AuthStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl AuthStore {
    /// Open (or create) the auth database at `path`.
    pub async fn open(path: &Path) -> Result<Self, AuthError> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePool::connect_with(opts).await?;
        let store = Self { pool, clock: Arc::new(SystemClock) };
        store.init_tables().await?;
        Ok(store)
    }

    /// Replace the clock (tests use a deterministic one).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    async fn init_tables(&self) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth (
                id TEXT NOT NULL PRIMARY KEY,
                ek BLOB NOT NULL,
                type TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                salt BLOB,
                aaguid TEXT,
                no_pin INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Add or replace an auth record.
    pub async fn set(&self, auth: &Auth) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO auth (id, ek, type, created_at, salt, aaguid, no_pin)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&auth.id)
        .bind(&auth.wrapped_mk)
        .bind(auth.method.as_str())
        .bind(auth.created_at)
        .bind(&auth.salt)
        .bind(&auth.aaguid)
        .bind(auth.no_pin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete an auth record. Returns whether a record existed.
    pub async fn delete(&self, id: &str) -> Result<bool, AuthError> {
        let res = sqlx::query("DELETE FROM auth WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn list(&self) -> Result<Vec<Auth>, AuthError> {
        let rows = sqlx::query("SELECT id, ek, type, created_at, salt, aaguid, no_pin FROM auth")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_auth).collect()
    }

    pub async fn list_by_method(&self, method: Method) -> Result<Vec<Auth>, AuthError> {
        let rows = sqlx::query(
            "SELECT id, ek, type, created_at, salt, aaguid, no_pin FROM auth WHERE type = ?",
        )
        .bind(method.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_auth).collect()
    }

    /// Try to unwrap the master key in `auth` with a candidate method key.
    pub(crate) fn unwrap_mk(&self, auth: &Auth, key: &[u8; 32]) -> Option<MasterKey> {
        match secretbox::unwrap_key(key, &auth.wrapped_mk) {
            Ok(mk) => Some(MasterKey::from_bytes(mk)),
            Err(_) => {
                debug!(id = %auth.id, "auth record did not unwrap");
                None
            }
        }
    }
}

fn row_to_auth(row: &sqlx::sqlite::SqliteRow) -> Result<Auth, AuthError> {
    let type_str: String = row.get("type");
    let method = Method::parse(&type_str)
        .ok_or_else(|| AuthError::Plugin(format!("unknown auth type {type_str:?}")))?;
    Ok(Auth {
        id: row.get("id"),
        wrapped_mk: row.get("ek"),
        method,
        created_at: row.get("created_at"),
        salt: row.get("salt"),
        aaguid: row.get("aaguid"),
        no_pin: row.get("no_pin"),
    })
}
