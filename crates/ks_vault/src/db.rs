//! Opening the encrypted vault database.
//!
//! The database is page-encrypted with the master key as the SQLCipher raw
//! key (hex-encoded, 4 KiB cipher pages). The key pragma must be the first
//! statement on every new connection, so it is configured at connect time.
//! With a wrong key the file is unreadable and the first real statement
//! fails, which is how a bad master key surfaces.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use ks_auth::MasterKey;

use crate::error::Error;

/// Open (or create) the encrypted database at `path`.
/// A single connection: the open database handle is owned by the vault and
/// released exactly once on lock.
pub(crate) async fn open_db(path: &Path, mk: &MasterKey) -> Result<SqlitePool, Error> {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .pragma("key", format!("\"x'{}'\"", hex::encode(mk.as_bytes())))
        .pragma("cipher_page_size", "4096")
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

/// Create the vault tables. Fails on a database opened with the wrong key.
pub(crate) async fn init_tables(pool: &SqlitePool) -> Result<(), Error> {
    debug!("initializing tables...");
    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS keys (
            id TEXT PRIMARY KEY NOT NULL,
            type TEXT NOT NULL,
            private BLOB,
            public BLOB,
            token TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL DEFAULT 0,
            notes TEXT NOT NULL DEFAULT '',
            labels TEXT NOT NULL DEFAULT '',
            email TEXT,
            ext TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS push (
            idx INTEGER PRIMARY KEY AUTOINCREMENT,
            vid TEXT NOT NULL,
            data BLOB NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS pull (
            ridx INTEGER NOT NULL,
            vid TEXT NOT NULL,
            data BLOB NOT NULL,
            rts INTEGER NOT NULL,
            PRIMARY KEY (vid, ridx)
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_push_vid ON push (vid, idx)",
    ];
    for stmt in stmts {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
