//! The keyring: a vault of key records.
//!
//! The keyring vault is named by the client key. Every event on it is an
//! anonymous sealed box (to the client key's X25519 public) around a msgpack
//! key record; tombstones delete. Local writes update the `keys` table in
//! the same transaction that stages the push event, so the local view
//! reflects a change before sync completes.

use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ks_client::api::VaultToken;
use ks_crypto::{sealedbox, SigningKeyPair, Vid};

use crate::error::Error;
use crate::record::{KeyKind, KeyRecord};
use crate::sync::{db as sync_db, Event, ReceiveContext, Receiver, Syncer};
use crate::vault::Vault;

// ── keys table ───────────────────────────────────────────────────────────────

/// Labels are stored delimited (`,a,b,`) so a substring match on one label
/// cannot collide with a prefix of another.
fn encode_labels(labels: &[String]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    format!(",{},", labels.join(","))
}

fn decode_labels(s: &str) -> Vec<String> {
    s.split(',').filter(|l| !l.is_empty()).map(str::to_string).collect()
}

pub(crate) async fn save_key_tx(
    tx: &mut Transaction<'_, Sqlite>,
    key: &KeyRecord,
) -> Result<(), Error> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO keys
            (id, type, private, public, token, created_at, updated_at, notes, labels, email, ext)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(key.id.as_str())
    .bind(key.kind.as_str())
    .bind(&key.private)
    .bind(&key.public)
    .bind(&key.token)
    .bind(key.created_at)
    .bind(key.updated_at)
    .bind(&key.notes)
    .bind(encode_labels(&key.labels))
    .bind(&key.email)
    .bind(&key.ext)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn delete_key_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: &Vid,
) -> Result<bool, Error> {
    let res = sqlx::query("DELETE FROM keys WHERE id = ?")
        .bind(id.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected() > 0)
}

const KEY_COLUMNS: &str =
    "id, type, private, public, token, created_at, updated_at, notes, labels, email, ext";

pub(crate) async fn get_key(pool: &SqlitePool, id: &Vid) -> Result<Option<KeyRecord>, Error> {
    let row = sqlx::query(&format!("SELECT {KEY_COLUMNS} FROM keys WHERE id = ?"))
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_key).transpose()
}

pub(crate) async fn list_keys(pool: &SqlitePool) -> Result<Vec<KeyRecord>, Error> {
    let rows = sqlx::query(&format!("SELECT {KEY_COLUMNS} FROM keys ORDER BY id"))
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_key).collect()
}

pub(crate) async fn list_keys_by_kind(
    pool: &SqlitePool,
    kind: KeyKind,
) -> Result<Vec<KeyRecord>, Error> {
    let rows = sqlx::query(&format!("SELECT {KEY_COLUMNS} FROM keys WHERE type = ? ORDER BY id"))
        .bind(kind.as_str())
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_key).collect()
}

pub(crate) async fn list_keys_with_label(
    pool: &SqlitePool,
    label: &str,
) -> Result<Vec<KeyRecord>, Error> {
    let rows = sqlx::query(&format!("SELECT {KEY_COLUMNS} FROM keys WHERE labels LIKE ? ORDER BY id"))
        .bind(format!("%,{label},%"))
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_key).collect()
}

/// `{vid, token}` for every Ed25519 key with a non-empty token.
pub(crate) async fn tokens(pool: &SqlitePool) -> Result<Vec<VaultToken>, Error> {
    let rows = sqlx::query("SELECT id, token FROM keys WHERE type = ? AND token != '' ORDER BY id")
        .bind(KeyKind::Ed25519.as_str())
        .fetch_all(pool)
        .await?;
    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        let id: String = r.get("id");
        out.push(VaultToken { vid: Vid::parse(&id)?, token: r.get("token") });
    }
    Ok(out)
}

fn row_to_key(row: &sqlx::sqlite::SqliteRow) -> Result<KeyRecord, Error> {
    let id: String = row.get("id");
    let kind: String = row.get("type");
    let labels: String = row.get("labels");
    Ok(KeyRecord {
        id: Vid::parse(&id)?,
        kind: KeyKind::parse(&kind)
            .ok_or_else(|| Error::Encode(format!("unknown key type {kind:?}")))?,
        private: row.get("private"),
        public: row.get::<Option<Vec<u8>>, _>("public").unwrap_or_default(),
        token: row.get("token"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        notes: row.get("notes"),
        labels: decode_labels(&labels),
        email: row.get("email"),
        ext: row.get("ext"),
        deleted: false,
    })
}

// ── Keyring ──────────────────────────────────────────────────────────────────

/// Borrowed view over the vault's keyring. Requires unlock.
pub struct Keyring<'a> {
    pub(crate) vault: &'a Vault,
}

impl Keyring<'_> {
    /// Seal a key record to the client key for the keyring event log.
    fn seal_record(ck: &SigningKeyPair, key: &KeyRecord) -> Result<Vec<u8>, Error> {
        let plain = rmp_serde::to_vec_named(key).map_err(Error::encode)?;
        Ok(sealedbox::seal(&ck.to_x25519_public()?, &plain)?)
    }

    /// Write a key: stages the keyring event and updates the local `keys`
    /// row in one transaction.
    pub async fn set(&self, key: &KeyRecord) -> Result<(), Error> {
        let pool = self.vault.pool().await?;
        let ck = self.vault.client_signing_key().await?;

        let mut key = key.clone();
        key.updated_at = self.vault.clock().now_millis();
        if key.created_at == 0 {
            key.created_at = key.updated_at;
        }

        let sealed = Self::seal_record(&ck, &key)?;
        let mut tx = pool.begin().await?;
        sync_db::add_push_tx(&mut tx, &ck.vid(), &sealed).await?;
        save_key_tx(&mut tx, &key).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Set, then try to sync right away. Sync failures are logged, not
    /// surfaced; the staged event goes out with the next sync.
    pub async fn save(&self, key: &KeyRecord) -> Result<(), Error> {
        self.set(key).await?;
        if let Err(e) = self.sync(&CancellationToken::new()).await {
            warn!("keyring sync after save failed: {e}");
        }
        Ok(())
    }

    /// Delete a key: stages a tombstone event and removes the local row in
    /// one transaction.
    pub async fn remove(&self, id: &Vid) -> Result<(), Error> {
        let pool = self.vault.pool().await?;
        let ck = self.vault.client_signing_key().await?;

        let tomb = KeyRecord::tombstone(id.clone(), self.vault.clock().now_millis());
        let sealed = Self::seal_record(&ck, &tomb)?;

        let mut tx = pool.begin().await?;
        sync_db::add_push_tx(&mut tx, &ck.vid(), &sealed).await?;
        delete_key_tx(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Key by id, or `None`.
    pub async fn get(&self, id: &Vid) -> Result<Option<KeyRecord>, Error> {
        let pool = self.vault.pool().await?;
        get_key(&pool, id).await
    }

    /// Key by id; `NotFound` if absent.
    pub async fn key(&self, id: &Vid) -> Result<KeyRecord, Error> {
        self.get(id).await?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub async fn keys(&self) -> Result<Vec<KeyRecord>, Error> {
        let pool = self.vault.pool().await?;
        list_keys(&pool).await
    }

    pub async fn keys_by_kind(&self, kind: KeyKind) -> Result<Vec<KeyRecord>, Error> {
        let pool = self.vault.pool().await?;
        list_keys_by_kind(&pool, kind).await
    }

    pub async fn keys_with_label(&self, label: &str) -> Result<Vec<KeyRecord>, Error> {
        let pool = self.vault.pool().await?;
        list_keys_with_label(&pool, label).await
    }

    /// Look up a key locally; on a miss, sync the keyring and retry once.
    pub async fn find(&self, id: &Vid) -> Result<Option<KeyRecord>, Error> {
        let pool = self.vault.pool().await?;
        if let Some(key) = get_key(&pool, id).await? {
            return Ok(Some(key));
        }
        self.sync(&CancellationToken::new()).await?;
        get_key(&pool, id).await
    }

    /// Subscription tokens for every synced vault named by the keyring.
    pub async fn tokens(&self) -> Result<Vec<VaultToken>, Error> {
        let pool = self.vault.pool().await?;
        tokens(&pool).await
    }

    /// Sync the keyring vault. Overlapping keyring syncs are serialized.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let _guard = self.vault.keyring_mutex().lock().await;

        let pool = self.vault.pool().await?;
        let ck = self.vault.client_signing_key().await?;

        let receiver = KeyringReceiver { ck: ck.clone() };
        let syncer = Syncer::new(&pool, self.vault.relay(), &receiver);
        syncer.sync(&ck, cancel).await
    }
}

/// Decrypts keyring events and applies them to the `keys` table.
struct KeyringReceiver {
    ck: SigningKeyPair,
}

#[async_trait]
impl Receiver for KeyringReceiver {
    async fn apply(
        &self,
        ctx: &mut ReceiveContext<'_, '_>,
        events: &[Event],
    ) -> Result<(), Error> {
        let secret = self.ck.to_x25519_secret();
        for event in events {
            let plain = sealedbox::open(&secret, &event.data)?;
            let key: KeyRecord = rmp_serde::from_slice(&plain).map_err(Error::encode)?;
            if key.deleted {
                debug!(id = %key.id, "keyring tombstone");
                delete_key_tx(ctx.tx, &key.id).await?;
            } else {
                debug!(id = %key.id, "keyring upsert");
                save_key_tx(ctx.tx, &key).await?;
            }
        }
        Ok(())
    }
}
