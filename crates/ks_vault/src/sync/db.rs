//! Push and pull tables.
//!
//! `push` stages outbound events: a local auto-increment index preserves
//! enqueue order within each vault. `pull` mirrors the remote log: rows are
//! keyed by the server-assigned index and only ever upserted, so re-applying
//! a pulled range is a no-op.

use std::collections::HashMap;

use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use ks_crypto::Vid;

use crate::error::Error;
use crate::sync::Event;

#[derive(Debug, Clone)]
pub(crate) struct PushRow {
    pub idx: i64,
    pub data: Vec<u8>,
}

/// Stage an outbound event inside an existing transaction.
pub(crate) async fn add_push_tx(
    tx: &mut Transaction<'_, Sqlite>,
    vid: &Vid,
    data: &[u8],
) -> Result<(), Error> {
    debug!(%vid, len = data.len(), "adding to push");
    sqlx::query("INSERT INTO push (vid, data) VALUES (?, ?)")
        .bind(vid.as_str())
        .bind(data)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Stage an outbound event in its own transaction.
pub(crate) async fn add_push(pool: &SqlitePool, vid: &Vid, data: &[u8]) -> Result<(), Error> {
    let mut tx = pool.begin().await?;
    add_push_tx(&mut tx, vid, data).await?;
    tx.commit().await?;
    Ok(())
}

/// Oldest staged events for one vault, in enqueue order.
pub(crate) async fn list_push(
    pool: &SqlitePool,
    vid: &Vid,
    limit: i64,
) -> Result<Vec<PushRow>, Error> {
    let rows = sqlx::query("SELECT idx, data FROM push WHERE vid = ? ORDER BY idx LIMIT ?")
        .bind(vid.as_str())
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| PushRow { idx: r.get("idx"), data: r.get("data") })
        .collect())
}

/// Drop this vault's staged events up to and including `idx`.
pub(crate) async fn clear_push(pool: &SqlitePool, vid: &Vid, idx: i64) -> Result<(), Error> {
    sqlx::query("DELETE FROM push WHERE vid = ? AND idx <= ?")
        .bind(vid.as_str())
        .bind(idx)
        .execute(pool)
        .await?;
    Ok(())
}

/// Upsert pulled events, keyed by (vid, ridx). Idempotent.
pub(crate) async fn set_pull_tx(
    tx: &mut Transaction<'_, Sqlite>,
    events: &[Event],
) -> Result<(), Error> {
    for e in events {
        sqlx::query("INSERT OR REPLACE INTO pull (ridx, vid, data, rts) VALUES (?, ?, ?, ?)")
            .bind(e.remote_index)
            .bind(e.vid.as_str())
            .bind(&e.data)
            .bind(e.remote_timestamp)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// The local high-water mark for one vault (0 if nothing pulled yet).
pub(crate) async fn pull_index(pool: &SqlitePool, vid: &Vid) -> Result<i64, Error> {
    let row = sqlx::query("SELECT MAX(ridx) AS ridx FROM pull WHERE vid = ?")
        .bind(vid.as_str())
        .fetch_one(pool)
        .await?;
    Ok(row.try_get::<i64, _>("ridx").unwrap_or(0))
}

/// Applied pull rows for one vault with ridx > `from`, ascending.
pub(crate) async fn list_pull(
    pool: &SqlitePool,
    vid: &Vid,
    from: i64,
) -> Result<Vec<Event>, Error> {
    let rows = sqlx::query(
        "SELECT ridx, data, rts FROM pull WHERE vid = ? AND ridx > ? ORDER BY ridx",
    )
    .bind(vid.as_str())
    .bind(from)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| Event {
            vid: vid.clone(),
            data: r.get("data"),
            remote_index: r.get("ridx"),
            remote_timestamp: r.get("rts"),
        })
        .collect())
}

/// Per-vault local pull high-water marks.
pub(crate) async fn pull_indexes(pool: &SqlitePool) -> Result<HashMap<Vid, i64>, Error> {
    let rows = sqlx::query("SELECT vid, MAX(ridx) AS ridx FROM pull GROUP BY vid")
        .fetch_all(pool)
        .await?;
    collect_indexes(rows, "ridx")
}

/// Per-vault highest staged push index.
pub(crate) async fn push_indexes(pool: &SqlitePool) -> Result<HashMap<Vid, i64>, Error> {
    let rows = sqlx::query("SELECT vid, MAX(idx) AS idx FROM push GROUP BY vid")
        .fetch_all(pool)
        .await?;
    collect_indexes(rows, "idx")
}

fn collect_indexes(
    rows: Vec<sqlx::sqlite::SqliteRow>,
    col: &str,
) -> Result<HashMap<Vid, i64>, Error> {
    let mut m = HashMap::new();
    for r in rows {
        let vid: String = r.get("vid");
        let idx: i64 = r.get(col);
        m.insert(Vid::parse(&vid)?, idx);
    }
    Ok(m)
}
