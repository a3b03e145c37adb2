//! The per-vault sync engine.
//!
//! `sync` pushes staged local events, then pulls the remote log up to the
//! server's latest index. Push-before-pull means a device observes its own
//! just-pushed events (with their server-assigned indices) in the same call.
//!
//! On connection failures the engine does not retry within one call: a
//! failed push leaves the staged rows for the next sync; a failed pull
//! aborts its transaction so the local high-water mark is unchanged.
//!
//! If a push succeeds server-side but the response is lost, the next push
//! resends and the server log may contain duplicates. Receivers MUST be
//! idempotent.

pub(crate) mod db;

mod cipher;

use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ks_client::Relay;
use ks_crypto::{SigningKeyPair, Vid};

use crate::error::Error;

pub use cipher::Cipher;
pub use ks_client::api::{Event, Events};

/// Maximum rows selected per push batch.
const MAX_PUSH_ROWS: i64 = 499;
/// Soft cap on a push batch's total payload bytes.
const MAX_PUSH_BYTES: usize = 4_000_000;

/// Context handed to a receiver: the pulled vault and the live transaction
/// the engine will commit (or roll back) around the whole batch.
pub struct ReceiveContext<'a, 'c> {
    pub vid: Vid,
    pub tx: &'a mut Transaction<'c, Sqlite>,
}

/// Applied under the pull transaction for each batch of remote events.
/// Errors abort the transaction; the same range is re-pulled next time.
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn apply(
        &self,
        ctx: &mut ReceiveContext<'_, '_>,
        events: &[Event],
    ) -> Result<(), Error>;
}

/// Receiver that ignores all events (the pull table still records them).
pub struct NoopReceiver;

#[async_trait]
impl Receiver for NoopReceiver {
    async fn apply(
        &self,
        _ctx: &mut ReceiveContext<'_, '_>,
        _events: &[Event],
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Syncs one vault between the local database and the relay.
pub struct Syncer<'a> {
    pool: &'a SqlitePool,
    relay: &'a dyn Relay,
    receiver: &'a dyn Receiver,
}

impl<'a> Syncer<'a> {
    pub fn new(pool: &'a SqlitePool, relay: &'a dyn Relay, receiver: &'a dyn Receiver) -> Self {
        Self { pool, relay, receiver }
    }

    /// Push, then pull.
    pub async fn sync(
        &self,
        key: &SigningKeyPair,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        info!(vid = %key.vid(), "syncing...");
        self.push(key, cancel).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.pull(key, cancel).await?;
        Ok(())
    }

    /// Drain this vault's push queue in batches.
    pub async fn push(&self, key: &SigningKeyPair, cancel: &CancellationToken) -> Result<(), Error> {
        let vid = key.vid();
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let rows = db::list_push(self.pool, &vid, MAX_PUSH_ROWS).await?;
            if rows.is_empty() {
                return Ok(());
            }

            // Greedy-fill up to the byte cap. A single event larger than the
            // cap still goes out alone so the queue always makes progress.
            let from = rows[0].idx;
            let mut to = from;
            let mut out: Vec<Vec<u8>> = Vec::new();
            let mut total = 0usize;
            for row in rows {
                if !out.is_empty() && total + row.data.len() >= MAX_PUSH_BYTES {
                    debug!("batch full, splitting push");
                    break;
                }
                total += row.data.len();
                to = row.idx;
                out.push(row.data);
            }

            info!(%vid, from, to, bytes = total, "pushing");
            self.relay.post_events(key, out).await?;

            debug!(%vid, to, "clearing push");
            db::clear_push(self.pool, &vid, to).await?;
        }
    }

    /// Pull from the local high-water mark until the server has no more.
    pub async fn pull(&self, key: &SigningKeyPair, cancel: &CancellationToken) -> Result<(), Error> {
        let vid = key.vid();
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let local = db::pull_index(self.pool, &vid).await?;
            debug!(%vid, from = local, "pulling");

            let events = match self.relay.events(key, local).await? {
                Some(events) => events,
                None => return Ok(()), // vault unknown to the relay
            };
            if events.events.is_empty() {
                return Ok(());
            }

            self.apply(&vid, &events.events).await?;

            if !events.truncated {
                return Ok(());
            }
        }
    }

    /// Upsert a pulled batch and run the receiver, all in one transaction.
    async fn apply(&self, vid: &Vid, events: &[Event]) -> Result<(), Error> {
        debug!(%vid, count = events.len(), "saving");
        let mut tx = self.pool.begin().await?;
        db::set_pull_tx(&mut tx, events).await?;

        let mut ctx = ReceiveContext { vid: vid.clone(), tx: &mut tx };
        self.receiver.apply(&mut ctx, events).await?;

        tx.commit().await?;
        Ok(())
    }
}
