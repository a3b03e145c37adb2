//! Which vaults changed on the remote.
//!
//! Compares the relay's per-vault index (via the status call, using the
//! tokens stored in the keyring) against the local pull high-water marks.
//! A vault is listed when the server is ahead, or when it has staged push
//! rows waiting to go out. Sync the keyring first or the token list may be
//! stale.

use tracing::debug;

use ks_crypto::Vid;

use crate::error::Error;
use crate::keyring;
use crate::sync::db as sync_db;
use crate::vault::Vault;

/// One changed vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub vid: Vid,
    /// Local pull high-water mark.
    pub local: i64,
    /// Server's latest index.
    pub remote: i64,
    /// Server timestamp of the latest event (ms).
    pub timestamp: i64,
    /// Whether this vault has staged push rows.
    pub push: bool,
}

impl Vault {
    /// Changes for every vault named by the keyring, newest first.
    pub async fn changes(&self) -> Result<Vec<Change>, Error> {
        let pool = self.pool().await?;

        let tokens = keyring::tokens(&pool).await?;
        let status = self.relay().status(&tokens).await?;
        for st in &status {
            debug!(vid = %st.vid, index = st.index, "status");
        }

        let pull_indexes = sync_db::pull_indexes(&pool).await?;
        let push_indexes = sync_db::push_indexes(&pool).await?;

        let mut changes = Vec::new();
        for st in status {
            let local = pull_indexes.get(&st.vid).copied().unwrap_or(0);
            let push = push_indexes.contains_key(&st.vid);
            if local < st.index || push {
                debug!(vid = %st.vid, local, remote = st.index, "changed");
                changes.push(Change {
                    vid: st.vid,
                    local,
                    remote: st.index,
                    timestamp: st.timestamp,
                    push,
                });
            }
        }
        changes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(changes)
    }
}
