//! ks_vault — Keysync encrypted local store and sync engine
//!
//! Each device holds one page-encrypted SQLite database. Vaults (append-only
//! event logs named by an Ed25519 public key) are mirrored through a relay:
//! outbound events are staged in a `push` table, pulled events land in a
//! `pull` table keyed by the server-assigned index, and an application
//! receiver is applied inside the pull transaction. The keyring is the
//! distinguished vault whose events describe the user's other keys.
//!
//! # Modules
//! - `vault`   — status machine (setup-needed / locked / unlocked), façade
//! - `db`      — SQLCipher-encrypted database open + table bootstrap
//! - `config`  — key/value config (client key lives here)
//! - `sync`    — push/pull engine, receiver contract, write-side cipher
//! - `record`  — keyring key records
//! - `keyring` — key queries and the keyring's own sync
//! - `changes` — which vaults have unseen remote events
//! - `error`   — unified error type

pub mod changes;
pub mod config;
pub mod db;
pub mod error;
pub mod keyring;
pub mod record;
pub mod sync;
pub mod vault;

#[cfg(test)]
mod testutil;
#[cfg(test)]
mod tests;

pub use changes::Change;
pub use error::Error;
pub use keyring::Keyring;
pub use record::{KeyKind, KeyRecord, LABEL_VAULT};
pub use sync::{Cipher, Event, NoopReceiver, ReceiveContext, Receiver, Syncer};
pub use vault::{Status, Vault};

// The auth store and relay contract are part of the public surface.
pub use ks_auth::{AuthStore, MasterKey};
pub use ks_client::{HttpRelay, Relay};
