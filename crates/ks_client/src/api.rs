//! Wire types shared between clients and the relay.
//!
//! Event bodies travel as msgpack; vault registration and status use JSON.
//! All timestamps are milliseconds since epoch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ks_crypto::Vid;

// ── Events ───────────────────────────────────────────────────────────────────

/// Event pulled from the remote log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub vid: Vid,
    pub data: Vec<u8>,
    /// Server-assigned index, strictly increasing per vault.
    pub remote_index: i64,
    /// Server timestamp (ms).
    pub remote_timestamp: i64,
}

/// A page of events. If `truncated`, call again from the new index.
#[derive(Debug, Clone, Default)]
pub struct Events {
    pub events: Vec<Event>,
    pub index: i64,
    pub truncated: bool,
}

/// On-wire event entry inside a list-events response (msgpack).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "idx")]
    pub index: i64,
    #[serde(rename = "ts")]
    pub timestamp: i64,
}

/// On-wire list-events response body (msgpack).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvents {
    #[serde(default)]
    pub vault: Vec<WireEvent>,
    #[serde(rename = "idx", default)]
    pub index: i64,
    #[serde(default)]
    pub truncated: bool,
}

/// On-wire post-events body (msgpack array of opaque blobs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePost(pub Vec<serde_bytes::ByteBuf>);

impl WirePost {
    pub fn new(blobs: Vec<Vec<u8>>) -> Self {
        WirePost(blobs.into_iter().map(serde_bytes::ByteBuf::from).collect())
    }

    pub fn into_blobs(self) -> Vec<Vec<u8>> {
        self.0.into_iter().map(|b| b.into_vec()).collect()
    }
}

// ── Registration / status ────────────────────────────────────────────────────

/// Registration / lookup result for a vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultInfo {
    #[serde(rename = "id")]
    pub vid: Vid,
    pub token: String,
    #[serde(rename = "ts", default)]
    pub timestamp: i64,
}

/// A vault's subscription token, as stored in the keyring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultToken {
    pub vid: Vid,
    pub token: String,
}

/// Per-vault server-side progress, from the status call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatus {
    #[serde(rename = "id")]
    pub vid: Vid,
    #[serde(rename = "idx")]
    pub index: i64,
    #[serde(rename = "ts")]
    pub timestamp: i64,
}

/// Status request body (JSON): vault id → token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub vaults: BTreeMap<Vid, String>,
}

/// Status response body (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub vaults: Vec<RemoteStatus>,
}

/// Account creation body (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCreateRequest {
    pub email: String,
}

/// Error body the relay returns on non-2xx (JSON, best effort).
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: String,
}
