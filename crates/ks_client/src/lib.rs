//! ks_client — Keysync relay client
//!
//! The relay is an append-only event log service addressed by vault id. This
//! crate defines the client-side contract (`Relay`) and the production HTTP
//! implementation (`HttpRelay`).
//!
//! # Modules
//! - `api`   — wire types shared with the relay
//! - `relay` — the `Relay` trait the sync engine consumes
//! - `http`  — reqwest implementation with signed requests
//! - `sign`  — Ed25519 request signatures (method, URL, timestamp, body hash)
//! - `error` — unified error type

pub mod api;
pub mod error;
pub mod http;
pub mod relay;
pub mod sign;

pub use api::{Event, Events, RemoteStatus, VaultInfo, VaultToken};
pub use error::ClientError;
pub use http::HttpRelay;
pub use relay::Relay;
