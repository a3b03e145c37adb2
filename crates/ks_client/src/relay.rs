//! The remote contract the sync engine consumes.
//!
//! The production implementation is [`crate::HttpRelay`]; tests substitute an
//! in-memory double. The sync engine never depends on transport details.

use async_trait::async_trait;

use ks_crypto::SigningKeyPair;

use crate::api::{Events, RemoteStatus, VaultInfo, VaultToken};
use crate::error::ClientError;

#[async_trait]
pub trait Relay: Send + Sync {
    /// Register a vault under an account. Returns the subscription token.
    async fn register(
        &self,
        key: &SigningKeyPair,
        account: &SigningKeyPair,
    ) -> Result<String, ClientError>;

    /// Look up a vault. `None` if the relay doesn't know it.
    async fn get(&self, key: &SigningKeyPair) -> Result<Option<VaultInfo>, ClientError>;

    /// Append opaque event blobs to a vault's log.
    async fn post_events(&self, key: &SigningKeyPair, data: Vec<Vec<u8>>) -> Result<(), ClientError>;

    /// Fetch events with server index greater than `index`.
    /// `None` if the vault doesn't exist on the relay.
    async fn events(
        &self,
        key: &SigningKeyPair,
        index: i64,
    ) -> Result<Option<Events>, ClientError>;

    /// Delete a vault and its log.
    async fn delete(&self, key: &SigningKeyPair) -> Result<(), ClientError>;

    /// Server-side progress for each subscribed vault.
    async fn status(&self, tokens: &[VaultToken]) -> Result<Vec<RemoteStatus>, ClientError>;

    /// Create an account keyed by an account signing key.
    async fn account_create(
        &self,
        account: &SigningKeyPair,
        email: &str,
    ) -> Result<(), ClientError>;
}
