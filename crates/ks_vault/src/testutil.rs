//! Test doubles: an in-memory relay and vault constructors.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ks_auth::AuthStore;
use ks_client::api::{Event, Events, RemoteStatus, VaultInfo, VaultToken};
use ks_client::{ClientError, Relay};
use ks_crypto::{Clock, SigningKeyPair, TestClock, Vid};

use crate::vault::Vault;

// ── In-memory relay ──────────────────────────────────────────────────────────

struct StoredEvent {
    data: Vec<u8>,
    ts: i64,
}

struct RelayVault {
    token: String,
    created_ts: i64,
    events: Vec<StoredEvent>,
}

#[derive(Default)]
struct RelayState {
    accounts: HashSet<Vid>,
    vaults: HashMap<Vid, RelayVault>,
}

/// An in-memory relay implementing the full `Relay` contract: server-assigned
/// indices (1-based per vault), event timestamps from the shared clock, and
/// truncated paging.
pub struct TestRelay {
    state: std::sync::Mutex<RelayState>,
    clock: Arc<dyn Clock>,
    page_limit: usize,
}

impl TestRelay {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { state: std::sync::Mutex::new(RelayState::default()), clock, page_limit: 100 }
    }

    /// Shrink pages to force truncated responses.
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit;
        self
    }

    /// Number of events stored for a vault (test assertions).
    pub fn event_count(&self, vid: &Vid) -> usize {
        let state = self.state.lock().unwrap();
        state.vaults.get(vid).map(|v| v.events.len()).unwrap_or(0)
    }

    fn err(status: u16, message: &str) -> ClientError {
        ClientError::Relay { status, message: message.to_string() }
    }
}

#[async_trait]
impl Relay for TestRelay {
    async fn register(
        &self,
        key: &SigningKeyPair,
        account: &SigningKeyPair,
    ) -> Result<String, ClientError> {
        let mut state = self.state.lock().unwrap();
        if !state.accounts.contains(&account.vid()) {
            return Err(Self::err(403, "unknown account"));
        }
        let ts = self.clock.now_millis();
        let vault = state.vaults.entry(key.vid()).or_insert_with(|| RelayVault {
            token: ks_crypto::rand_id(),
            created_ts: ts,
            events: Vec::new(),
        });
        Ok(vault.token.clone())
    }

    async fn get(&self, key: &SigningKeyPair) -> Result<Option<VaultInfo>, ClientError> {
        let state = self.state.lock().unwrap();
        Ok(state.vaults.get(&key.vid()).map(|v| VaultInfo {
            vid: key.vid(),
            token: v.token.clone(),
            timestamp: v.created_ts,
        }))
    }

    async fn post_events(
        &self,
        key: &SigningKeyPair,
        data: Vec<Vec<u8>>,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        let vault = state
            .vaults
            .get_mut(&key.vid())
            .ok_or_else(|| Self::err(404, "vault not registered"))?;
        for blob in data {
            let ts = self.clock.now_millis();
            vault.events.push(StoredEvent { data: blob, ts });
        }
        Ok(())
    }

    async fn events(
        &self,
        key: &SigningKeyPair,
        index: i64,
    ) -> Result<Option<Events>, ClientError> {
        let state = self.state.lock().unwrap();
        let vault = match state.vaults.get(&key.vid()) {
            Some(vault) => vault,
            None => return Ok(None),
        };

        // Events are 1-indexed; a client ahead of the log gets nothing.
        let from = (index.max(0) as usize).min(vault.events.len());
        let remaining = vault.events.len() - from;
        let page = remaining.min(self.page_limit);

        let events: Vec<Event> = vault.events[from..from + page]
            .iter()
            .enumerate()
            .map(|(i, e)| Event {
                vid: key.vid(),
                data: e.data.clone(),
                remote_index: (from + i + 1) as i64,
                remote_timestamp: e.ts,
            })
            .collect();
        let last = events.last().map(|e| e.remote_index).unwrap_or(index);
        Ok(Some(Events { events, index: last, truncated: remaining > page }))
    }

    async fn delete(&self, key: &SigningKeyPair) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state
            .vaults
            .remove(&key.vid())
            .map(|_| ())
            .ok_or_else(|| Self::err(404, "vault not registered"))
    }

    async fn status(&self, tokens: &[VaultToken]) -> Result<Vec<RemoteStatus>, ClientError> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::new();
        for t in tokens {
            if t.token.is_empty() {
                return Err(Self::err(400, "empty token"));
            }
            let vault = match state.vaults.get(&t.vid) {
                Some(vault) => vault,
                None => continue,
            };
            if vault.token != t.token {
                return Err(Self::err(403, "bad token"));
            }
            out.push(RemoteStatus {
                vid: t.vid.clone(),
                index: vault.events.len() as i64,
                timestamp: vault.events.last().map(|e| e.ts).unwrap_or(vault.created_ts),
            });
        }
        Ok(out)
    }

    async fn account_create(
        &self,
        account: &SigningKeyPair,
        _email: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.accounts.insert(account.vid());
        Ok(())
    }
}

// ── Environment ──────────────────────────────────────────────────────────────

/// Install a fmt subscriber once; `RUST_LOG` controls the level.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared clock + relay, mirroring one remote across several test devices.
pub struct TestEnv {
    pub clock: Arc<TestClock>,
    pub relay: Arc<TestRelay>,
    pub dir: tempfile::TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_page_limit(100)
    }

    pub fn with_page_limit(limit: usize) -> Self {
        init_logging();
        let clock = Arc::new(TestClock::new());
        let relay = Arc::new(TestRelay::new(clock.clone()).with_page_limit(limit));
        Self { clock, relay, dir: tempfile::tempdir().unwrap() }
    }

    /// Create an account and register a client (keyring) key under it.
    pub async fn register_client(&self, ck: &SigningKeyPair, account: &SigningKeyPair) {
        self.relay.account_create(account, "test@example.com").await.unwrap();
        self.relay.register(ck, account).await.unwrap();
    }

    /// A vault named `device` (fresh auth + vault database files).
    pub async fn vault(&self, device: &str) -> Vault {
        let auth = AuthStore::open(&self.dir.path().join(format!("{device}-auth.db")))
            .await
            .unwrap()
            .with_clock(self.clock.clone());
        Vault::new(self.dir.path().join(format!("{device}.db")), auth, self.relay.clone())
            .with_clock(self.clock.clone())
    }

    /// A vault set up with a password and unlocked, sharing `ck`.
    pub async fn vault_with_setup(
        &self,
        device: &str,
        password: &str,
        ck: &SigningKeyPair,
    ) -> Vault {
        let vault = self.vault(device).await;
        let mk = vault.setup_password(password, Some(ck.clone())).await.unwrap();
        vault.unlock(&mk).await.unwrap();
        vault
    }
}

// ── Test messages ────────────────────────────────────────────────────────────

/// Opaque application payload used by the channel tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMessage {
    pub id: String,
    pub text: String,
    pub sender: Vid,
}

impl TestMessage {
    pub fn new(text: &str, sender: Vid) -> Self {
        Self { id: ks_crypto::rand_id(), text: text.to_string(), sender }
    }

    pub fn marshal(&self) -> Vec<u8> {
        rmp_serde::to_vec_named(self).unwrap()
    }

    pub fn unmarshal(b: &[u8]) -> Self {
        rmp_serde::from_slice(b).unwrap()
    }
}
