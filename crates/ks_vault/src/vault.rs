//! The vault façade.
//!
//! One `Vault` owns one encrypted database file and its master key. The
//! lifecycle is a three-state machine:
//!
//!   setup-needed ──setup──▶ locked ──unlock──▶ unlocked ──lock──▶ locked
//!
//! `setup` initializes the database (and the client key) without unlocking.
//! Every storage operation fails with `Locked` (or `SetupNeeded`) unless the
//! vault is unlocked; there is no lazy lock acquisition.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ks_auth::token::{generate_hmac_secret, HmacSecret};
use ks_auth::{Auth, AuthStore, Device, MasterKey, TokenPlugin};
use ks_client::Relay;
use ks_crypto::{Clock, SigningKeyPair, SystemClock, Vid};

use crate::config;
use crate::db;
use crate::error::Error;
use crate::keyring::Keyring;
use crate::record::{KeyRecord, LABEL_VAULT};
use crate::sync::{db as sync_db, Cipher, Event, Receiver, Syncer};

/// Vault lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No database file yet.
    SetupNeeded,
    /// File present, master key not in memory.
    Locked,
    /// Database open, master key in memory.
    Unlocked,
}

struct OpenState {
    pool: sqlx::SqlitePool,
    mk: MasterKey,
    ck: Option<KeyRecord>,
}

pub struct Vault {
    path: PathBuf,
    auth: AuthStore,
    relay: Arc<dyn Relay>,
    clock: Arc<dyn Clock>,
    plugin: Option<Arc<dyn TokenPlugin>>,

    state: RwLock<Option<OpenState>>,

    /// Serializes keyring syncs (non-reentrant).
    keyring_mutex: Mutex<()>,

    /// Per-vault locks so concurrent syncs of one vault are serialized while
    /// different vaults proceed in parallel.
    sync_locks: std::sync::Mutex<HashMap<Vid, Arc<Mutex<()>>>>,
}

impl Vault {
    pub fn new(path: impl Into<PathBuf>, auth: AuthStore, relay: Arc<dyn Relay>) -> Self {
        Self {
            path: path.into(),
            auth,
            relay,
            clock: Arc::new(SystemClock),
            plugin: None,
            state: RwLock::new(None),
            keyring_mutex: Mutex::new(()),
            sync_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Replace the clock (tests use a deterministic one).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a hardware token backend.
    pub fn with_token_plugin(mut self, plugin: Arc<dyn TokenPlugin>) -> Self {
        self.plugin = Some(plugin);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn auth(&self) -> &AuthStore {
        &self.auth
    }

    pub fn keyring(&self) -> Keyring<'_> {
        Keyring { vault: self }
    }

    // ── Status machine ───────────────────────────────────────────────────────

    /// True if the vault database file doesn't exist.
    pub fn needs_setup(&self) -> bool {
        !self.path.exists()
    }

    pub async fn status(&self) -> Status {
        if self.needs_setup() {
            return Status::SetupNeeded;
        }
        if self.state.read().await.is_some() {
            Status::Unlocked
        } else {
            Status::Locked
        }
    }

    /// Initialize the vault database and persist the client key (generating
    /// one if none is supplied). Doesn't unlock.
    pub async fn setup(
        &self,
        mk: &MasterKey,
        ck: Option<SigningKeyPair>,
    ) -> Result<KeyRecord, Error> {
        let _guard = self.state.write().await;
        if self.path.exists() {
            return Err(Error::AlreadySetup);
        }

        let pool = db::open_db(&self.path, mk).await?;
        let res = async {
            db::init_tables(&pool).await?;
            let ck = ck.unwrap_or_else(SigningKeyPair::generate);
            let record = KeyRecord::from_signing_key(&ck, self.clock.now_millis());
            config::set_client_key(&pool, &record).await?;
            Ok(record)
        }
        .await;
        pool.close().await;
        res
    }

    /// Open the database with the master key. A wrong key surfaces as
    /// `InvalidAuth` (the encrypted file is unreadable).
    pub async fn unlock(&self, mk: &MasterKey) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        debug!("unlock...");
        if guard.is_some() {
            debug!("already unlocked");
            return Ok(());
        }
        if !self.path.exists() {
            return Err(Error::SetupNeeded);
        }

        let pool = db::open_db(&self.path, mk).await?;
        let init = async {
            db::init_tables(&pool).await?;
            config::client_key(&pool).await
        }
        .await;
        let ck = match init {
            Ok(ck) => ck,
            Err(_) => {
                pool.close().await;
                return Err(Error::InvalidAuth);
            }
        };

        *guard = Some(OpenState { pool, mk: mk.clone(), ck });
        Ok(())
    }

    /// Close the database and drop the master key from memory.
    pub async fn lock(&self) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        debug!("locking...");
        match guard.take() {
            Some(state) => {
                state.pool.close().await;
                // state.mk is zeroized on drop.
                Ok(())
            }
            None => {
                debug!("already locked");
                Ok(())
            }
        }
    }

    // ── Internal accessors ───────────────────────────────────────────────────

    pub(crate) fn relay(&self) -> &dyn Relay {
        self.relay.as_ref()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn keyring_mutex(&self) -> &Mutex<()> {
        &self.keyring_mutex
    }

    pub(crate) async fn pool(&self) -> Result<sqlx::SqlitePool, Error> {
        match &*self.state.read().await {
            Some(state) => Ok(state.pool.clone()),
            None if self.needs_setup() => Err(Error::SetupNeeded),
            None => Err(Error::Locked),
        }
    }

    async fn master_key(&self) -> Result<MasterKey, Error> {
        match &*self.state.read().await {
            Some(state) => Ok(state.mk.clone()),
            None => Err(Error::Locked),
        }
    }

    pub(crate) async fn client_signing_key(&self) -> Result<SigningKeyPair, Error> {
        match &*self.state.read().await {
            Some(state) => match &state.ck {
                Some(record) => record.signing_key(),
                None => Err(Error::NoClientKey),
            },
            None => Err(Error::Locked),
        }
    }

    /// The client key record. Requires unlock.
    pub async fn client_key(&self) -> Result<KeyRecord, Error> {
        match &*self.state.read().await {
            Some(state) => state.ck.clone().ok_or(Error::NoClientKey),
            None => Err(Error::Locked),
        }
    }

    fn vault_lock(&self, vid: &Vid) -> Arc<Mutex<()>> {
        let mut locks = self.sync_locks.lock().expect("sync lock map poisoned");
        locks.entry(vid.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    // ── Config ───────────────────────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>, Error> {
        let pool = self.pool().await?;
        config::get_config(&pool, key).await
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<(), Error> {
        let pool = self.pool().await?;
        config::set_config(&pool, key, value).await
    }

    pub async fn config_get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let pool = self.pool().await?;
        config::get_config_bytes(&pool, key).await
    }

    pub async fn config_set_bytes(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        let pool = self.pool().await?;
        config::set_config_bytes(&pool, key, value).await
    }

    // ── Events ───────────────────────────────────────────────────────────────

    /// Stage an event for a vault. Requires unlock.
    pub async fn add(
        &self,
        key: &SigningKeyPair,
        data: &[u8],
        cipher: Cipher,
    ) -> Result<(), Error> {
        let pool = self.pool().await?;
        let sealed = cipher.encrypt(data, key)?;
        sync_db::add_push(&pool, &key.vid(), &sealed).await
    }

    /// Applied pull rows for a vault with server index > `from`.
    pub async fn pulled(&self, vid: &Vid, from: i64) -> Result<Vec<Event>, Error> {
        let pool = self.pool().await?;
        sync_db::list_pull(&pool, vid, from).await
    }

    /// Sync a vault named by the keyring (push then pull), applying
    /// `receiver` under the pull transaction.
    pub async fn sync(
        &self,
        vid: &Vid,
        receiver: &dyn Receiver,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let record = self
            .keyring()
            .find(vid)
            .await?
            .ok_or_else(|| Error::NotFound(vid.to_string()))?;
        let key = record.signing_key()?;
        self.sync_with_key(&key, receiver, cancel).await
    }

    /// Sync a vault for which the caller holds the signing key directly.
    pub async fn sync_with_key(
        &self,
        key: &SigningKeyPair,
        receiver: &dyn Receiver,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let lock = self.vault_lock(&key.vid());
        let _guard = lock.lock().await;

        let pool = self.pool().await?;
        let syncer = Syncer::new(&pool, self.relay(), receiver);
        syncer.sync(key, cancel).await
    }

    /// Register a vault key with the relay under `account`, then store the
    /// tokened key record in the keyring (labeled as a vault).
    pub async fn register(
        &self,
        key: &SigningKeyPair,
        account: &SigningKeyPair,
    ) -> Result<KeyRecord, Error> {
        // Requires unlock: the token must land in the keyring.
        let _pool = self.pool().await?;
        let token = self.relay.register(key, account).await?;
        let record = KeyRecord::from_signing_key(key, self.clock.now_millis())
            .with_token(&token)
            .with_labels([LABEL_VAULT]);
        self.keyring().set(&record).await?;
        Ok(record)
    }

    /// Delete a vault's remote log. The keyring record is removed separately
    /// (with a tombstone) via `Keyring::remove`.
    pub async fn delete_remote(&self, key: &SigningKeyPair) -> Result<(), Error> {
        Ok(self.relay.delete(key).await?)
    }

    // ── Password auth ────────────────────────────────────────────────────────

    /// Set up the vault with a fresh master key wrapped by a password.
    pub async fn setup_password(
        &self,
        password: &str,
        ck: Option<SigningKeyPair>,
    ) -> Result<MasterKey, Error> {
        let mk = MasterKey::generate();
        self.auth.register_password(password, &mk).await?;
        self.setup(&mk, ck).await?;
        Ok(mk)
    }

    pub async fn unlock_with_password(&self, password: &str) -> Result<MasterKey, Error> {
        let (_, mk) = self.auth.password(password).await?;
        self.unlock(&mk).await?;
        Ok(mk)
    }

    /// Add a password as an additional unlock method. Requires unlock.
    pub async fn register_password(&self, password: &str) -> Result<Auth, Error> {
        let mk = self.master_key().await?;
        Ok(self.auth.register_password(password, &mk).await?)
    }

    // ── Paper-key auth ───────────────────────────────────────────────────────

    pub async fn setup_paper_key(
        &self,
        phrase: &str,
        ck: Option<SigningKeyPair>,
    ) -> Result<MasterKey, Error> {
        let mk = MasterKey::generate();
        self.auth.register_paper_key(phrase, &mk).await?;
        self.setup(&mk, ck).await?;
        Ok(mk)
    }

    pub async fn unlock_with_paper_key(&self, phrase: &str) -> Result<MasterKey, Error> {
        let (_, mk) = self.auth.paper_key(phrase).await?;
        self.unlock(&mk).await?;
        Ok(mk)
    }

    /// Add a paper key as an additional unlock method. Requires unlock.
    pub async fn register_paper_key(&self, phrase: &str) -> Result<Auth, Error> {
        let mk = self.master_key().await?;
        Ok(self.auth.register_paper_key(phrase, &mk).await?)
    }

    // ── Hardware-token auth ──────────────────────────────────────────────────

    fn token_plugin(&self) -> Result<&dyn TokenPlugin, Error> {
        self.plugin.as_deref().ok_or(Error::PluginUnavailable)
    }

    pub async fn token_devices(&self) -> Result<Vec<Device>, Error> {
        Ok(self.token_plugin()?.devices().await?)
    }

    /// Create an HMAC-secret credential on a connected device.
    pub async fn generate_hw_token(
        &self,
        pin: &str,
        device: &str,
        name: &str,
    ) -> Result<HmacSecret, Error> {
        Ok(generate_hmac_secret(self.token_plugin()?, pin, device, name).await?)
    }

    pub async fn setup_hw_token(
        &self,
        hs: &HmacSecret,
        pin: &str,
        ck: Option<SigningKeyPair>,
    ) -> Result<MasterKey, Error> {
        let plugin = self.token_plugin()?;
        let mk = MasterKey::generate();
        self.auth.register_hw_token(plugin, hs, &mk, pin).await?;
        self.setup(&mk, ck).await?;
        Ok(mk)
    }

    pub async fn unlock_with_hw_token(&self, pin: &str) -> Result<MasterKey, Error> {
        let (_, mk) = self.auth.hw_token(self.token_plugin()?, pin).await?;
        self.unlock(&mk).await?;
        Ok(mk)
    }

    /// Add a hardware token as an additional unlock method. Requires unlock.
    pub async fn register_hw_token(&self, hs: &HmacSecret, pin: &str) -> Result<Auth, Error> {
        let plugin = self.token_plugin()?;
        let mk = self.master_key().await?;
        Ok(self.auth.register_hw_token(plugin, hs, &mk, pin).await?)
    }
}
