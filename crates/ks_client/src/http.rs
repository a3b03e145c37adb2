//! HTTP relay client.
//!
//! Paths (all vault-scoped calls signed, see `sign`):
//!
//! | Op          | Method | Path                       | Body            |
//! |-------------|--------|----------------------------|-----------------|
//! | register    | PUT    | `/vault/{vid}`             | —               |
//! | get         | GET    | `/vault/{vid}`             | —               |
//! | post-events | POST   | `/vault/{vid}/events`      | msgpack blobs   |
//! | list-events | GET    | `/vault/{vid}/events?idx=N`| —               |
//! | delete      | DELETE | `/vault/{vid}`             | —               |
//! | status      | POST   | `/vaults/status`           | json tokens     |
//! | account     | PUT    | `/account/{vid}`           | json email      |
//!
//! 404 on GET is not an error; it yields a null result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use ks_crypto::{Clock, SigningKeyPair, SystemClock};

use crate::api::{
    AccountCreateRequest, ErrorResponse, Event, Events, RemoteStatus, StatusRequest,
    StatusResponse, VaultInfo, VaultToken, WireEvents, WirePost,
};
use crate::error::ClientError;
use crate::relay::Relay;
use crate::sign;

/// Default overall request deadline.
const TIMEOUT: Duration = Duration::from_secs(30);
/// Default connect (and TLS handshake) deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpRelay {
    client: reqwest::Client,
    base_url: Url,
    clock: Arc<dyn Clock>,
}

impl HttpRelay {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeouts(base_url, TIMEOUT, CONNECT_TIMEOUT)
    }

    pub fn with_timeouts(
        base_url: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("keysync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client, base_url, clock: Arc::new(SystemClock) })
    }

    /// Replace the clock (tests use a deterministic one).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))
    }

    /// Send a request, signing it when a key is supplied.
    async fn request(
        &self,
        method: reqwest::Method,
        url: Url,
        body: Option<Vec<u8>>,
        key: Option<&SigningKeyPair>,
    ) -> Result<Option<reqwest::Response>, ClientError> {
        let body_bytes = body.unwrap_or_default();
        let mut req = self.client.request(method.clone(), url.clone());

        if let Some(key) = key {
            let headers = sign::sign_request(
                key,
                method.as_str(),
                url.as_str(),
                self.clock.now_millis(),
                &body_bytes,
            );
            req = req
                .header(sign::AUTH_HEADER, headers.authorization)
                .header(sign::TIMESTAMP_HEADER, headers.timestamp)
                .header(sign::HASH_HEADER, headers.content_hash);
        }
        if !body_bytes.is_empty() {
            req = req.body(body_bytes);
        }

        let res = req.send().await?;
        let status = res.status();
        debug!(%method, %url, %status, "relay request");

        if status == StatusCode::NOT_FOUND && method == reqwest::Method::GET {
            return Ok(None);
        }
        if status.is_success() {
            return Ok(Some(res));
        }

        // Pull a message out of the JSON error body when there is one.
        let message = match res.bytes().await {
            Ok(b) => match serde_json::from_slice::<ErrorResponse>(&b) {
                Ok(e) if !e.error.is_empty() => e.error,
                _ => String::from_utf8_lossy(&b).into_owned(),
            },
            Err(_) => String::new(),
        };
        Err(ClientError::Relay { status: status.as_u16(), message })
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn register(
        &self,
        key: &SigningKeyPair,
        account: &SigningKeyPair,
    ) -> Result<String, ClientError> {
        let url = self.url(&format!("/vault/{}", key.vid()))?;
        let res = self
            .request(reqwest::Method::PUT, url, None, Some(account))
            .await?
            .expect("PUT never yields a null response");
        let info: VaultInfo = res.json().await.map_err(ClientError::Transport)?;
        Ok(info.token)
    }

    async fn get(&self, key: &SigningKeyPair) -> Result<Option<VaultInfo>, ClientError> {
        let url = self.url(&format!("/vault/{}", key.vid()))?;
        let res = match self.request(reqwest::Method::GET, url, None, Some(key)).await? {
            Some(res) => res,
            None => return Ok(None),
        };
        let info: VaultInfo = res.json().await.map_err(ClientError::Transport)?;
        Ok(Some(info))
    }

    async fn post_events(&self, key: &SigningKeyPair, data: Vec<Vec<u8>>) -> Result<(), ClientError> {
        let url = self.url(&format!("/vault/{}/events", key.vid()))?;
        let body = rmp_serde::to_vec(&WirePost::new(data)).map_err(ClientError::decode)?;
        self.request(reqwest::Method::POST, url, Some(body), Some(key)).await?;
        Ok(())
    }

    async fn events(
        &self,
        key: &SigningKeyPair,
        index: i64,
    ) -> Result<Option<Events>, ClientError> {
        let mut url = self.url(&format!("/vault/{}/events", key.vid()))?;
        if index != 0 {
            url.query_pairs_mut().append_pair("idx", &index.to_string());
        }
        let res = match self.request(reqwest::Method::GET, url, None, Some(key)).await? {
            Some(res) => res,
            None => return Ok(None),
        };
        let body = res.bytes().await?;
        let wire: WireEvents = rmp_serde::from_slice(&body).map_err(ClientError::decode)?;

        let vid = key.vid();
        let events = wire
            .vault
            .into_iter()
            .map(|e| Event {
                vid: vid.clone(),
                data: e.data,
                remote_index: e.index,
                remote_timestamp: e.timestamp,
            })
            .collect();
        Ok(Some(Events { events, index: wire.index, truncated: wire.truncated }))
    }

    async fn delete(&self, key: &SigningKeyPair) -> Result<(), ClientError> {
        let url = self.url(&format!("/vault/{}", key.vid()))?;
        self.request(reqwest::Method::DELETE, url, None, Some(key)).await?;
        Ok(())
    }

    async fn status(&self, tokens: &[VaultToken]) -> Result<Vec<RemoteStatus>, ClientError> {
        let mut vaults = BTreeMap::new();
        for t in tokens {
            if t.token.is_empty() {
                return Err(ClientError::Decode("empty vault token".into()));
            }
            vaults.insert(t.vid.clone(), t.token.clone());
        }
        let body = serde_json::to_vec(&StatusRequest { vaults }).map_err(ClientError::decode)?;

        let url = self.url("/vaults/status")?;
        let res = self
            .request(reqwest::Method::POST, url, Some(body), None)
            .await?
            .expect("POST never yields a null response");
        let out: StatusResponse = res.json().await.map_err(ClientError::Transport)?;
        Ok(out.vaults)
    }

    async fn account_create(
        &self,
        account: &SigningKeyPair,
        email: &str,
    ) -> Result<(), ClientError> {
        let url = self.url(&format!("/account/{}", account.vid()))?;
        let body = serde_json::to_vec(&AccountCreateRequest { email: email.to_string() })
            .map_err(ClientError::decode)?;
        self.request(reqwest::Method::PUT, url, Some(body), Some(account)).await?;
        Ok(())
    }
}
