//! Hardware-token auth method (HMAC-secret).
//!
//! The token backend is a separate process or library behind the
//! [`TokenPlugin`] trait. Registration creates an HMAC-secret credential on
//! a physically connected device; authentication finds a connected device
//! whose model id (AAGUID) matches a stored record and asks it to recompute
//! the HMAC secret over the stored salt. The 32-byte secret is the wrapping
//! key for the master key.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use tracing::debug;

use ks_crypto::secretbox;

use crate::error::AuthError;
use crate::record::{Auth, MasterKey, Method};
use crate::store::AuthStore;

/// Relying-party id presented to authenticators.
pub const RELYING_PARTY: &str = "keysync";

/// Extension name a device must support for this method.
pub const HMAC_SECRET_EXTENSION: &str = "hmac-secret";

// ── Plugin contract ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Device {
    pub path: String,
    pub product: String,
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub aaguid: String,
    pub extensions: Vec<String>,
}

impl DeviceInfo {
    pub fn has_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e == ext)
    }
}

#[derive(Debug, Clone)]
pub struct GenerateHmacSecretRequest {
    pub device: String,
    pub pin: String,
    pub client_data_hash: [u8; 32],
    pub rp_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone)]
pub struct HmacSecretRequest {
    pub device: String,
    pub pin: String,
    pub client_data_hash: [u8; 32],
    pub rp_id: String,
    pub credential_ids: Vec<Vec<u8>>,
    pub salt: Vec<u8>,
}

/// Synchronous-RPC shaped contract to the hardware token backend.
#[async_trait]
pub trait TokenPlugin: Send + Sync {
    async fn devices(&self) -> Result<Vec<Device>, AuthError>;
    async fn device_info(&self, path: &str) -> Result<DeviceInfo, AuthError>;
    /// Create an HMAC-secret credential; returns the credential id.
    async fn generate_hmac_secret(
        &self,
        req: &GenerateHmacSecretRequest,
    ) -> Result<Vec<u8>, AuthError>;
    /// Recompute the 32-byte HMAC secret for a stored credential + salt.
    async fn hmac_secret(&self, req: &HmacSecretRequest) -> Result<Vec<u8>, AuthError>;
}

// ── Credential material ──────────────────────────────────────────────────────

/// Parameters of a generated HMAC-secret credential, ready to register.
#[derive(Debug, Clone)]
pub struct HmacSecret {
    pub credential_id: Vec<u8>,
    pub salt: Vec<u8>,
    pub aaguid: String,
    pub no_pin: bool,
}

/// Drive the plugin to create an HMAC-secret credential on a device.
/// `device` may be empty (first device), a path, or a product name.
pub async fn generate_hmac_secret(
    plugin: &dyn TokenPlugin,
    pin: &str,
    device: &str,
    user_name: &str,
) -> Result<HmacSecret, AuthError> {
    debug!("finding device...");
    let dev = find_device(plugin, device).await?.ok_or(AuthError::DeviceNotFound)?;

    debug!(path = %dev.device.path, "generating hmac-secret...");
    let credential_id = plugin
        .generate_hmac_secret(&GenerateHmacSecretRequest {
            device: dev.device.path.clone(),
            pin: pin.to_string(),
            client_data_hash: [0u8; 32], // no client data
            rp_id: RELYING_PARTY.to_string(),
            user_name: user_name.to_string(),
        })
        .await?;

    Ok(HmacSecret {
        credential_id,
        salt: ks_crypto::rand_32().to_vec(),
        aaguid: dev.info.aaguid,
        no_pin: pin.is_empty(),
    })
}

struct AuthDevice {
    device: Device,
    info: DeviceInfo,
    auth: Option<Auth>,
}

async fn find_device(
    plugin: &dyn TokenPlugin,
    query: &str,
) -> Result<Option<AuthDevice>, AuthError> {
    for device in plugin.devices().await? {
        if !query.is_empty() && device.path != query && device.product != query {
            continue;
        }
        match plugin.device_info(&device.path).await {
            Ok(info) => return Ok(Some(AuthDevice { device, info, auth: None })),
            Err(e) => {
                // Not a usable token; keep scanning.
                debug!(path = %device.path, "failed to get device info: {e}");
                continue;
            }
        }
    }
    Ok(None)
}

/// Find a connected device whose AAGUID matches one of `auths`.
/// First matching device wins.
async fn find_auth(plugin: &dyn TokenPlugin, auths: &[Auth]) -> Result<AuthDevice, AuthError> {
    if auths.is_empty() {
        return Err(AuthError::InvalidAuth);
    }
    let devices = plugin.devices().await?;
    if devices.is_empty() {
        return Err(AuthError::DeviceNotFound);
    }
    for device in devices {
        let info = match plugin.device_info(&device.path).await {
            Ok(info) => info,
            Err(e) => {
                debug!(path = %device.path, "failed to get device info: {e}");
                continue;
            }
        };
        if !info.has_extension(HMAC_SECRET_EXTENSION) {
            continue;
        }
        let matched = auths.iter().find(|a| a.aaguid.as_deref() == Some(info.aaguid.as_str()));
        if let Some(auth) = matched {
            debug!(path = %device.path, "found device");
            return Ok(AuthDevice { device, info, auth: Some(auth.clone()) });
        }
    }
    Err(AuthError::DeviceNotFound)
}

async fn hmac_secret_for(
    plugin: &dyn TokenPlugin,
    auths: &[Auth],
    pin: &str,
) -> Result<(Auth, [u8; 32]), AuthError> {
    debug!("looking for device with a matching credential...");
    let auth_device = find_auth(plugin, auths).await?;
    let auth = auth_device.auth.expect("find_auth always sets auth");

    let credential_id = URL_SAFE_NO_PAD
        .decode(&auth.id)
        .map_err(|_| AuthError::Plugin("credential id was invalid".into()))?;
    let salt = auth.salt.clone().unwrap_or_default();

    debug!("getting hmac-secret...");
    let secret = plugin
        .hmac_secret(&HmacSecretRequest {
            device: auth_device.device.path,
            pin: pin.to_string(),
            client_data_hash: [0u8; 32],
            rp_id: RELYING_PARTY.to_string(),
            credential_ids: vec![credential_id],
            salt,
        })
        .await?;

    let secret: [u8; 32] = secret
        .try_into()
        .map_err(|_| AuthError::Plugin("invalid hmac-secret key length".into()))?;
    Ok((auth, secret))
}

impl AuthStore {
    /// Register an HMAC-secret credential as an auth method.
    pub async fn register_hw_token(
        &self,
        plugin: &dyn TokenPlugin,
        hs: &HmacSecret,
        mk: &MasterKey,
        pin: &str,
    ) -> Result<Auth, AuthError> {
        if hs.credential_id.len() < 32 {
            return Err(AuthError::Plugin("invalid credential id".into()));
        }
        let mut auth = Auth {
            id: URL_SAFE_NO_PAD.encode(&hs.credential_id),
            method: Method::HwToken,
            wrapped_mk: Vec::new(),
            salt: Some(hs.salt.clone()),
            aaguid: Some(hs.aaguid.clone()),
            no_pin: hs.no_pin,
            created_at: self.now_millis(),
        };

        // One round-trip to the device to obtain the wrapping key.
        let (_, key) = hmac_secret_for(plugin, std::slice::from_ref(&auth), pin).await?;
        auth.wrapped_mk = secretbox::wrap_key(&key, mk.as_bytes())?;

        self.set(&auth).await?;
        Ok(auth)
    }

    /// Authenticate with a hardware token.
    pub async fn hw_token(
        &self,
        plugin: &dyn TokenPlugin,
        pin: &str,
    ) -> Result<(Auth, MasterKey), AuthError> {
        let auths = self.list_by_method(Method::HwToken).await?;
        let (auth, key) = hmac_secret_for(plugin, &auths, pin).await?;
        match self.unwrap_mk(&auth, &key) {
            Some(mk) => Ok((auth, mk)),
            None => Err(AuthError::InvalidAuth),
        }
    }
}
