//! Password auth method.

use ks_crypto::{kdf, secretbox};
use tracing::debug;

use crate::error::AuthError;
use crate::record::{Auth, MasterKey, Method};
use crate::store::AuthStore;

impl AuthStore {
    /// Register a password: derive a wrapping key from the password and a
    /// fresh salt, seal the master key under it, store the record.
    pub async fn register_password(
        &self,
        password: &str,
        mk: &MasterKey,
    ) -> Result<Auth, AuthError> {
        if password.is_empty() {
            return Err(AuthError::InvalidAuth);
        }
        let salt = kdf::generate_salt();
        let key = kdf::key_for_password(password.as_bytes(), &salt)?;
        let wrapped = secretbox::wrap_key(&key.0, mk.as_bytes())?;

        let auth = Auth {
            id: ks_crypto::rand_id(),
            method: Method::Password,
            wrapped_mk: wrapped,
            salt: Some(salt.to_vec()),
            aaguid: None,
            no_pin: false,
            created_at: self.now_millis(),
        };
        self.set(&auth).await?;
        Ok(auth)
    }

    /// Authenticate with a password. Tries every password record; the first
    /// that unwraps wins. An empty password always fails.
    pub async fn password(&self, password: &str) -> Result<(Auth, MasterKey), AuthError> {
        if password.is_empty() {
            return Err(AuthError::InvalidAuth);
        }
        let auths = self.list_by_method(Method::Password).await?;
        for auth in auths {
            let salt = match &auth.salt {
                Some(salt) => salt,
                None => continue,
            };
            let key = kdf::key_for_password(password.as_bytes(), salt)?;
            if let Some(mk) = self.unwrap_mk(&auth, &key.0) {
                debug!(id = %auth.id, "password auth ok");
                return Ok((auth, mk));
            }
        }
        Err(AuthError::InvalidAuth)
    }
}
