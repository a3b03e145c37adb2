//! Paper-key auth method.
//!
//! The phrase decodes to the wrapping key directly, so no salt is stored.

use ks_crypto::{paperkey, secretbox};

use crate::error::AuthError;
use crate::record::{Auth, MasterKey, Method};
use crate::store::AuthStore;

/// Generate a fresh 24-word paper key phrase for registration.
pub fn generate_paper_key() -> String {
    paperkey::generate_phrase()
}

impl AuthStore {
    /// Register a paper key phrase.
    pub async fn register_paper_key(
        &self,
        phrase: &str,
        mk: &MasterKey,
    ) -> Result<Auth, AuthError> {
        let key = paperkey::phrase_to_bytes(phrase)?;
        let wrapped = secretbox::wrap_key(&key, mk.as_bytes())?;

        let auth = Auth {
            id: ks_crypto::rand_id(),
            method: Method::PaperKey,
            wrapped_mk: wrapped,
            salt: None,
            aaguid: None,
            no_pin: false,
            created_at: self.now_millis(),
        };
        self.set(&auth).await?;
        Ok(auth)
    }

    /// Authenticate with a paper key phrase.
    pub async fn paper_key(&self, phrase: &str) -> Result<(Auth, MasterKey), AuthError> {
        let key = match paperkey::phrase_to_bytes(phrase) {
            Ok(key) => key,
            Err(_) => return Err(AuthError::InvalidAuth),
        };
        let auths = self.list_by_method(Method::PaperKey).await?;
        for auth in auths {
            if let Some(mk) = self.unwrap_mk(&auth, &key) {
                return Ok((auth, mk));
            }
        }
        Err(AuthError::InvalidAuth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paper_key_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthStore::open(&dir.path().join("auth.db")).await.unwrap();
        let mk = MasterKey::generate();

        let phrase = generate_paper_key();
        let reg = store.register_paper_key(&phrase, &mk).await.unwrap();

        let (out, mko) = store.paper_key(&phrase).await.unwrap();
        assert_eq!(out.id, reg.id);
        assert_eq!(mko, mk);

        let other = generate_paper_key();
        assert!(matches!(store.paper_key(&other).await, Err(AuthError::InvalidAuth)));
        assert!(matches!(store.paper_key("garbage").await, Err(AuthError::InvalidAuth)));
    }
}
