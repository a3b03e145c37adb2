use thiserror::Error;

use ks_auth::AuthError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("vault is locked")]
    Locked,

    #[error("needs setup")]
    SetupNeeded,

    #[error("already setup")]
    AlreadySetup,

    #[error("invalid auth")]
    InvalidAuth,

    #[error("{0} not found")]
    NotFound(String),

    #[error("no client key")]
    NoClientKey,

    #[error("cancelled")]
    Cancelled,

    #[error("hardware token plugin not available")]
    PluginUnavailable,

    #[error("no matching hardware token device found")]
    DeviceNotFound,

    #[error(transparent)]
    Client(#[from] ks_client::ClientError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] ks_crypto::CryptoError),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Auth error: {0}")]
    Auth(AuthError),
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidAuth => Error::InvalidAuth,
            AuthError::PluginUnavailable => Error::PluginUnavailable,
            AuthError::DeviceNotFound => Error::DeviceNotFound,
            other => Error::Auth(other),
        }
    }
}

impl Error {
    pub fn encode(e: impl std::fmt::Display) -> Self {
        Error::Encode(e.to_string())
    }
}
