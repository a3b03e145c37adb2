use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid auth")]
    InvalidAuth,

    #[error("hardware token plugin not available")]
    PluginUnavailable,

    #[error("no matching hardware token device found")]
    DeviceNotFound,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] ks_crypto::CryptoError),

    #[error("Plugin error: {0}")]
    Plugin(String),
}
