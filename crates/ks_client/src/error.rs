use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Relay error ({status}): {message}")]
    Relay { status: u16, message: String },

    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("Wire decode error: {0}")]
    Decode(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] ks_crypto::CryptoError),
}

impl ClientError {
    pub fn decode(e: impl std::fmt::Display) -> Self {
        ClientError::Decode(e.to_string())
    }
}
