//! ks_auth — Keysync auth store
//!
//! A small local database of auth records. Each record wraps the 32-byte
//! master key under a method-specific key:
//!
//! - **password**   — Argon2id(password, salt)
//! - **paper-key**  — BIP-39 phrase decoded to 32 bytes
//! - **hw-token**   — HMAC-secret from a hardware token (via `TokenPlugin`)
//!
//! The database file itself is unencrypted; the wrapped master keys inside
//! are sealed with the symmetric sealed box. Authentication enumerates the
//! records of one method and returns the first that unwraps to 32 bytes.

pub mod error;
pub mod paper_key;
pub mod password;
pub mod record;
pub mod store;
pub mod token;

pub use error::AuthError;
pub use paper_key::generate_paper_key;
pub use record::{Auth, MasterKey, Method};
pub use store::AuthStore;
pub use token::{Device, DeviceInfo, HmacSecret, TokenPlugin};
