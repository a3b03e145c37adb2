//! Auth records and the master key they wrap.

use zeroize::ZeroizeOnDrop;

/// The per-user 32-byte secret protecting the local vault database.
/// Held in memory only while unlocked; zeroized on drop.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Fresh random master key (setup).
    pub fn generate() -> Self {
        MasterKey(ks_crypto::rand_32())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        MasterKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// An auth method kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Password,
    PaperKey,
    HwToken,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Password => "password",
            Method::PaperKey => "paper-key",
            Method::HwToken => "hw-token",
        }
    }

    pub fn parse(s: &str) -> Option<Method> {
        match s {
            "password" => Some(Method::Password),
            "paper-key" => Some(Method::PaperKey),
            "hw-token" => Some(Method::HwToken),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored unwrap recipe for the master key under one auth method.
#[derive(Debug, Clone)]
pub struct Auth {
    /// Identifier; for hw-token records this is the encoded credential id.
    pub id: String,

    pub method: Method,

    /// Sealed master key (symmetric sealed box under the method key).
    pub wrapped_mk: Vec<u8>,

    /// KDF salt (password) or HMAC-secret salt (hw-token).
    pub salt: Option<Vec<u8>>,

    /// Authenticator model id (hw-token only).
    pub aaguid: Option<String>,

    /// Whether the hw-token credential was created without a PIN.
    pub no_pin: bool,

    /// Creation time (ms).
    pub created_at: i64,
}
