//! Paper key phrases
//!
//! A paper key is a 24-word BIP-39 mnemonic over 32 bytes of entropy. The
//! decoded entropy is used directly as the 32-byte wrapping key for the
//! paper-key auth method; the phrase itself is never stored.

use bip39::Mnemonic;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Generate a fresh 24-word paper key phrase.
pub fn generate_phrase() -> String {
    let entropy = crate::rand_32();
    // 32 bytes of entropy always forms a valid 24-word mnemonic.
    Mnemonic::from_entropy(&entropy)
        .expect("32-byte entropy is a valid mnemonic")
        .to_string()
}

/// Decode a paper key phrase back to its 32-byte key.
///
/// Whitespace is normalized; words are matched case-insensitively.
pub fn phrase_to_bytes(phrase: &str) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mnemonic =
        Mnemonic::parse(&normalized).map_err(|e| CryptoError::InvalidPhrase(e.to_string()))?;
    let entropy = mnemonic.to_entropy();
    if entropy.len() != 32 {
        return Err(CryptoError::InvalidPhrase(format!(
            "phrase must encode 32 bytes, got {}",
            entropy.len()
        )));
    }
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&entropy);
    Ok(out)
}
