//! Cryptographic primitives for the vault engine.

pub mod key_wrap;
pub mod keys;
pub mod words;

use thiserror::Error;

/// Errors that can occur during key derivation and unwrapping.
///
/// Some variants indicate potential tampering and should be treated as
/// security events; others are plain user errors (wrong password) that the
/// caller will want to present gently.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The configuration token's MAC did not verify.
    ///
    /// The vault configuration has been tampered with or corrupted; the
    /// vault should not be trusted.
    #[error("Configuration MAC verification failed - vault configuration tampered")]
    MacVerificationFailed,

    /// RFC 3394 unwrapping failed its integrity check.
    ///
    /// Almost always a wrong passphrase; cryptographically
    /// indistinguishable from a tampered master-key artifact, since both
    /// yield the wrong key-encryption key.
    #[error("Key unwrap failed - incorrect passphrase or corrupted/tampered vault")]
    KeyUnwrapIntegrityFailed,

    /// scrypt computation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// The scrypt cost parameters in the master-key artifact are invalid.
    #[error("Invalid scrypt parameters: {0}")]
    InvalidScryptParams(String),

    /// The wrapped key is not a whole number of 64-bit blocks.
    #[error("Invalid ciphertext length for key unwrap")]
    InvalidCiphertextLength,

    /// Unwrapping produced a key of unexpected length.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Protected key memory could not be accessed.
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

impl From<key_wrap::UnwrapError> for CryptoError {
    fn from(err: key_wrap::UnwrapError) -> Self {
        match err {
            key_wrap::UnwrapError::InvalidCiphertextLength
            | key_wrap::UnwrapError::CiphertextTooShort => CryptoError::InvalidCiphertextLength,
            key_wrap::UnwrapError::InvalidIntegrityCheck => CryptoError::KeyUnwrapIntegrityFailed,
        }
    }
}

// Re-export commonly used types
pub use keys::{KeyAccessError, MasterKey};
