#![forbid(unsafe_code)]

use std::sync::RwLock;

use generic_array::{typenum::U64, GenericArray};
use memsafe::MemSafe;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// Error type for key access operations.
///
/// Raised when protected key material cannot be reached, either because a
/// memory-protection syscall failed or because a thread panicked while
/// holding the key lock.
#[derive(Debug, Error)]
pub enum KeyAccessError {
    /// Memory protection operation failed (mlock, mprotect, etc.)
    #[error("Memory protection operation failed: {0}")]
    MemoryProtection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Lock was poisoned (a thread panicked while holding it)
    #[error("Key lock was poisoned")]
    LockPoisoned,
}

impl KeyAccessError {
    /// Create a memory protection error from any error type.
    pub fn memory_protection<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        KeyAccessError::MemoryProtection(Box::new(err))
    }
}

/// Error type for configuration-token validation.
#[derive(Debug, Error)]
pub enum TokenValidationError {
    /// Key access failed
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),

    /// Token signature or structure validation failed
    #[error("Token validation failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// The vault master key material.
///
/// Logically this is one 512-bit secret with several views: the primary
/// key `PK` (AES-GCM content encryption), the HMAC key `HK` (stand-alone
/// HMAC), and the two concatenation orders the format prescribes:
/// `HK || PK` for AES-SIV name operations and `PK || HK` for the
/// configuration-token MAC.
///
/// # Representation
///
/// The secret is held as a single 64-byte buffer in AES-SIV order, which
/// is what the name layer feeds to `Aes256Siv` on every path walk. The
/// individual keys are sliced views into that buffer, so the only access
/// that has to assemble (and afterwards zeroize) a temporary is the
/// token-MAC order.
///
/// # Security
///
/// The buffer lives in a `memsafe` container: pinned in RAM (no swap),
/// `PROT_NONE` while not in use, excluded from core dumps on Linux, zeroed
/// on drop. All access goes through scoped `with_*` methods that expose
/// the bytes only for the duration of a callback.
///
/// # Concurrency
///
/// The engine is single-threaded at the API boundary and shares the key
/// as `Arc<MasterKey>` within one thread. A panic while the key is
/// borrowed poisons the lock and makes the key inaccessible, which is the
/// safe failure mode.
#[derive(Debug)]
pub struct MasterKey {
    /// `HK || PK`, the AES-SIV layout.
    siv_key: RwLock<MemSafe<[u8; 64]>>,
}

/// Split the SIV-order buffer into its `(HK, PK)` halves.
fn split_keys(buf: &[u8; 64]) -> (&[u8; 32], &[u8; 32]) {
    let (hk, pk) = buf.split_at(32);
    (
        hk.try_into().expect("split_at yields a 32-byte half"),
        pk.try_into().expect("split_at yields a 32-byte half"),
    )
}

impl MasterKey {
    /// Generate a fresh random key pair from the thread CSPRNG.
    pub fn random() -> Result<Self, KeyAccessError> {
        let mut buf = Zeroizing::new([0u8; 64]);
        rand::rng().fill_bytes(buf.as_mut());
        Self::from_siv_bytes(&buf)
    }

    /// Create a key pair from raw key material.
    ///
    /// The arrays are copied into protected memory; the caller is
    /// responsible for zeroing its own copies.
    pub fn new(primary_key: [u8; 32], hmac_key: [u8; 32]) -> Result<Self, KeyAccessError> {
        let mut buf = Zeroizing::new([0u8; 64]);
        buf[..32].copy_from_slice(&hmac_key);
        buf[32..].copy_from_slice(&primary_key);
        Self::from_siv_bytes(&buf)
    }

    fn from_siv_bytes(buf: &[u8; 64]) -> Result<Self, KeyAccessError> {
        Ok(MasterKey {
            siv_key: RwLock::new(MemSafe::new(*buf).map_err(KeyAccessError::memory_protection)?),
        })
    }

    /// Clone the key pair, returning an error if the key is inaccessible.
    pub fn try_clone(&self) -> Result<Self, KeyAccessError> {
        self.with_buffer(|buf| {
            let copy = Zeroizing::new(*buf);
            Self::from_siv_bytes(&copy)
        })?
    }

    /// Borrow the protected buffer for the duration of a callback.
    fn with_buffer<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 64]) -> R,
    {
        let mut lock = self
            .siv_key
            .write()
            .map_err(|_| KeyAccessError::LockPoisoned)?;
        let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
        Ok(f(&guard))
    }

    /// Run a closure over the primary key `PK`.
    pub fn with_primary_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        self.with_buffer(|buf| f(split_keys(buf).1))
    }

    /// Run a closure over the HMAC key `HK`.
    pub fn with_hmac_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        self.with_buffer(|buf| f(split_keys(buf).0))
    }

    /// Run a closure over the combined key in AES-SIV order (`HK || PK`),
    /// straight from the protected buffer with no intermediate copy.
    pub fn with_siv_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&GenericArray<u8, U64>) -> R,
    {
        self.with_buffer(|buf| f(GenericArray::from_slice(buf)))
    }

    /// Run a closure over the combined key in `PK || HK` order.
    ///
    /// This is the order that signs and verifies the vault configuration
    /// token. It is the reverse of the stored layout, so a transient
    /// 64-byte copy is assembled and zeroed when the closure returns.
    pub fn with_raw_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8]) -> R,
    {
        self.with_buffer(|buf| {
            let (hk, pk) = split_keys(buf);
            let mut swapped = Zeroizing::new([0u8; 64]);
            swapped[..32].copy_from_slice(pk);
            swapped[32..].copy_from_slice(hk);
            f(swapped.as_ref())
        })
    }

    /// Signing key for the vault configuration token.
    ///
    /// Note that `jsonwebtoken` copies the secret internally and does not
    /// zeroize it; keep the returned key short-lived.
    pub fn token_signing_key(&self) -> Result<jsonwebtoken::EncodingKey, KeyAccessError> {
        self.with_raw_key(jsonwebtoken::EncodingKey::from_secret)
    }

    /// Validate and decode the vault configuration token in one step,
    /// keeping the window with unprotected key bytes as small as possible.
    pub fn validate_token<T>(
        &self,
        token: &str,
        validation: &jsonwebtoken::Validation,
    ) -> Result<T, TokenValidationError>
    where
        T: serde::de::DeserializeOwned,
    {
        let outcome = self.with_raw_key(|key_bytes| {
            let decoding_key = jsonwebtoken::DecodingKey::from_secret(key_bytes);
            jsonwebtoken::decode::<T>(token, &decoding_key, validation).map(|data| data.claims)
        })?;
        outcome.map_err(TokenValidationError::from)
    }
}

impl Clone for MasterKey {
    /// # Panics
    ///
    /// Panics if memory protection fails; use `try_clone` for the fallible
    /// variant.
    fn clone(&self) -> Self {
        self.try_clone()
            .expect("failed to clone MasterKey: memory protection error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_access_exposes_64_bytes() {
        let key = MasterKey::random().unwrap();
        let len = key.with_raw_key(<[u8]>::len).unwrap();
        assert_eq!(len, 64);
    }

    #[test]
    fn key_ordering() {
        let key = MasterKey::new([1u8; 32], [2u8; 32]).unwrap();

        key.with_primary_key(|k| assert_eq!(k, &[1u8; 32])).unwrap();
        key.with_hmac_key(|k| assert_eq!(k, &[2u8; 32])).unwrap();

        // SIV order is HK || PK, the stored layout
        key.with_siv_key(|k| {
            assert_eq!(&k[..32], &[2u8; 32]);
            assert_eq!(&k[32..], &[1u8; 32]);
        })
        .unwrap();

        // raw order is PK || HK
        key.with_raw_key(|k| {
            assert_eq!(&k[..32], &[1u8; 32]);
            assert_eq!(&k[32..], &[2u8; 32]);
        })
        .unwrap();
    }

    #[test]
    fn try_clone_preserves_keys() {
        let key = MasterKey::new([7u8; 32], [9u8; 32]).unwrap();
        let copy = key.try_clone().unwrap();
        copy.with_primary_key(|k| assert_eq!(k, &[7u8; 32])).unwrap();
        copy.with_hmac_key(|k| assert_eq!(k, &[9u8; 32])).unwrap();
    }
}
