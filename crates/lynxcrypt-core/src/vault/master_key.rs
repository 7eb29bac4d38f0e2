#![forbid(unsafe_code)]

//! The master-key artifact (`masterkey.cryptomator`).
//!
//! A JSON record carrying both master keys wrapped (RFC 3394) under a
//! key-encryption key derived from the passphrase with scrypt, plus an
//! HMAC binding the legacy version field. Created once at vault init and
//! only rewritten on password change; the wrapped keys themselves never
//! change across password changes.

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretBox};
use thiserror::Error;
use zeroize::Zeroizing;

use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use unicode_normalization::UnicodeNormalization;

use crate::crypto::{
    key_wrap,
    keys::{KeyAccessError, MasterKey},
    CryptoError,
};

/// Defaults matching the reference implementation.
const DEFAULT_SCRYPT_SALT_LENGTH: usize = 8;
const DEFAULT_SCRYPT_COST_PARAM_LOG2: u8 = 15; // 2^15 = 32768
const DEFAULT_SCRYPT_BLOCK_SIZE: u32 = 8;
const DEFAULT_SCRYPT_PARALLELIZATION: u32 = 1;

/// Legacy version field, fixed at 999 since vault format 8.
const DEFAULT_MASTERKEY_FILE_VERSION: u32 = 999;

/// Errors that can occur when creating or rewriting the artifact.
#[derive(Error, Debug)]
pub enum MasterKeyCreationError {
    #[error("RNG failed: {0}")]
    Rng(String),

    #[error("Invalid scrypt parameters: {0}")]
    InvalidScryptParams(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Key wrap failed: {0}")]
    KeyWrap(#[from] key_wrap::WrapError),

    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

/// The `masterkey.cryptomator` record.
///
/// `primaryMasterKey` and `hmacMasterKey` are RFC 3394 ciphertext, not raw
/// keys; each unwraps to 32 bytes. `versionMac` is HMAC-SHA-256 over the
/// big-endian version under the HMAC key alone.
#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterKeyFile {
    /// Legacy vault version field, 999 for format-8 vaults.
    pub version: u32,

    /// scrypt salt, 8 bytes in practice.
    #[serde_as(as = "Base64")]
    pub scrypt_salt: Vec<u8>,

    /// scrypt cost parameter N, a power of two (default 32768).
    pub scrypt_cost_param: i32,

    /// scrypt block size r (default 8).
    pub scrypt_block_size: i32,

    /// Wrapped primary master key.
    #[serde_as(as = "Base64")]
    pub primary_master_key: Vec<u8>,

    /// Wrapped HMAC master key.
    #[serde_as(as = "Base64")]
    pub hmac_master_key: Vec<u8>,

    /// HMAC-SHA-256 of the version as a big-endian 32-bit integer.
    #[serde_as(as = "Base64")]
    pub version_mac: Vec<u8>,
}

impl MasterKeyFile {
    /// Parse the artifact from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Derive the key-encryption key from a passphrase.
    ///
    /// The passphrase is NFC-normalized; scrypt runs with the salt and the
    /// cost parameters stored in the artifact, `p = 1`, 32-byte output.
    pub fn derive_kek(&self, passphrase: &str) -> Result<SecretBox<[u8; 32]>, CryptoError> {
        let normalized = Zeroizing::new(passphrase.nfc().collect::<String>());

        let log2_n = log_2(self.scrypt_cost_param) as u8;
        let r = self.scrypt_block_size as u32;
        let p = DEFAULT_SCRYPT_PARALLELIZATION;

        let params = scrypt::Params::new(log2_n, r, p, 32).map_err(|e| {
            CryptoError::InvalidScryptParams(format!(
                "invalid scrypt parameters (N=2^{log2_n}, r={r}, p={p}): {e}"
            ))
        })?;

        let mut kek = Zeroizing::new([0u8; 32]);
        scrypt::scrypt(normalized.as_bytes(), &self.scrypt_salt, &params, &mut kek[..])
            .map_err(|e| CryptoError::KeyDerivationFailed(format!("scrypt failed: {e}")))?;

        Ok(SecretBox::new(Box::new(*kek)))
    }

    /// Unlock the artifact with a passphrase, unwrapping both master keys
    /// and verifying the version MAC.
    ///
    /// A wrong passphrase surfaces as
    /// [`CryptoError::KeyUnwrapIntegrityFailed`]; a failing version MAC as
    /// [`CryptoError::MacVerificationFailed`].
    pub fn unlock(&self, passphrase: &str) -> Result<MasterKey, CryptoError> {
        let kek = self.derive_kek(passphrase)?;
        self.unlock_with_kek(&kek)
    }

    fn unlock_with_kek(&self, kek: &SecretBox<[u8; 32]>) -> Result<MasterKey, CryptoError> {
        // unwrap the primary key first, then the HMAC key
        let pk = key_wrap::unwrap_key(&self.primary_master_key, kek)?;
        let pk: [u8; 32] = pk
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: pk.len(),
            })?;

        let hk = key_wrap::unwrap_key(&self.hmac_master_key, kek)?;
        let hk: [u8; 32] = hk
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: hk.len(),
            })?;

        self.check_version_mac(&hk)?;

        MasterKey::new(pk, hk).map_err(CryptoError::from)
    }

    /// Verify `versionMac` = HMAC-SHA-256(HK, BE32(version)).
    fn check_version_mac(&self, hmac_key: &[u8; 32]) -> Result<(), CryptoError> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, hmac_key);
        hmac::verify(&key, &self.version.to_be_bytes(), &self.version_mac)
            .map_err(|_| CryptoError::MacVerificationFailed)
    }
}

const fn num_bits<T>() -> usize {
    std::mem::size_of::<T>() * 8
}

fn log_2(x: i32) -> u32 {
    assert!(x > 0);
    num_bits::<i32>() as u32 - x.leading_zeros() - 1
}

/// Serialize a new artifact wrapping `master_key` under a KEK derived from
/// `passphrase` with the default scrypt parameters and a fresh salt.
pub fn create_masterkey_file(
    master_key: &MasterKey,
    passphrase: &str,
) -> Result<String, MasterKeyCreationError> {
    use crate::crypto::key_wrap::wrap_key;

    let mut salt = vec![0u8; DEFAULT_SCRYPT_SALT_LENGTH];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| MasterKeyCreationError::Rng("failed to generate salt".to_string()))?;

    let log2_n = DEFAULT_SCRYPT_COST_PARAM_LOG2;
    let r = DEFAULT_SCRYPT_BLOCK_SIZE;
    let p = DEFAULT_SCRYPT_PARALLELIZATION;

    let normalized = Zeroizing::new(passphrase.nfc().collect::<String>());
    let params = scrypt::Params::new(log2_n, r, p, 32).map_err(|e| {
        MasterKeyCreationError::InvalidScryptParams(format!(
            "invalid scrypt parameters (N=2^{log2_n}, r={r}, p={p}): {e}"
        ))
    })?;
    let mut kek = Zeroizing::new([0u8; 32]);
    scrypt::scrypt(normalized.as_bytes(), &salt, &params, &mut kek[..])
        .map_err(|e| MasterKeyCreationError::KeyDerivation(format!("scrypt failed: {e}")))?;
    let kek = SecretBox::new(Box::new(*kek));

    // wrap the primary key first, then the HMAC key
    let wrapped_pk = master_key.with_primary_key(|key| wrap_key(key, &kek))??;
    let wrapped_hk = master_key.with_hmac_key(|key| wrap_key(key, &kek))??;

    let version = DEFAULT_MASTERKEY_FILE_VERSION;
    let version_mac = master_key.with_hmac_key(|key| {
        let hmac_key = hmac::Key::new(hmac::HMAC_SHA256, key);
        hmac::sign(&hmac_key, &version.to_be_bytes()).as_ref().to_vec()
    })?;

    let file = MasterKeyFile {
        version,
        scrypt_salt: salt,
        scrypt_cost_param: 1i32 << log2_n,
        scrypt_block_size: r as i32,
        primary_master_key: wrapped_pk,
        hmac_master_key: wrapped_hk,
        version_mac,
    };

    Ok(serde_json::to_string_pretty(&file)?)
}

/// Errors that can occur when changing the vault password.
#[derive(Error, Debug)]
pub enum ChangePasswordError {
    #[error("Failed to read masterkey file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse masterkey file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to unlock vault: {0}")]
    Unlock(#[from] CryptoError),

    #[error("Failed to create new masterkey file: {0}")]
    Create(#[from] MasterKeyCreationError),

    #[error("Failed to persist new masterkey file: {0}")]
    Persist(String),
}

/// Re-wrap both master keys under a KEK derived from `new_passphrase` with
/// a fresh salt and rewrite the artifact atomically.
///
/// `PK`, `HK` and all vault content are untouched; only this one file
/// changes.
pub fn change_password(
    masterkey_path: &std::path::Path,
    old_passphrase: &str,
    new_passphrase: &str,
) -> Result<(), ChangePasswordError> {
    let text = std::fs::read_to_string(masterkey_path)?;
    let file = MasterKeyFile::from_json(&text)?;

    let master_key = file.unlock(old_passphrase)?;
    let new_text = create_masterkey_file(&master_key, new_passphrase)?;

    let parent = masterkey_path
        .parent()
        .ok_or_else(|| ChangePasswordError::Persist("no parent directory".to_string()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    std::io::Write::write_all(&mut tmp, new_text.as_bytes())?;
    tmp.persist(masterkey_path)
        .map_err(|e| ChangePasswordError::Persist(e.to_string()))?;

    Ok(())
}
