#![forbid(unsafe_code)]

//! Deterministic filename encryption.
//!
//! A path component is encrypted with AES-SIV under the 512-bit key
//! `HK || PK`, with the parent directory id as associated data, and encoded
//! as padded base64url. The same primitive (with empty associated data)
//! hashes a directory id into its two-level storage shard under `d/`.
//!
//! Because AES-SIV is deterministic, encryption of the same
//! `(dir_id, name)` pair always yields the same on-disk entry, and
//! decryption failure means the entry was tampered with, renamed across
//! directories by hand, or encrypted under another key.

use aes_siv::{siv::Aes256Siv, KeyInit};
use base64::{engine::general_purpose, Engine as _};
use data_encoding::BASE32;
use ring::digest;
use std::fmt;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::crypto::keys::{KeyAccessError, MasterKey};

/// Which bytes are rejected in cleartext names.
///
/// The reference relies on host semantics; here the policy is explicit
/// configuration with a per-host default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamePolicy {
    /// Reject NUL and `/`.
    Posix,
    /// Additionally reject `<>:"\|?*` and a trailing space or dot.
    Windows,
}

impl NamePolicy {
    /// The default policy for the host this process runs on.
    pub fn host_default() -> Self {
        if cfg!(windows) {
            NamePolicy::Windows
        } else {
            NamePolicy::Posix
        }
    }

    /// Return the 1-based position of the first offending byte, if any.
    pub fn check(self, name: &str) -> Option<usize> {
        let bytes = name.as_bytes();
        for (i, &c) in bytes.iter().enumerate() {
            let illegal = match self {
                NamePolicy::Posix => c == 0 || c == b'/',
                NamePolicy::Windows => matches!(
                    c,
                    0 | b'<' | b'>' | b':' | b'"' | b'/' | b'\\' | b'|' | b'?' | b'*'
                ),
            };
            if illegal {
                return Some(i + 1);
            }
        }
        if self == NamePolicy::Windows {
            if let Some(&last) = bytes.last() {
                if last == b' ' || last == b'.' {
                    return Some(bytes.len());
                }
            }
        }
        None
    }
}

/// Context attached to name errors for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    /// The encrypted filename (if available)
    pub encrypted_name: Option<String>,
    /// The cleartext filename (if available)
    pub cleartext_name: Option<String>,
    /// The parent directory id
    pub dir_id: Option<String>,
}

impl NameContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encrypted_name(mut self, name: impl Into<String>) -> Self {
        self.encrypted_name = Some(name.into());
        self
    }

    pub fn with_cleartext_name(mut self, name: impl Into<String>) -> Self {
        self.cleartext_name = Some(name.into());
        self
    }

    pub fn with_dir_id(mut self, dir_id: impl Into<String>) -> Self {
        self.dir_id = Some(dir_id.into());
        self
    }
}

impl fmt::Display for NameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref name) = self.cleartext_name {
            parts.push(format!("name '{name}'"));
        } else if let Some(ref enc) = self.encrypted_name {
            let shown = if enc.len() > 40 {
                format!("{}...", &enc[..37])
            } else {
                enc.clone()
            };
            parts.push(format!("encrypted name '{shown}'"));
        }

        if let Some(ref dir_id) = self.dir_id {
            let shown = if dir_id.is_empty() {
                "<root>".to_string()
            } else if dir_id.len() > 12 {
                format!("{}...", &dir_id[..12])
            } else {
                dir_id.clone()
            };
            parts.push(format!("in directory {shown}"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Errors from filename encryption/decryption.
#[derive(Error, Debug)]
pub enum NameError {
    /// The cleartext name contains a byte the policy forbids.
    #[error("Illegal character at position {position} in \"{name}\"")]
    IllegalName { name: String, position: usize },

    /// AES-SIV authentication failed: the entry was tampered with, moved
    /// between directories by hand, or belongs to a different key.
    #[error("Failed to decrypt {context}: authentication failed")]
    DecryptionFailed { context: NameContext },

    /// The encoded portion of an entry is not valid base64url.
    #[error("Invalid base64 encoding for {context}: {reason}")]
    Base64Decode { reason: String, context: NameContext },

    /// The decrypted bytes are not valid UTF-8.
    #[error("Invalid UTF-8 after decryption for {context}: {reason}")]
    Utf8Decode { reason: String, context: NameContext },

    /// AES-SIV encryption failed unexpectedly (internal error).
    #[error("Unexpected encryption failure for {context}")]
    EncryptionFailed { context: NameContext },

    /// Directory-id hashing failed unexpectedly (internal error).
    #[error("Failed to hash directory id '{dir_id}'")]
    DirIdHashFailed { dir_id: String },

    /// Protected key memory could not be accessed.
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

/// Hash a directory id into its storage shard name.
///
/// The id bytes are AES-SIV encrypted with no associated data, the result
/// (16-byte tag followed by the ciphertext) is SHA-1 hashed, and the digest
/// is uppercase-Base32 encoded. The shard lives at
/// `d/{hash[0..2]}/{hash[2..32]}`.
pub fn hash_dir_id(dir_id: &str, master_key: &MasterKey) -> Result<String, NameError> {
    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let associated_data: &[&[u8]] = &[];
        let encrypted = cipher
            .encrypt(associated_data, dir_id.as_bytes())
            .map_err(|_| NameError::DirIdHashFailed {
                dir_id: dir_id.to_string(),
            })?;

        let hashed = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &encrypted);
        Ok(BASE32.encode(hashed.as_ref()))
    })?
}

/// Encrypt a single path component under its parent directory id.
///
/// The name is checked against `policy`, NFC-normalized, AES-SIV encrypted
/// with the parent id as associated data, and encoded as padded base64url.
/// The `.c9r` extension is NOT appended here; callers add it when building
/// on-disk entries.
pub fn encrypt_name(
    name: &str,
    parent_dir_id: &str,
    policy: NamePolicy,
    master_key: &MasterKey,
) -> Result<String, NameError> {
    if let Some(position) = policy.check(name) {
        return Err(NameError::IllegalName {
            name: name.to_string(),
            position,
        });
    }

    let context = NameContext::new()
        .with_cleartext_name(name)
        .with_dir_id(parent_dir_id);

    // NFC so that macOS (NFD) and Linux/Windows (NFC) agree on bytes
    let normalized: String = name.nfc().collect();

    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let associated_data: &[&[u8]] = &[parent_dir_id.as_bytes()];
        let encrypted = cipher
            .encrypt(associated_data, normalized.as_bytes())
            .map_err(|_| NameError::EncryptionFailed {
                context: context.clone(),
            })?;

        Ok(general_purpose::URL_SAFE.encode(&encrypted))
    })?
}

/// Decrypt an encoded path component.
///
/// Accepts the raw base64url form as well as the on-disk `name.c9r` form
/// (trailing `.c9r` is stripped), and tolerates missing padding for
/// interoperability with other writers.
pub fn decrypt_name(
    encrypted_name: &str,
    parent_dir_id: &str,
    master_key: &MasterKey,
) -> Result<String, NameError> {
    let context = NameContext::new()
        .with_encrypted_name(encrypted_name)
        .with_dir_id(parent_dir_id);

    let stripped = encrypted_name.trim_end_matches(".c9r");

    let decoded = general_purpose::URL_SAFE
        .decode(stripped.as_bytes())
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(stripped.as_bytes()))
        .map_err(|e| NameError::Base64Decode {
            reason: e.to_string(),
            context: context.clone(),
        })?;

    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let associated_data: &[&[u8]] = &[parent_dir_id.as_bytes()];
        let decrypted =
            cipher
                .decrypt(associated_data, &decoded)
                .map_err(|_| NameError::DecryptionFailed {
                    context: context.clone(),
                })?;

        String::from_utf8(decrypted).map_err(|e| NameError::Utf8Decode {
            reason: e.to_string(),
            context: context.clone(),
        })
    })?
}

/// Deflate an over-long on-disk name into its `.c9s` sidecar stem.
///
/// The digest is taken over the FULL on-disk name (including the `.c9r`
/// extension), which is also what the sidecar's `name.c9s` stores verbatim.
pub fn shorten_name(full_encrypted_name: &str) -> String {
    let hash = digest::digest(
        &digest::SHA1_FOR_LEGACY_USE_ONLY,
        full_encrypted_name.as_bytes(),
    );
    general_purpose::URL_SAFE.encode(hash.as_ref())
}
