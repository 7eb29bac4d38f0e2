#![forbid(unsafe_code)]

//! Symbolic-link payload encryption.
//!
//! A symlink is a directory entry whose sidecar carries a `symlink.c9r`
//! file; its plaintext is the UTF-8 target path, encrypted with the regular
//! file content format. The target is stored as typed, with no existence
//! check.

use thiserror::Error;

use crate::crypto::keys::MasterKey;
use crate::fs::file::{
    decrypt_stream_with_context, encrypt_stream_with_context, FileContext, FileDecryptionError,
    FileEncryptionError, IntegrityMode,
};

#[derive(Error, Debug)]
pub enum SymlinkError {
    /// The symlink payload could not be encrypted.
    #[error("Failed to encrypt symlink target: {0}")]
    Encryption(#[from] FileEncryptionError),

    /// The symlink payload failed authentication or could not be read.
    #[error("Failed to decrypt symlink target: {0}")]
    Decryption(#[from] FileDecryptionError),

    /// The decrypted target is not valid UTF-8.
    #[error("Symlink target is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encrypt a symlink target path into `symlink.c9r` payload bytes.
pub fn encrypt_symlink_target(
    target: &str,
    master_key: &MasterKey,
) -> Result<Vec<u8>, SymlinkError> {
    let context = FileContext::new().with_filename("symlink.c9r");
    let mut out = Vec::new();
    encrypt_stream_with_context(master_key, &mut target.as_bytes(), &mut out, &context)?;
    Ok(out)
}

/// Decrypt `symlink.c9r` payload bytes into the target path.
pub fn decrypt_symlink_target(
    encrypted: &[u8],
    master_key: &MasterKey,
) -> Result<String, SymlinkError> {
    let context = FileContext::new().with_filename("symlink.c9r");
    let mut out = Vec::new();
    let mut src = encrypted;
    decrypt_stream_with_context(
        master_key,
        &mut src,
        &mut out,
        IntegrityMode::Strict,
        &context,
    )?;
    Ok(String::from_utf8(out)?)
}
