#![forbid(unsafe_code)]

//! Streaming file content encryption.
//!
//! Encrypted files consist of a 68-byte header (12-byte nonce, AES-GCM
//! ciphertext of `0xFF * 8 || content_key`, 16-byte tag) followed by zero or
//! more chunks of at most 32 KiB plaintext, each framed as
//! `nonce(12) || ciphertext || tag(16)`. Every chunk is sealed with the
//! random per-file content key and authenticated against its big-endian
//! 64-bit chunk index and the header nonce, so chunks cannot be reordered
//! or transplanted between files.
//!
//! Both directions stream through fixed-size buffers; memory usage is one
//! chunk regardless of file size.

use std::{fmt, io};

use aead::Payload;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use crate::crypto::keys::{KeyAccessError, MasterKey};

/// Size of the file header in bytes (nonce + encrypted payload + tag).
pub const HEADER_SIZE: usize = 68;

/// Size of the header and chunk nonces in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Maximum plaintext size per chunk (32 KiB).
pub const CHUNK_PLAINTEXT_SIZE: usize = 32768;

/// Overhead per chunk (nonce + tag).
pub const CHUNK_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Maximum encrypted chunk size.
pub const CHUNK_ENCRYPTED_SIZE: usize = CHUNK_PLAINTEXT_SIZE + CHUNK_OVERHEAD;

/// What to do when a content chunk fails authentication.
///
/// The reference implementation logs the damaged chunk and passes the
/// unauthenticated ciphertext through, which can salvage partially damaged
/// files but emits bytes nobody vouches for. Strict is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityMode {
    /// Abort with [`FileDecryptionError::ContentDecryption`] at the first
    /// damaged chunk.
    #[default]
    Strict,
    /// Log the damaged chunk index, emit its raw ciphertext, continue.
    Permissive,
}

/// Context for file operations, carried inside errors for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct FileContext {
    /// The cleartext filename (if known)
    pub filename: Option<String>,
    /// The encrypted path on disk
    pub encrypted_path: Option<std::path::PathBuf>,
    /// The chunk number (for content errors)
    pub chunk_number: Option<u64>,
}

impl FileContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.encrypted_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, chunk_number: u64) -> Self {
        self.chunk_number = Some(chunk_number);
        self
    }
}

impl fmt::Display for FileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref filename) = self.filename {
            parts.push(format!("file '{filename}'"));
        }
        if let Some(chunk) = self.chunk_number {
            parts.push(format!("chunk {chunk}"));
        }
        if let Some(ref path) = self.encrypted_path {
            parts.push(format!("at {:?}", path.display()));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

#[derive(Error, Debug)]
pub enum FileEncryptionError {
    /// Header encryption failed unexpectedly
    #[error("Failed to encrypt header for {context}: {reason}")]
    HeaderEncryption { reason: String, context: FileContext },

    /// Content chunk encryption failed unexpectedly
    #[error("Failed to encrypt content for {context}: {reason}")]
    ContentEncryption { reason: String, context: FileContext },

    /// IO error during encryption
    #[error("IO error writing {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: FileContext,
    },

    /// Protected key memory could not be accessed
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

impl From<io::Error> for FileEncryptionError {
    fn from(source: io::Error) -> Self {
        FileEncryptionError::Io {
            source,
            context: FileContext::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum FileDecryptionError {
    /// Header authentication failed: tampering or the wrong key.
    #[error("Failed to decrypt header for {context}: invalid authentication tag")]
    HeaderDecryption { context: FileContext },

    /// A content chunk failed authentication in strict mode.
    #[error("Failed to decrypt content for {context}: invalid authentication tag")]
    ContentDecryption { context: FileContext },

    /// The header is structurally wrong (bad length, bad magic bytes).
    #[error("Invalid file header for {context}: {reason}")]
    InvalidHeader { reason: String, context: FileContext },

    /// A trailing chunk is too short to carry a nonce and tag.
    #[error("Incomplete chunk for {context}: expected at least {CHUNK_OVERHEAD} bytes, got {actual_size}")]
    IncompleteChunk {
        context: FileContext,
        actual_size: usize,
    },

    /// IO error during decryption
    #[error("IO error reading {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: FileContext,
    },

    /// Protected key memory could not be accessed
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

impl From<io::Error> for FileDecryptionError {
    fn from(source: io::Error) -> Self {
        FileDecryptionError::Io {
            source,
            context: FileContext::new(),
        }
    }
}

/// Decrypted file header: the per-file content key plus the header nonce
/// that binds every chunk to this file.
pub struct FileHeader {
    pub content_key: Zeroizing<[u8; 32]>,
    pub nonce: [u8; NONCE_SIZE],
}

impl fmt::Debug for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHeader")
            .field("content_key", &"[REDACTED]")
            .field("nonce", &hex::encode(self.nonce))
            .finish()
    }
}

/// Plaintext size of an encrypted file of `n` on-disk bytes.
///
/// `max(0, n - 68 - 28 * ceil((n - 68) / 32796))`; 0 for header-only files
/// and for anything shorter than a header.
pub fn cleartext_size(n: u64) -> u64 {
    if n <= HEADER_SIZE as u64 {
        return 0;
    }
    let content = n - HEADER_SIZE as u64;
    let chunks = content.div_ceil(CHUNK_ENCRYPTED_SIZE as u64);
    content.saturating_sub(chunks * CHUNK_OVERHEAD as u64)
}

/// Fill `buf` as far as the source allows; a short count means EOF.
fn read_full<R: io::Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encrypt a fresh header, returning the 68 encoded bytes and the content
/// key sealed inside it.
fn encrypt_header(
    master_key: &MasterKey,
    context: &FileContext,
) -> Result<(Vec<u8>, Zeroizing<[u8; 32]>), FileEncryptionError> {
    let mut header_nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut header_nonce);

    let mut content_key = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(content_key.as_mut());

    let header = master_key.with_primary_key(|pk| {
        let key: &Key<Aes256Gcm> = pk.into();
        let cipher = Aes256Gcm::new(key);

        let mut payload = Zeroizing::new([0xFFu8; 40]);
        payload[8..].copy_from_slice(content_key.as_ref());

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&header_nonce), payload.as_ref())
            .map_err(|e| FileEncryptionError::HeaderEncryption {
                reason: e.to_string(),
                context: context.clone(),
            })?;

        let mut encoded = Vec::with_capacity(HEADER_SIZE);
        encoded.extend_from_slice(&header_nonce);
        encoded.extend_from_slice(&ciphertext);
        Ok::<Vec<u8>, FileEncryptionError>(encoded)
    })??;

    Ok((header, content_key))
}

/// Decrypt a 68-byte header and extract the content key.
///
/// The decrypted payload must begin with eight `0xFF` bytes; anything else
/// means the header was produced by something other than this format.
pub fn decrypt_header(
    encrypted_header: &[u8],
    master_key: &MasterKey,
    context: &FileContext,
) -> Result<FileHeader, FileDecryptionError> {
    if encrypted_header.len() != HEADER_SIZE {
        return Err(FileDecryptionError::InvalidHeader {
            reason: format!(
                "expected {HEADER_SIZE} bytes, got {}",
                encrypted_header.len()
            ),
            context: context.clone(),
        });
    }

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&encrypted_header[..NONCE_SIZE]);

    master_key.with_primary_key(|pk| {
        let key: &Key<Aes256Gcm> = pk.into();
        let cipher = Aes256Gcm::new(key);

        let decrypted = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                &encrypted_header[NONCE_SIZE..HEADER_SIZE],
            )
            .map_err(|_| {
                warn!("header decryption failed, authentication tag mismatch");
                FileDecryptionError::HeaderDecryption {
                    context: context.clone(),
                }
            })?;
        let decrypted = Zeroizing::new(decrypted);

        if decrypted.len() != 40 {
            return Err(FileDecryptionError::InvalidHeader {
                reason: format!("decrypted header payload has {} bytes", decrypted.len()),
                context: context.clone(),
            });
        }
        if decrypted[..8] != [0xFF; 8] {
            return Err(FileDecryptionError::InvalidHeader {
                reason: "reserved bytes are not 0xFF".to_string(),
                context: context.clone(),
            });
        }

        let mut content_key = Zeroizing::new([0u8; 32]);
        content_key.copy_from_slice(&decrypted[8..40]);
        Ok(FileHeader { content_key, nonce })
    })?
}

/// AAD for chunk `n`: the big-endian chunk index followed by the header
/// nonce.
fn chunk_aad(chunk_number: u64, header_nonce: &[u8; NONCE_SIZE]) -> [u8; 20] {
    let mut aad = [0u8; 20];
    aad[..8].copy_from_slice(&chunk_number.to_be_bytes());
    aad[8..].copy_from_slice(header_nonce);
    aad
}

/// Encrypt `src` into `dst`, returning the number of ciphertext bytes
/// written. Empty input produces a header-only 68-byte stream.
pub fn encrypt_stream<R: io::Read, W: io::Write>(
    master_key: &MasterKey,
    src: &mut R,
    dst: &mut W,
) -> Result<u64, FileEncryptionError> {
    encrypt_stream_with_context(master_key, src, dst, &FileContext::new())
}

/// Encrypt `src` into `dst` with contextual error information.
pub fn encrypt_stream_with_context<R: io::Read, W: io::Write>(
    master_key: &MasterKey,
    src: &mut R,
    dst: &mut W,
    base_context: &FileContext,
) -> Result<u64, FileEncryptionError> {
    let (header, content_key) = encrypt_header(master_key, base_context)?;
    let mut header_nonce = [0u8; NONCE_SIZE];
    header_nonce.copy_from_slice(&header[..NONCE_SIZE]);
    dst.write_all(&header)?;
    let mut written = header.len() as u64;

    let key = Key::<Aes256Gcm>::from_slice(content_key.as_ref());
    let cipher = Aes256Gcm::new(key);

    let mut buf = Zeroizing::new(vec![0u8; CHUNK_PLAINTEXT_SIZE]);
    let mut chunk_number: u64 = 0;
    loop {
        let n = read_full(src, &mut buf)?;
        if n == 0 {
            break;
        }

        let mut chunk_nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut chunk_nonce);
        let aad = chunk_aad(chunk_number, &header_nonce);

        let encrypted = cipher
            .encrypt(
                Nonce::from_slice(&chunk_nonce),
                Payload {
                    msg: &buf[..n],
                    aad: &aad,
                },
            )
            .map_err(|e| FileEncryptionError::ContentEncryption {
                reason: e.to_string(),
                context: base_context.clone().with_chunk(chunk_number),
            })?;

        dst.write_all(&chunk_nonce)?;
        dst.write_all(&encrypted)?;
        written += (NONCE_SIZE + encrypted.len()) as u64;

        trace!(chunk = chunk_number, plaintext = n, "chunk encrypted");
        chunk_number += 1;
        if n < CHUNK_PLAINTEXT_SIZE {
            break;
        }
    }

    debug!(bytes = written, chunks = chunk_number, "stream encrypted");
    Ok(written)
}

/// Decrypt `src` into `dst`, returning the number of plaintext bytes
/// written.
///
/// In [`IntegrityMode::Permissive`] a damaged chunk is logged with its
/// index and its raw ciphertext is emitted in place of plaintext, matching
/// the reference behavior; strict mode aborts instead.
pub fn decrypt_stream<R: io::Read, W: io::Write>(
    master_key: &MasterKey,
    src: &mut R,
    dst: &mut W,
    mode: IntegrityMode,
) -> Result<u64, FileDecryptionError> {
    decrypt_stream_with_context(master_key, src, dst, mode, &FileContext::new())
}

/// Decrypt `src` into `dst` with contextual error information.
pub fn decrypt_stream_with_context<R: io::Read, W: io::Write>(
    master_key: &MasterKey,
    src: &mut R,
    dst: &mut W,
    mode: IntegrityMode,
    base_context: &FileContext,
) -> Result<u64, FileDecryptionError> {
    let mut encrypted_header = [0u8; HEADER_SIZE];
    let got = read_full(src, &mut encrypted_header)?;
    if got != HEADER_SIZE {
        return Err(FileDecryptionError::InvalidHeader {
            reason: format!("file too small: expected at least {HEADER_SIZE} bytes, got {got}"),
            context: base_context.clone(),
        });
    }

    let header = decrypt_header(&encrypted_header, master_key, base_context)?;
    let key = Key::<Aes256Gcm>::from_slice(header.content_key.as_ref());
    let cipher = Aes256Gcm::new(key);

    let mut buf = vec![0u8; CHUNK_ENCRYPTED_SIZE];
    let mut chunk_number: u64 = 0;
    let mut written: u64 = 0;
    loop {
        let n = read_full(src, &mut buf)?;
        if n == 0 {
            break;
        }
        if n < CHUNK_OVERHEAD {
            return Err(FileDecryptionError::IncompleteChunk {
                context: base_context.clone().with_chunk(chunk_number),
                actual_size: n,
            });
        }

        let chunk_nonce = Nonce::from_slice(&buf[..NONCE_SIZE]);
        let aad = chunk_aad(chunk_number, &header.nonce);

        match cipher.decrypt(
            chunk_nonce,
            Payload {
                msg: &buf[NONCE_SIZE..n],
                aad: &aad,
            },
        ) {
            Ok(plaintext) => {
                let plaintext = Zeroizing::new(plaintext);
                dst.write_all(&plaintext)?;
                written += plaintext.len() as u64;
            }
            Err(_) => match mode {
                IntegrityMode::Strict => {
                    warn!(chunk = chunk_number, "chunk authentication failed");
                    return Err(FileDecryptionError::ContentDecryption {
                        context: base_context.clone().with_chunk(chunk_number),
                    });
                }
                IntegrityMode::Permissive => {
                    warn!(
                        chunk = chunk_number,
                        "chunk is damaged and won't be decrypted, passing ciphertext through"
                    );
                    let payload = &buf[NONCE_SIZE..n - TAG_SIZE];
                    dst.write_all(payload)?;
                    written += payload.len() as u64;
                }
            },
        }

        chunk_number += 1;
        if n < CHUNK_ENCRYPTED_SIZE {
            break;
        }
    }

    debug!(bytes = written, chunks = chunk_number, "stream decrypted");
    Ok(written)
}

/// Encrypt a directory id for its `dirid.c9r` backup inside the shard.
///
/// The backup uses the regular file content format over an in-memory
/// buffer; the root's empty id yields a header-only 68-byte file.
pub fn encrypt_dir_id_backup(
    dir_id: &str,
    master_key: &MasterKey,
) -> Result<Vec<u8>, FileEncryptionError> {
    let mut out = Vec::with_capacity(HEADER_SIZE + dir_id.len() + CHUNK_OVERHEAD);
    let context = FileContext::new().with_filename("dirid.c9r");
    encrypt_stream_with_context(master_key, &mut dir_id.as_bytes(), &mut out, &context)?;
    Ok(out)
}

/// Decrypt a `dirid.c9r` backup into the directory id it protects.
pub fn decrypt_dir_id_backup(
    encrypted: &[u8],
    master_key: &MasterKey,
) -> Result<String, FileDecryptionError> {
    let context = FileContext::new().with_filename("dirid.c9r");
    let mut out = Vec::new();
    let mut src = encrypted;
    decrypt_stream_with_context(
        master_key,
        &mut src,
        &mut out,
        IntegrityMode::Strict,
        &context,
    )?;
    String::from_utf8(out).map_err(|e| FileDecryptionError::InvalidHeader {
        reason: format!("dirid.c9r contains invalid UTF-8: {e}"),
        context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key() -> MasterKey {
        let mut pk = [0u8; 32];
        let mut hk = [0u8; 32];
        for i in 0..32 {
            pk[i] = i as u8;
            hk[i] = (64 + i) as u8;
        }
        MasterKey::new(pk, hk).unwrap()
    }

    fn roundtrip(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let key = test_master_key();
        let mut encrypted = Vec::new();
        encrypt_stream(&key, &mut &data[..], &mut encrypted).unwrap();
        let mut decrypted = Vec::new();
        decrypt_stream(
            &key,
            &mut encrypted.as_slice(),
            &mut decrypted,
            IntegrityMode::Strict,
        )
        .unwrap();
        (encrypted, decrypted)
    }

    #[test]
    fn empty_stream_is_header_only() {
        let (encrypted, decrypted) = roundtrip(b"");
        assert_eq!(encrypted.len(), HEADER_SIZE);
        assert!(decrypted.is_empty());
    }

    #[test]
    fn small_stream_size_and_roundtrip() {
        // header plus a single 5-byte chunk: 68 + 12 + 5 + 16
        let (encrypted, decrypted) = roundtrip(b"hello");
        assert_eq!(encrypted.len(), HEADER_SIZE + NONCE_SIZE + 5 + TAG_SIZE);
        assert_eq!(decrypted, b"hello");
        assert_eq!(cleartext_size(encrypted.len() as u64), 5);
    }

    #[test]
    fn chunk_boundaries() {
        for size in [
            1,
            CHUNK_PLAINTEXT_SIZE - 1,
            CHUNK_PLAINTEXT_SIZE,
            CHUNK_PLAINTEXT_SIZE + 1,
            2 * CHUNK_PLAINTEXT_SIZE + 100,
        ] {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let (encrypted, decrypted) = roundtrip(&data);
            assert_eq!(decrypted, data, "roundtrip failed for size {size}");

            let chunks = (size as u64).div_ceil(CHUNK_PLAINTEXT_SIZE as u64);
            assert_eq!(
                encrypted.len() as u64,
                HEADER_SIZE as u64 + size as u64 + chunks * CHUNK_OVERHEAD as u64
            );
            assert_eq!(cleartext_size(encrypted.len() as u64), size as u64);
        }
    }

    #[test]
    fn exact_multiple_does_not_append_empty_chunk() {
        let data = vec![7u8; CHUNK_PLAINTEXT_SIZE];
        let (encrypted, _) = roundtrip(&data);
        assert_eq!(
            encrypted.len(),
            HEADER_SIZE + CHUNK_ENCRYPTED_SIZE,
            "one full chunk, nothing more"
        );
    }

    #[test]
    fn flipped_bit_in_chunk_is_strict_error() {
        let key = test_master_key();
        let data = vec![42u8; CHUNK_PLAINTEXT_SIZE + 10];
        let mut encrypted = Vec::new();
        encrypt_stream(&key, &mut &data[..], &mut encrypted).unwrap();

        // flip one bit inside the second chunk's ciphertext
        let offset = HEADER_SIZE + CHUNK_ENCRYPTED_SIZE + NONCE_SIZE + 2;
        encrypted[offset] ^= 0x01;

        let mut out = Vec::new();
        let err = decrypt_stream(
            &key,
            &mut encrypted.as_slice(),
            &mut out,
            IntegrityMode::Strict,
        )
        .unwrap_err();
        match err {
            FileDecryptionError::ContentDecryption { context } => {
                assert_eq!(context.chunk_number, Some(1));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn flipped_bit_in_chunk_is_permissive_passthrough() {
        let key = test_master_key();
        let data = vec![42u8; 100];
        let mut encrypted = Vec::new();
        encrypt_stream(&key, &mut &data[..], &mut encrypted).unwrap();
        encrypted[HEADER_SIZE + NONCE_SIZE + 3] ^= 0x01;

        let mut out = Vec::new();
        decrypt_stream(
            &key,
            &mut encrypted.as_slice(),
            &mut out,
            IntegrityMode::Permissive,
        )
        .unwrap();
        // same length, divergent content
        assert_eq!(out.len(), 100);
        assert_ne!(out, data);
    }

    #[test]
    fn tampered_header_is_rejected() {
        let key = test_master_key();
        let mut encrypted = Vec::new();
        encrypt_stream(&key, &mut &b"data"[..], &mut encrypted).unwrap();
        encrypted[20] ^= 0x01; // inside the header ciphertext

        let mut out = Vec::new();
        let err = decrypt_stream(
            &key,
            &mut encrypted.as_slice(),
            &mut out,
            IntegrityMode::Strict,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FileDecryptionError::HeaderDecryption { .. }
        ));
    }

    #[test]
    fn wrong_key_fails_on_header() {
        let mut encrypted = Vec::new();
        encrypt_stream(&test_master_key(), &mut &b"data"[..], &mut encrypted).unwrap();

        let other = MasterKey::new([9u8; 32], [8u8; 32]).unwrap();
        let mut out = Vec::new();
        assert!(decrypt_stream(
            &other,
            &mut encrypted.as_slice(),
            &mut out,
            IntegrityMode::Strict
        )
        .is_err());
    }

    #[test]
    fn truncated_file_is_invalid_header() {
        let key = test_master_key();
        let mut out = Vec::new();
        let err = decrypt_stream(
            &key,
            &mut &[0u8; 40][..],
            &mut out,
            IntegrityMode::Strict,
        )
        .unwrap_err();
        assert!(matches!(err, FileDecryptionError::InvalidHeader { .. }));
    }

    #[test]
    fn cleartext_size_table() {
        assert_eq!(cleartext_size(0), 0);
        assert_eq!(cleartext_size(68), 0);
        assert_eq!(cleartext_size(68 + 28), 0); // empty chunk written by other tools
        assert_eq!(cleartext_size(68 + 12 + 5 + 16), 5);
        assert_eq!(cleartext_size(68 + 12 + 33 + 16), 33);
        assert_eq!(cleartext_size(68 + 32796), 32768);
        assert_eq!(cleartext_size(68 + 32796 + 28 + 1), 32769);
    }

    #[test]
    fn dir_id_backup_roundtrip() {
        let key = test_master_key();
        let id = "e9250eb8-078d-4fc0-8835-be92a313360c";
        let encrypted = encrypt_dir_id_backup(id, &key).unwrap();
        assert_eq!(decrypt_dir_id_backup(&encrypted, &key).unwrap(), id);

        // the root's empty id is a header-only backup
        let root = encrypt_dir_id_backup("", &key).unwrap();
        assert_eq!(root.len(), HEADER_SIZE);
        assert_eq!(decrypt_dir_id_backup(&root, &key).unwrap(), "");
    }
}
