//! Filesystem-level codecs: names, file contents, symlink payloads.

pub mod file;
pub mod name;
pub mod symlink;

pub use file::{
    cleartext_size, decrypt_dir_id_backup, decrypt_header, decrypt_stream, encrypt_dir_id_backup,
    encrypt_stream, FileContext, FileDecryptionError, FileEncryptionError, FileHeader,
    IntegrityMode, CHUNK_ENCRYPTED_SIZE, CHUNK_OVERHEAD, CHUNK_PLAINTEXT_SIZE, HEADER_SIZE,
};
pub use name::{
    decrypt_name, encrypt_name, hash_dir_id, shorten_name, NameContext, NameError, NamePolicy,
};
pub use symlink::{decrypt_symlink_target, encrypt_symlink_target, SymlinkError};
