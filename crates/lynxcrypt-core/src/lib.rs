//! Core engine for Cryptomator V8 vaults (SIV_GCM).
//!
//! An offline, filesystem-level cryptographic file system: cleartext paths
//! and contents on the API side, an encrypted on-disk layout of hashed
//! directory shards, AES-SIV names and AES-GCM chunked file contents on
//! the storage side.
//!
//! Start with [`vault::VaultCreator`] to initialize a vault and
//! [`vault::Vault`] to operate on one.

pub mod crypto;
pub mod fs;
pub mod vault;

pub use vault::{Vault, VaultCreator, VaultPath};
