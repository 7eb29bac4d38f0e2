#![forbid(unsafe_code)]

//! Vault initialization.
//!
//! Creates a fresh format-8 vault in an existing, EMPTY directory: both
//! artifacts at the vault root, the root contents shard under `d/`, and an
//! encrypted `dirid.c9r` backup of the (empty) root id inside it.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::crypto::keys::{KeyAccessError, MasterKey};
use crate::fs::file::{encrypt_dir_id_backup, FileEncryptionError};
use crate::fs::name::{hash_dir_id, NameError};
use crate::vault::config::{
    create_config_token, ConfigError, NewVaultConfig, CONFIG_FILE_NAME,
    DEFAULT_SHORTENING_THRESHOLD,
};
use crate::vault::master_key::{create_masterkey_file, MasterKeyCreationError};
use crate::vault::operations::{Vault, VaultOpenError};
use crate::vault::resolver::DIR_ID_BACKUP_FILE;

/// Errors that can occur during vault creation.
#[derive(Error, Debug)]
pub enum VaultCreationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Target directory does not exist: {0}")]
    TargetMissing(PathBuf),

    #[error("Target directory is not empty: {0}")]
    TargetNotEmpty(PathBuf),

    #[error("Failed to create masterkey file: {0}")]
    MasterkeyCreation(#[from] MasterKeyCreationError),

    #[error("Failed to create vault config: {0}")]
    ConfigCreation(#[from] ConfigError),

    #[error("Failed to hash root directory id: {0}")]
    Name(#[from] NameError),

    #[error("Failed to write root dirid backup: {0}")]
    Backup(#[from] FileEncryptionError),

    #[error("Key access error: {0}")]
    KeyAccess(#[from] KeyAccessError),

    #[error("Failed to reopen the new vault: {0}")]
    Reopen(#[from] VaultOpenError),
}

/// Builder for new vaults.
///
/// # Example
///
/// ```no_run
/// use lynxcrypt_core::vault::creator::VaultCreator;
/// use std::path::Path;
///
/// let vault = VaultCreator::new(Path::new("/path/to/empty/dir"), "passphrase")
///     .create()
///     .expect("vault creation failed");
/// ```
pub struct VaultCreator {
    vault_dir: PathBuf,
    passphrase: String,
    vault_id: String,
    shortening_threshold: usize,
}

impl VaultCreator {
    pub fn new(vault_dir: &Path, passphrase: &str) -> Self {
        Self {
            vault_dir: vault_dir.to_path_buf(),
            passphrase: passphrase.to_string(),
            vault_id: uuid::Uuid::new_v4().to_string(),
            shortening_threshold: DEFAULT_SHORTENING_THRESHOLD,
        }
    }

    /// Use a fixed vault id instead of a random UUID.
    pub fn with_vault_id(mut self, id: &str) -> Self {
        self.vault_id = id.to_string();
        self
    }

    /// Deflate encrypted names above `threshold` bytes (default 220).
    /// Lower values help storage backends with tight path limits.
    pub fn with_shortening_threshold(mut self, threshold: usize) -> Self {
        self.shortening_threshold = threshold;
        self
    }

    /// Create the vault and return an open handle onto it.
    ///
    /// Requires `vault_dir` to exist and be empty. Writes, in order: the
    /// configuration token, the master-key artifact, the root shard, the
    /// root `dirid.c9r` backup.
    pub fn create(self) -> Result<Vault, VaultCreationError> {
        if !self.vault_dir.is_dir() {
            return Err(VaultCreationError::TargetMissing(self.vault_dir));
        }
        if fs::read_dir(&self.vault_dir)?.next().is_some() {
            return Err(VaultCreationError::TargetNotEmpty(self.vault_dir));
        }

        let master_key = MasterKey::random()?;

        let token = create_config_token(
            &NewVaultConfig {
                jti: self.vault_id.clone(),
                shortening_threshold: self.shortening_threshold,
            },
            &master_key,
        )?;
        fs::write(self.vault_dir.join(CONFIG_FILE_NAME), &token)?;

        let masterkey_json = create_masterkey_file(&master_key, &self.passphrase)?;
        fs::write(
            self.vault_dir.join("masterkey.cryptomator"),
            &masterkey_json,
        )?;

        // root shard: SIV over the empty id, SHA-1, Base32, split 2/30
        let root_hash = hash_dir_id("", &master_key)?;
        let root_shard = self
            .vault_dir
            .join("d")
            .join(&root_hash[..2])
            .join(&root_hash[2..32]);
        fs::create_dir_all(&root_shard)?;

        let backup = encrypt_dir_id_backup("", &master_key)?;
        fs::write(root_shard.join(DIR_ID_BACKUP_FILE), &backup)?;

        info!(vault = %self.vault_dir.display(), id = %self.vault_id, "vault created");

        Ok(Vault::open_from_parts(self.vault_dir, master_key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::path::VaultPath;

    #[test]
    fn create_writes_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let vault = VaultCreator::new(dir.path(), "pass").create().unwrap();

        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        assert!(dir.path().join("masterkey.cryptomator").exists());

        // the config token has exactly two dots
        let token = fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(token.matches('.').count(), 2);

        // root shard exists with a header-only dirid backup
        let info = vault.resolve(&VaultPath::root()).unwrap();
        let backup = info.real_dir.join(DIR_ID_BACKUP_FILE);
        assert_eq!(fs::metadata(&backup).unwrap().len(), 68);
    }

    #[test]
    fn create_refuses_nonempty_target() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("junk"), b"x").unwrap();
        assert!(matches!(
            VaultCreator::new(dir.path(), "pass").create(),
            Err(VaultCreationError::TargetNotEmpty(_))
        ));
    }

    #[test]
    fn create_refuses_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            VaultCreator::new(&missing, "pass").create(),
            Err(VaultCreationError::TargetMissing(_))
        ));
    }
}
