#![forbid(unsafe_code)]

//! High-level vault operations.
//!
//! [`Vault`] owns the master keys, the resolver and its id cache, and
//! exposes the mutating and traversal operations: encrypt/decrypt of files
//! and trees, mkdir/remove/rmdir/rmtree, rename/move, symlinks, walk,
//! glob and listing. Every operation resolves cleartext paths through the
//! [`Resolver`] and preserves the on-disk invariants: one `dir.c9r` per
//! directory entry, a `dirid.c9r` backup per shard, `name.c9s` alongside
//! every deflated entry.
//!
//! Operations run to completion on the calling thread and hold no state
//! besides the id cache; concurrent readers are safe, writers need
//! external coordination.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, instrument, trace, warn};

use crate::crypto::keys::{KeyAccessError, MasterKey};
use crate::crypto::CryptoError;
use crate::fs::file::{
    cleartext_size, decrypt_stream_with_context, encrypt_dir_id_backup,
    encrypt_stream_with_context, FileContext, FileDecryptionError, FileEncryptionError,
    IntegrityMode,
};
use crate::fs::name::{NameError, NamePolicy};
use crate::fs::symlink::{encrypt_symlink_target, SymlinkError};
use crate::vault::config::{
    self, decode_claims_unverified, extract_master_key, read_config_token, validate_claims,
    ConfigError,
};
use crate::vault::master_key::{self, ChangePasswordError};
use crate::vault::path::{DirId, EntryKind, VaultPath};
use crate::vault::resolver::{
    EntryLocation, PathInfo, ResolveError, Resolver, CONTENTS_FILE, DIR_FILE, DIR_ID_BACKUP_FILE,
    NAME_FILE, SYMLINK_FILE, SYMLINK_HOP_LIMIT,
};

/// Errors raised while opening (or initializing a handle onto) a vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultOpenError {
    #[error("Vault directory does not exist: {0}")]
    VaultMissing(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Wrong password")]
    BadPassword,

    #[error("Invalid vault configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Vault has no encrypted root directory (expected {0})")]
    MissingRootShard(PathBuf),

    #[error("Name error: {0}")]
    Name(#[from] NameError),

    #[error("Key access error: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

/// Errors raised by vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultOpError {
    #[error("No such file or directory: {path}")]
    NotFound { path: String },

    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    #[error("Directory not empty: {path}")]
    NotEmpty { path: String },

    #[error("Is a directory: {path}")]
    IsADirectory { path: String },

    #[error("Not a directory: {path}")]
    NotADirectory { path: String },

    #[error("Source and destination are the same: {path}")]
    SameSourceAndDestination { path: String },

    #[error("Not a symlink: {path}")]
    NotASymlink { path: String },

    #[error("Cannot operate on the vault root")]
    RootForbidden,

    #[error("Invalid sort key '{key}' (expected N, S, D, E, - or !)")]
    InvalidSortKey { key: char },

    #[error("Invalid wildcard pattern: {0}")]
    BadPattern(#[from] glob::PatternError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("Encryption failed: {0}")]
    Encryption(#[from] FileEncryptionError),

    #[error("Decryption failed: {0}")]
    Decryption(#[from] FileDecryptionError),

    #[error("Symlink error: {0}")]
    Symlink(#[from] SymlinkError),

    #[error("Password change failed: {0}")]
    ChangePassword(#[from] ChangePasswordError),

    #[error("IO error at {path:?}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("Key access error: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

impl VaultOpError {
    fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        VaultOpError::Io {
            source,
            path: path.into(),
        }
    }

    fn not_found(path: impl ToString) -> Self {
        VaultOpError::NotFound {
            path: path.to_string(),
        }
    }
}

/// Counters returned by recursive operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeStats {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// One level of a [`Vault::walk`] traversal, `os.walk` style.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub root: VaultPath,
    pub dirs: Vec<String>,
    pub files: Vec<String>,
}

/// A child entry found while scanning one directory shard.
#[derive(Debug, Clone)]
struct ScannedEntry {
    name: String,
    kind: EntryKind,
    entry_path: PathBuf,
    link_target: Option<VaultPath>,
}

/// One row of directory listing output.
#[derive(Debug, Clone)]
pub struct ListRow {
    /// Directory the entry lives in.
    pub root: VaultPath,
    pub name: String,
    pub is_file: bool,
    /// Cleartext size for files, 0 for directories.
    pub size: u64,
    pub mtime: SystemTime,
    /// Lowercased extension including the dot, empty for directories.
    pub extension: String,
    /// Resolved target for symlinks.
    pub link_target: Option<VaultPath>,
}

/// Sort keys for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Size,
    Date,
    Extension,
}

/// Parsed `-s NSDE-!` listing order: any of the four keys in priority
/// order, `-` for descending, `!` for directories first.
#[derive(Debug, Clone, Default)]
pub struct SortSpec {
    pub keys: Vec<SortKey>,
    pub reverse: bool,
    pub dirs_first: bool,
}

impl SortSpec {
    pub fn parse(spec: &str) -> Result<Self, VaultOpError> {
        let mut out = SortSpec::default();
        for c in spec.chars() {
            match c {
                'N' => out.keys.push(SortKey::Name),
                'S' => out.keys.push(SortKey::Size),
                'D' => out.keys.push(SortKey::Date),
                'E' => out.keys.push(SortKey::Extension),
                '-' => out.reverse = true,
                '!' => out.dirs_first = true,
                key => return Err(VaultOpError::InvalidSortKey { key }),
            }
        }
        Ok(out)
    }
}

/// Sort listing rows in place. Rows are expected to share one `root`.
pub fn sort_rows(rows: &mut [ListRow], spec: &SortSpec) {
    use std::cmp::Ordering;

    rows.sort_by(|a, b| {
        let mut ord = Ordering::Equal;
        if spec.dirs_first {
            ord = a.is_file.cmp(&b.is_file);
        }
        for key in &spec.keys {
            if ord != Ordering::Equal {
                break;
            }
            ord = match key {
                SortKey::Name => a.name.cmp(&b.name),
                SortKey::Size => a.size.cmp(&b.size),
                SortKey::Date => a.mtime.cmp(&b.mtime),
                SortKey::Extension => a.extension.cmp(&b.extension),
            };
        }
        if spec.reverse {
            ord.reverse()
        } else {
            ord
        }
    });
}

/// An open vault.
pub struct Vault {
    base: PathBuf,
    master_key: Arc<MasterKey>,
    master_key_path: PathBuf,
    resolver: Resolver,
    integrity: IntegrityMode,
}

impl Vault {
    /// Open a vault with a passphrase.
    ///
    /// Reads and verifies the configuration token, unlocks the master-key
    /// artifact, checks the version MAC and locates the encrypted root.
    #[instrument(level = "info", skip(password), fields(vault = %directory.display()))]
    pub fn open(directory: &Path, password: &str) -> Result<Self, VaultOpenError> {
        Self::check_vault_dir(directory)?;

        let master_key = extract_master_key(directory, password).map_err(|e| match e {
            ConfigError::Crypto(CryptoError::KeyUnwrapIntegrityFailed) => {
                VaultOpenError::BadPassword
            }
            other => VaultOpenError::Config(other),
        })?;

        let token = read_config_token(directory)?;
        let claims = validate_claims(&token, &master_key)?;
        let master_key_path = config::master_key_path(directory, &token)?;

        Self::finish_open(directory, master_key, claims.shortening_threshold(), master_key_path)
    }

    /// Open a vault with raw master keys, e.g. recovered via the word
    /// codec. No MAC is verified; the caller vouches for the keys.
    #[instrument(level = "info", skip(pk, hk), fields(vault = %directory.display()))]
    pub fn open_with_keys(
        directory: &Path,
        pk: [u8; 32],
        hk: [u8; 32],
    ) -> Result<Self, VaultOpenError> {
        Self::check_vault_dir(directory)?;

        let master_key = MasterKey::new(pk, hk)?;
        let token = read_config_token(directory)?;
        let claims = decode_claims_unverified(&token)?;
        let master_key_path = config::master_key_path(directory, &token)?;

        Self::finish_open(directory, master_key, claims.shortening_threshold(), master_key_path)
    }

    /// Build a handle from an already-unlocked key, reading the threshold
    /// from the configuration token without re-verifying it. Used right
    /// after vault creation.
    pub(crate) fn open_from_parts(
        directory: PathBuf,
        master_key: MasterKey,
    ) -> Result<Self, VaultOpenError> {
        let token = read_config_token(&directory)?;
        let claims = decode_claims_unverified(&token)?;
        let master_key_path = config::master_key_path(&directory, &token)?;
        Self::finish_open(
            &directory,
            master_key,
            claims.shortening_threshold(),
            master_key_path,
        )
    }

    fn check_vault_dir(directory: &Path) -> Result<(), VaultOpenError> {
        if !directory.exists() {
            return Err(VaultOpenError::VaultMissing(directory.to_path_buf()));
        }
        if !directory.is_dir() {
            return Err(VaultOpenError::NotADirectory(directory.to_path_buf()));
        }
        Ok(())
    }

    fn finish_open(
        directory: &Path,
        master_key: MasterKey,
        threshold: usize,
        master_key_path: PathBuf,
    ) -> Result<Self, VaultOpenError> {
        let master_key = Arc::new(master_key);
        let resolver = Resolver::new(
            directory.to_path_buf(),
            Arc::clone(&master_key),
            threshold,
            NamePolicy::host_default(),
        )?;

        if !resolver.root_shard().exists() {
            return Err(VaultOpenError::MissingRootShard(
                resolver.root_shard().to_path_buf(),
            ));
        }

        info!(threshold, "vault opened");
        Ok(Vault {
            base: directory.to_path_buf(),
            master_key,
            master_key_path,
            resolver,
            integrity: IntegrityMode::Strict,
        })
    }

    /// The vault base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The unlocked master keys.
    pub fn master_key(&self) -> &MasterKey {
        &self.master_key
    }

    /// How content decryption treats damaged chunks (strict by default).
    pub fn set_integrity_mode(&mut self, mode: IntegrityMode) {
        self.integrity = mode;
    }

    /// Override the illegal-character policy for cleartext names.
    pub fn set_name_policy(&mut self, policy: NamePolicy) {
        self.resolver.set_policy(policy);
    }

    /// Resolve a virtual path.
    pub fn resolve(&self, path: &VaultPath) -> Result<PathInfo, VaultOpError> {
        Ok(self.resolver.resolve(path)?)
    }

    /// Metadata of the on-disk file backing a path: the contents file for
    /// files and directories, the payload for symlinks.
    pub fn metadata(&self, path: &VaultPath) -> Result<fs::Metadata, VaultOpError> {
        let info = self.resolve(path)?;
        if !info.exists {
            return Err(VaultOpError::not_found(path));
        }
        let target = if info.symlink.is_some() {
            info.symlink_file()
        } else {
            info.contents_file()
        };
        fs::metadata(&target).map_err(|e| VaultOpError::io(e, &target))
    }

    /// Drop the handle, letting the protected key memory zeroize.
    pub fn close(self) {}

    // ==================== content ====================

    /// Encrypt from any reader into a vault file.
    ///
    /// Creates missing intermediate directories. Refuses to overwrite an
    /// existing entry unless `force`. Returns ciphertext bytes written.
    #[instrument(level = "debug", skip(self, src), fields(path = %path))]
    pub fn write_stream<R: Read>(
        &self,
        src: &mut R,
        path: &VaultPath,
        force: bool,
    ) -> Result<u64, VaultOpError> {
        let parent = path.parent().ok_or(VaultOpError::RootForbidden)?;
        self.mkdir(&parent)?;

        let info = self.resolve(path)?;
        if info.exists {
            if info.is_dir && info.symlink.is_none() {
                return Err(VaultOpError::IsADirectory {
                    path: path.to_string(),
                });
            }
            if !force {
                return Err(VaultOpError::AlreadyExists {
                    path: path.to_string(),
                });
            }
        }

        let contents = match &info.location {
            EntryLocation::Plain { entry } => entry.clone(),
            EntryLocation::Long { sidecar, .. } => {
                fs::create_dir_all(sidecar).map_err(|e| VaultOpError::io(e, sidecar))?;
                sidecar.join(CONTENTS_FILE)
            }
        };

        let context = FileContext::new()
            .with_filename(path.file_name().unwrap_or_default())
            .with_path(&contents);
        let written = self.atomic_write_with(&contents, |out| {
            encrypt_stream_with_context(&self.master_key, src, out, &context)
        })?;

        // the sidecar's name.c9s goes last so an interrupted create leaves
        // no entry the resolver will hand out
        if let (Some(name_file), Some(full_name)) = (info.name_file(), info.location.long_name()) {
            self.atomic_write(&name_file, full_name.as_bytes())?;
        }

        debug!(bytes = written, "vault file written");
        Ok(written)
    }

    /// Encrypt a real file into the vault, restoring its timestamps.
    /// With `unlink_source` the source file is deleted afterwards.
    #[instrument(level = "info", skip(self), fields(src = %src.display(), dst = %dst))]
    pub fn encrypt_file(
        &self,
        src: &Path,
        dst: &VaultPath,
        force: bool,
        unlink_source: bool,
    ) -> Result<u64, VaultOpError> {
        let mut reader = fs::File::open(src).map_err(|e| VaultOpError::io(e, src))?;
        let written = self.write_stream(&mut reader, dst, force)?;
        drop(reader);

        let meta = fs::metadata(src).map_err(|e| VaultOpError::io(e, src))?;
        let info = self.resolve(dst)?;
        restore_times(&info.contents_file(), &meta)?;

        if unlink_source {
            fs::remove_file(src).map_err(|e| VaultOpError::io(e, src))?;
        }
        Ok(written)
    }

    /// Decrypt a vault file into any writer, following symlink chains.
    /// Returns plaintext bytes written.
    #[instrument(level = "debug", skip(self, out), fields(path = %path))]
    pub fn read_to_writer<W: Write>(
        &self,
        path: &VaultPath,
        out: &mut W,
    ) -> Result<u64, VaultOpError> {
        let info = self.follow_links(self.resolve(path)?)?;
        if !info.exists {
            return Err(VaultOpError::not_found(&info.pathname));
        }
        if info.is_dir {
            return Err(VaultOpError::IsADirectory {
                path: info.pathname.to_string(),
            });
        }

        let contents = info.contents_file();
        let mut src = fs::File::open(&contents).map_err(|e| VaultOpError::io(e, &contents))?;
        let context = FileContext::new()
            .with_filename(path.file_name().unwrap_or_default())
            .with_path(&contents);
        Ok(decrypt_stream_with_context(
            &self.master_key,
            &mut src,
            out,
            self.integrity,
            &context,
        )?)
    }

    /// Decrypt a vault file to a real path, restoring timestamps.
    /// With `unlink_source` the vault entry is removed afterwards.
    #[instrument(level = "info", skip(self), fields(src = %src, dst = %dst.display()))]
    pub fn decrypt_file(
        &self,
        src: &VaultPath,
        dst: &Path,
        force: bool,
        unlink_source: bool,
    ) -> Result<u64, VaultOpError> {
        if dst.exists() && !force {
            return Err(VaultOpError::AlreadyExists {
                path: dst.display().to_string(),
            });
        }
        if let Some(parent) = dst.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| VaultOpError::io(e, parent))?;
            }
        }

        let info = self.follow_links(self.resolve(src)?)?;
        let contents = info.contents_file();

        let mut out = fs::File::create(dst).map_err(|e| VaultOpError::io(e, dst))?;
        let written = self.read_to_writer(src, &mut out)?;
        drop(out);

        if let Ok(meta) = fs::metadata(&contents) {
            restore_times(dst, &meta)?;
        }
        if unlink_source {
            self.remove(src)?;
        }
        Ok(written)
    }

    /// Encrypt a whole real directory tree under `dst/basename(src)`.
    #[instrument(level = "info", skip(self), fields(src = %src.display(), dst = %dst))]
    pub fn encrypt_tree(
        &self,
        src: &Path,
        dst: &VaultPath,
        force: bool,
        unlink_source: bool,
    ) -> Result<TreeStats, VaultOpError> {
        let base_name = src
            .file_name()
            .ok_or_else(|| VaultOpError::not_found(src.display()))?
            .to_string_lossy()
            .into_owned();
        let root_dst = dst.join(&base_name);
        self.mkdir(&root_dst)?;

        let mut stats = TreeStats {
            directories: 1,
            ..TreeStats::default()
        };
        for entry in walkdir::WalkDir::new(src).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                match e.into_io_error() {
                    Some(source) => VaultOpError::io(source, path),
                    None => VaultOpError::not_found(path.display()),
                }
            })?;
            let rel = entry
                .path()
                .strip_prefix(src)
                .expect("walkdir yields children of src");
            let mut vpath = root_dst.clone();
            for comp in rel.components() {
                vpath = vpath.join(comp.as_os_str().to_string_lossy());
            }
            if entry.file_type().is_dir() {
                self.mkdir(&vpath)?;
                stats.directories += 1;
            } else {
                // files only; host symlinks are followed by walkdir
                stats.bytes += self.encrypt_file(entry.path(), &vpath, force, unlink_source)?;
                stats.files += 1;
            }
        }

        if unlink_source {
            fs::remove_dir_all(src).map_err(|e| VaultOpError::io(e, src))?;
        }
        Ok(stats)
    }

    /// Decrypt a vault subtree into a real directory.
    #[instrument(level = "info", skip(self), fields(src = %src, dst = %dst.display()))]
    pub fn decrypt_tree(
        &self,
        src: &VaultPath,
        dst: &Path,
        force: bool,
        unlink_source: bool,
    ) -> Result<TreeStats, VaultOpError> {
        let info = self.resolve(src)?;
        if !info.exists {
            return Err(VaultOpError::not_found(src));
        }

        let strip = src.parent().unwrap_or_else(VaultPath::root);
        let mut stats = TreeStats::default();
        for level in self.walk(src)? {
            stats.directories += 1;
            let rel = level
                .root
                .as_str()
                .strip_prefix(strip.as_str())
                .unwrap_or(level.root.as_str())
                .trim_start_matches('/');
            let out_dir = dst.join(rel);
            fs::create_dir_all(&out_dir).map_err(|e| VaultOpError::io(e, &out_dir))?;
            for dir in &level.dirs {
                let sub = out_dir.join(dir);
                fs::create_dir_all(&sub).map_err(|e| VaultOpError::io(e, &sub))?;
            }
            for file in &level.files {
                let vfile = level.root.join(file);
                stats.bytes += self.decrypt_file(&vfile, &out_dir.join(file), force, false)?;
                stats.files += 1;
            }
        }

        if unlink_source {
            self.rmtree(src)?;
        }
        Ok(stats)
    }

    // ==================== directories ====================

    /// Create a directory (and any missing ancestors), returning its
    /// contents shard.
    ///
    /// Per level, writes go in crash-cleanable order: the entry directory
    /// and its `dir.c9r`, then the shard with its `dirid.c9r` backup, then
    /// `name.c9s` for deflated names.
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn mkdir(&self, path: &VaultPath) -> Result<PathBuf, VaultOpError> {
        loop {
            let info = self.resolve(path)?;
            if info.exists {
                if !info.is_dir {
                    return Err(VaultOpError::NotADirectory {
                        path: info.pathname.to_string(),
                    });
                }
                return Ok(info.real_dir);
            }

            let entry = info.location.entry_path().to_path_buf();
            if entry.exists() {
                // a file already occupies this name
                return Err(VaultOpError::AlreadyExists {
                    path: info.pathname.to_string(),
                });
            }

            trace!(level = %info.pathname, "creating directory level");
            fs::create_dir_all(&entry).map_err(|e| VaultOpError::io(e, &entry))?;

            let new_id = DirId::random();
            self.atomic_write(&entry.join(DIR_FILE), new_id.as_str().as_bytes())?;

            let shard = self.resolver.shard_path(&new_id)?;
            fs::create_dir_all(&shard).map_err(|e| VaultOpError::io(e, &shard))?;
            let backup = encrypt_dir_id_backup(new_id.as_str(), &self.master_key)?;
            self.atomic_write(&shard.join(DIR_ID_BACKUP_FILE), &backup)?;

            if let (Some(name_file), Some(full_name)) =
                (info.name_file(), info.location.long_name())
            {
                self.atomic_write(&name_file, full_name.as_bytes())?;
            }
        }
    }

    /// Delete a file or symlink.
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn remove(&self, path: &VaultPath) -> Result<(), VaultOpError> {
        let info = self.resolve(path)?;
        if !info.exists {
            return Err(VaultOpError::not_found(path));
        }
        if info.is_dir && info.symlink.is_none() {
            return Err(VaultOpError::IsADirectory {
                path: path.to_string(),
            });
        }

        let entry = info.location.entry_path().to_path_buf();
        if let Some(sym) = &info.symlink {
            // symlink entry: payload, legacy dir.c9r copy, long name, node
            let legacy_dir_file = entry.join(DIR_FILE);
            if legacy_dir_file.exists() {
                fs::remove_file(&legacy_dir_file)
                    .map_err(|e| VaultOpError::io(e, &legacy_dir_file))?;
                self.resolver.evict(&legacy_dir_file);
            }
            fs::remove_file(&sym.payload).map_err(|e| VaultOpError::io(e, &sym.payload))?;
            if let Some(name_file) = info.name_file() {
                if name_file.exists() {
                    fs::remove_file(&name_file).map_err(|e| VaultOpError::io(e, &name_file))?;
                }
            }
            fs::remove_dir(&entry).map_err(|e| VaultOpError::io(e, &entry))?;
        } else if info.location.is_long() {
            // deflated file: name.c9s, contents.c9r, then the sidecar
            if let Some(name_file) = info.name_file() {
                if name_file.exists() {
                    fs::remove_file(&name_file).map_err(|e| VaultOpError::io(e, &name_file))?;
                }
            }
            let contents = entry.join(CONTENTS_FILE);
            if contents.exists() {
                fs::remove_file(&contents).map_err(|e| VaultOpError::io(e, &contents))?;
            }
            fs::remove_dir(&entry).map_err(|e| VaultOpError::io(e, &entry))?;
        } else {
            fs::remove_file(&entry).map_err(|e| VaultOpError::io(e, &entry))?;
        }

        debug!("entry removed");
        Ok(())
    }

    /// Delete an empty directory.
    ///
    /// Only the shard's `dirid.c9r` backup may remain inside; anything
    /// else is [`VaultOpError::NotEmpty`]. Removes the backup, the shard,
    /// best-effort the two-character prefix directory, then the entry, and
    /// evicts the id cache.
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn rmdir(&self, path: &VaultPath) -> Result<(), VaultOpError> {
        if path.is_root() {
            return Err(VaultOpError::RootForbidden);
        }
        let info = self.resolve(path)?;
        if !info.exists {
            return Err(VaultOpError::not_found(path));
        }
        if !info.is_dir || info.symlink.is_some() {
            return Err(VaultOpError::NotADirectory {
                path: path.to_string(),
            });
        }

        let shard = &info.real_dir;
        let leftovers = fs::read_dir(shard)
            .map_err(|e| VaultOpError::io(e, shard))?
            .filter_map(Result::ok)
            .any(|e| e.file_name() != DIR_ID_BACKUP_FILE);
        if leftovers {
            return Err(VaultOpError::NotEmpty {
                path: path.to_string(),
            });
        }

        let backup = shard.join(DIR_ID_BACKUP_FILE);
        if backup.exists() {
            fs::remove_file(&backup).map_err(|e| VaultOpError::io(e, &backup))?;
        }
        fs::remove_dir(shard).map_err(|e| VaultOpError::io(e, shard))?;
        if let Some(prefix) = shard.parent() {
            // shared with other shards more often than not
            let _ = fs::remove_dir(prefix);
        }

        let entry = info.location.entry_path().to_path_buf();
        let dir_file = entry.join(DIR_FILE);
        if let Some(name_file) = info.name_file() {
            if name_file.exists() {
                fs::remove_file(&name_file).map_err(|e| VaultOpError::io(e, &name_file))?;
            }
        }
        fs::remove_file(&dir_file).map_err(|e| VaultOpError::io(e, &dir_file))?;
        fs::remove_dir(&entry).map_err(|e| VaultOpError::io(e, &entry))?;
        self.resolver.evict(&dir_file);

        debug!("directory removed");
        Ok(())
    }

    /// Delete a whole subtree: files first, then directories bottom-up,
    /// then the subtree root.
    #[instrument(level = "info", skip(self), fields(path = %path))]
    pub fn rmtree(&self, path: &VaultPath) -> Result<TreeStats, VaultOpError> {
        let info = self.resolve(path)?;
        if !info.exists {
            return Err(VaultOpError::not_found(path));
        }
        if !info.is_dir || info.symlink.is_some() {
            return Err(VaultOpError::NotADirectory {
                path: path.to_string(),
            });
        }

        let mut stats = TreeStats::default();
        let levels = self.walk(path)?;
        for level in &levels {
            for file in &level.files {
                self.remove(&level.root.join(file))?;
                stats.files += 1;
            }
        }
        for level in levels.iter().rev() {
            for dir in &level.dirs {
                self.rmdir(&level.root.join(dir))?;
                stats.directories += 1;
            }
        }
        self.rmdir(path)?;
        stats.directories += 1;

        info!(
            files = stats.files,
            directories = stats.directories,
            "subtree removed"
        );
        Ok(stats)
    }

    // ==================== move/rename ====================

    /// Move or rename a file, directory or symlink.
    ///
    /// Renames only the encrypted entry in the parent shard; a directory's
    /// id (and with it every descendant) is untouched. If `dst` is an
    /// existing directory the effective target is `dst/basename(src)`; an
    /// existing empty directory may be overwritten by a directory source,
    /// an existing file is never overwritten.
    #[instrument(level = "info", skip(self), fields(src = %src, dst = %dst))]
    pub fn mv(&self, src: &VaultPath, dst: &VaultPath) -> Result<(), VaultOpError> {
        if src.is_root() {
            return Err(VaultOpError::RootForbidden);
        }
        let a = self.resolve(src)?;
        if !a.exists {
            return Err(VaultOpError::not_found(src));
        }
        let b = self.resolve(dst)?;
        if a.location.entry_path() == b.location.entry_path() {
            return Err(VaultOpError::SameSourceAndDestination {
                path: src.to_string(),
            });
        }

        let target = if b.exists {
            if !b.is_dir {
                return Err(VaultOpError::AlreadyExists {
                    path: dst.to_string(),
                });
            }
            // moving into a directory: target is dst/basename(src)
            let name = src
                .file_name()
                .ok_or(VaultOpError::RootForbidden)?
                .to_string();
            let target_path = dst.join(&name);
            let c = self.resolve(&target_path)?;
            if c.exists {
                if !c.is_dir || c.symlink.is_some() {
                    return Err(VaultOpError::AlreadyExists {
                        path: target_path.to_string(),
                    });
                }
                if !(a.is_dir && a.symlink.is_none()) {
                    return Err(VaultOpError::AlreadyExists {
                        path: target_path.to_string(),
                    });
                }
                if self.shard_has_entries(&c.real_dir)? {
                    return Err(VaultOpError::NotEmpty {
                        path: target_path.to_string(),
                    });
                }
                // an empty directory target is replaced
                self.rmdir(&target_path)?;
                self.resolve(&target_path)?
            } else {
                c
            }
        } else {
            if b.pathname != *dst {
                // a parent of dst is missing
                return Err(VaultOpError::not_found(&b.pathname));
            }
            b
        };

        self.rename_entry(&a, &target)
    }

    /// Rename `a`'s on-disk entry into `b`'s location, handling every
    /// combination of plain and deflated forms.
    fn rename_entry(&self, a: &PathInfo, b: &PathInfo) -> Result<(), VaultOpError> {
        let a_entry = a.location.entry_path().to_path_buf();
        let b_entry = b.location.entry_path().to_path_buf();

        let a_is_container = a_entry.is_dir();
        if a_is_container {
            let deflated_file = a_entry.join(CONTENTS_FILE).exists();
            if deflated_file && !b.location.is_long() {
                // deflated file inflates back to a plain .c9r file
                let contents = a_entry.join(CONTENTS_FILE);
                fs::rename(&contents, &b_entry).map_err(|e| VaultOpError::io(e, &contents))?;
                let name_file = a_entry.join(NAME_FILE);
                if name_file.exists() {
                    fs::remove_file(&name_file).map_err(|e| VaultOpError::io(e, &name_file))?;
                }
                fs::remove_dir(&a_entry).map_err(|e| VaultOpError::io(e, &a_entry))?;
            } else {
                fs::rename(&a_entry, &b_entry).map_err(|e| VaultOpError::io(e, &a_entry))?;
                match b.location.long_name() {
                    Some(full_name) => {
                        self.atomic_write(&b_entry.join(NAME_FILE), full_name.as_bytes())?;
                    }
                    None => {
                        let name_file = b_entry.join(NAME_FILE);
                        if name_file.exists() {
                            fs::remove_file(&name_file)
                                .map_err(|e| VaultOpError::io(e, &name_file))?;
                        }
                    }
                }
            }
        } else if let EntryLocation::Long { sidecar, full_name } = &b.location {
            // plain file deflates into a fresh sidecar
            fs::create_dir_all(sidecar).map_err(|e| VaultOpError::io(e, sidecar))?;
            fs::rename(&a_entry, sidecar.join(CONTENTS_FILE))
                .map_err(|e| VaultOpError::io(e, &a_entry))?;
            self.atomic_write(&sidecar.join(NAME_FILE), full_name.as_bytes())?;
        } else {
            fs::rename(&a_entry, &b_entry).map_err(|e| VaultOpError::io(e, &a_entry))?;
        }

        // a moved dir.c9r must not be served from its old path
        self.resolver.evict(&a_entry.join(DIR_FILE));
        debug!("entry renamed");
        Ok(())
    }

    /// Whether a shard holds anything besides its `dirid.c9r` backup.
    fn shard_has_entries(&self, shard: &Path) -> Result<bool, VaultOpError> {
        if !shard.exists() {
            return Ok(false);
        }
        Ok(fs::read_dir(shard)
            .map_err(|e| VaultOpError::io(e, shard))?
            .filter_map(Result::ok)
            .any(|e| e.file_name() != DIR_ID_BACKUP_FILE))
    }

    // ==================== symlinks ====================

    /// Create a symbolic link holding `target` (no existence check on the
    /// target). With `legacy`, a link to a directory also gets a copy of
    /// the target's `dir.c9r`, which older clients expect.
    #[instrument(level = "info", skip(self), fields(target, link = %link))]
    pub fn symlink(&self, target: &str, link: &VaultPath, legacy: bool) -> Result<(), VaultOpError> {
        let info = self.resolve(link)?;
        if info.exists {
            return Err(VaultOpError::AlreadyExists {
                path: link.to_string(),
            });
        }
        if info.pathname != *link {
            return Err(VaultOpError::not_found(&info.pathname));
        }

        let mut stored_target = target.to_string();
        if self.resolver.policy() == NamePolicy::Windows && target.starts_with('/') {
            stored_target = relative_target(&VaultPath::new(target), link);
            warn!(
                converted = %stored_target,
                "absolute symlink targets do not work on Windows hosts, storing a relative path"
            );
        }

        let entry = info.location.entry_path().to_path_buf();
        fs::create_dir_all(&entry).map_err(|e| VaultOpError::io(e, &entry))?;

        // payload first, then the legacy marker, name.c9s last
        let payload = encrypt_symlink_target(&stored_target, &self.master_key)?;
        self.atomic_write(&entry.join(SYMLINK_FILE), &payload)?;

        if legacy {
            let target_info = self.resolve(&VaultPath::new(target))?;
            if target_info.exists && target_info.is_dir {
                if let Some(dir_file) = target_info.dir_file() {
                    fs::copy(&dir_file, entry.join(DIR_FILE))
                        .map_err(|e| VaultOpError::io(e, &dir_file))?;
                }
            }
        }

        if let (Some(name_file), Some(full_name)) = (info.name_file(), info.location.long_name()) {
            self.atomic_write(&name_file, full_name.as_bytes())?;
        }

        info!("symlink created");
        Ok(())
    }

    /// Read a symlink's stored target.
    pub fn read_symlink(&self, path: &VaultPath) -> Result<VaultPath, VaultOpError> {
        let info = self.resolve(path)?;
        if !info.exists {
            return Err(VaultOpError::not_found(path));
        }
        match info.symlink {
            Some(sym) => Ok(sym.points_to),
            None => Err(VaultOpError::NotASymlink {
                path: path.to_string(),
            }),
        }
    }

    /// Follow a chain of symlinks to its final target, with a hop cap.
    fn follow_links(&self, mut info: PathInfo) -> Result<PathInfo, VaultOpError> {
        let mut hops = 0usize;
        while let Some(sym) = info.symlink.clone() {
            hops += 1;
            if hops > SYMLINK_HOP_LIMIT {
                return Err(VaultOpError::Resolve(ResolveError::SymlinkLoop {
                    path: info.pathname.to_string(),
                }));
            }
            let target = sym.points_to;
            trace!(hop = hops, target = %target, "following symlink");
            info = self.resolve(&target)?;
            if !info.exists {
                return Err(VaultOpError::not_found(&target));
            }
        }
        Ok(info)
    }

    // ==================== traversal ====================

    /// Walk a subtree, yielding one entry per directory with the decrypted
    /// child names, top-down. Entries whose names fail to decrypt are
    /// skipped with a warning; symlinks are listed among the files.
    pub fn walk(&self, path: &VaultPath) -> Result<Vec<WalkEntry>, VaultOpError> {
        let info = self.resolve(path)?;
        if !info.exists {
            return Err(VaultOpError::not_found(path));
        }
        if !info.is_dir {
            return Err(VaultOpError::NotADirectory {
                path: path.to_string(),
            });
        }

        let mut out = Vec::new();
        self.walk_into(path.clone(), &info.dir_id, &info.real_dir, &mut out)?;
        Ok(out)
    }

    fn walk_into(
        &self,
        root: VaultPath,
        dir_id: &DirId,
        shard: &Path,
        out: &mut Vec<WalkEntry>,
    ) -> Result<(), VaultOpError> {
        let scanned = self.scan_shard(dir_id, shard, &root)?;
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut children = Vec::new();
        for entry in scanned {
            match entry.kind {
                EntryKind::Directory => {
                    if let Some(child_id) = self.resolver.dir_id_at(&entry.entry_path.join(DIR_FILE))? {
                        children.push((entry.name.clone(), child_id));
                    }
                    dirs.push(entry.name);
                }
                _ => files.push(entry.name),
            }
        }
        out.push(WalkEntry {
            root: root.clone(),
            dirs,
            files,
        });
        for (name, child_id) in children {
            let child_shard = self.resolver.shard_path(&child_id)?;
            self.walk_into(root.join(&name), &child_id, &child_shard, out)?;
        }
        Ok(())
    }

    /// Decrypt and classify every child in one shard.
    fn scan_shard(
        &self,
        dir_id: &DirId,
        shard: &Path,
        root: &VaultPath,
    ) -> Result<Vec<ScannedEntry>, VaultOpError> {
        let mut out = Vec::new();
        let reader = fs::read_dir(shard).map_err(|e| VaultOpError::io(e, shard))?;
        for entry in reader {
            let entry = entry.map_err(|e| VaultOpError::io(e, shard))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name == DIR_ID_BACKUP_FILE {
                continue;
            }
            let entry_path = entry.path();
            let is_container = entry_path.is_dir();

            let decrypted = if file_name.ends_with(".c9s") {
                let name_file = entry_path.join(NAME_FILE);
                match fs::read_to_string(&name_file) {
                    Ok(full_name) => {
                        crate::fs::name::decrypt_name(full_name.trim(), dir_id.as_str(), &self.master_key)
                    }
                    Err(e) => {
                        warn!(path = %name_file.display(), error = %e, "sidecar without readable name.c9s, skipping");
                        continue;
                    }
                }
            } else if file_name.ends_with(".c9r") {
                crate::fs::name::decrypt_name(&file_name, dir_id.as_str(), &self.master_key)
            } else {
                trace!(name = %file_name, "ignoring foreign entry");
                continue;
            };

            let name = match decrypted {
                Ok(name) => name,
                Err(e) => {
                    warn!(entry = %entry_path.display(), error = %e, "undecryptable name, skipping entry");
                    continue;
                }
            };

            let kind = if !is_container {
                EntryKind::File
            } else if entry_path.join(SYMLINK_FILE).exists() {
                EntryKind::Symlink
            } else if entry_path.join(DIR_FILE).exists() {
                EntryKind::Directory
            } else if entry_path.join(CONTENTS_FILE).exists() {
                EntryKind::File
            } else {
                warn!(entry = %entry_path.display(), "entry directory without markers, skipping");
                continue;
            };

            let link_target = if kind == EntryKind::Symlink {
                self.peek_link_target(&entry_path.join(SYMLINK_FILE), &root.join(&name))
            } else {
                None
            };

            out.push(ScannedEntry {
                name,
                kind,
                entry_path,
                link_target,
            });
        }
        Ok(out)
    }

    /// Best-effort decryption of a link target for listings.
    fn peek_link_target(&self, payload: &Path, link_path: &VaultPath) -> Option<VaultPath> {
        let encrypted = fs::read(payload).ok()?;
        let target = crate::fs::symlink::decrypt_symlink_target(&encrypted, &self.master_key)
            .map_err(|e| {
                warn!(path = %payload.display(), error = %e, "unreadable symlink payload");
            })
            .ok()?;
        if target.starts_with('/') {
            Some(VaultPath::new(&target))
        } else {
            let parent = link_path.parent().unwrap_or_else(VaultPath::root);
            Some(parent.join(&target).normalized())
        }
    }

    /// Expand shell-style wildcards (`*`, `?`, per component) into the
    /// matching virtual paths. Matching is case-sensitive on POSIX hosts
    /// and case-insensitive on Windows hosts.
    pub fn glob(&self, pattern: &str) -> Result<Vec<VaultPath>, VaultOpError> {
        let (mut base, mut predicates) = split_wildcard(pattern);

        if predicates.is_empty() {
            let info = self.resolve(&base)?;
            if !info.exists || !info.is_dir {
                // treat the final component as an exact-match predicate
                match base.split() {
                    Some((parent, name)) => {
                        let name = name.to_string();
                        base = parent;
                        predicates = vec![name];
                    }
                    None => return Ok(Vec::new()),
                }
            }
        }

        let info = self.resolve(&base)?;
        if !info.exists || !info.is_dir {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        self.glob_into(&base, &info.dir_id, &info.real_dir, &predicates, &mut out)?;
        Ok(out)
    }

    fn glob_into(
        &self,
        root: &VaultPath,
        dir_id: &DirId,
        shard: &Path,
        predicates: &[String],
        out: &mut Vec<VaultPath>,
    ) -> Result<(), VaultOpError> {
        let scanned = self.scan_shard(dir_id, shard, root)?;

        if predicates.is_empty() {
            // a bare directory pattern lists its children
            out.extend(scanned.into_iter().map(|e| root.join(e.name)));
            return Ok(());
        }

        let pattern = glob::Pattern::new(&predicates[0])?;
        let options = glob::MatchOptions {
            // host filename-matching semantics, as fnmatch has them
            case_sensitive: !cfg!(windows),
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        let rest = &predicates[1..];
        for entry in scanned {
            if !pattern.matches_with(&entry.name, options) {
                continue;
            }
            let is_dir = entry.kind == EntryKind::Directory;
            if rest.is_empty() {
                out.push(root.join(&entry.name));
            } else if is_dir {
                // intermediate predicates match directories only
                if let Some(child_id) = self.resolver.dir_id_at(&entry.entry_path.join(DIR_FILE))? {
                    let child_shard = self.resolver.shard_path(&child_id)?;
                    self.glob_into(&root.join(&entry.name), &child_id, &child_shard, rest, out)?;
                }
            }
        }
        Ok(())
    }

    // ==================== listing ====================

    /// Produce listing rows for one path, optionally recursing.
    ///
    /// A symlink argument is followed; a file argument yields its own row.
    pub fn list(&self, path: &VaultPath, recursive: bool) -> Result<Vec<ListRow>, VaultOpError> {
        let info = self.resolve(path)?;
        if !info.exists {
            return Err(VaultOpError::not_found(path));
        }

        let (effective, link_target) = match &info.symlink {
            Some(sym) => (sym.points_to.clone(), Some(sym.points_to.clone())),
            None => (path.clone(), None),
        };

        if !info.is_dir {
            let contents = if info.symlink.is_some() {
                info.symlink_file()
            } else {
                info.contents_file()
            };
            let meta = fs::metadata(&contents).map_err(|e| VaultOpError::io(e, &contents))?;
            let name = path.file_name().unwrap_or_default().to_string();
            return Ok(vec![ListRow {
                root: path.parent().unwrap_or_else(VaultPath::root),
                extension: extension_of(&name),
                size: cleartext_size(meta.len()),
                mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                is_file: true,
                name,
                link_target,
            }]);
        }

        let target_info = self.follow_links(info)?;
        let mut rows = Vec::new();
        self.list_into(&effective, &target_info.dir_id, &target_info.real_dir, recursive, &mut rows)?;
        Ok(rows)
    }

    fn list_into(
        &self,
        root: &VaultPath,
        dir_id: &DirId,
        shard: &Path,
        recursive: bool,
        out: &mut Vec<ListRow>,
    ) -> Result<(), VaultOpError> {
        let scanned = self.scan_shard(dir_id, shard, root)?;
        let mut children = Vec::new();
        for entry in &scanned {
            let (is_file, size, stat_path) = match entry.kind {
                EntryKind::Directory => (false, 0, entry.entry_path.clone()),
                EntryKind::Symlink => {
                    let payload = entry.entry_path.join(SYMLINK_FILE);
                    let size = fs::metadata(&payload)
                        .map(|m| cleartext_size(m.len()))
                        .unwrap_or(0);
                    (true, size, payload)
                }
                EntryKind::File => {
                    let contents = if entry.entry_path.is_dir() {
                        entry.entry_path.join(CONTENTS_FILE)
                    } else {
                        entry.entry_path.clone()
                    };
                    let size = fs::metadata(&contents).map(|m| cleartext_size(m.len())).unwrap_or(0);
                    (true, size, contents)
                }
            };
            let mtime = fs::metadata(&stat_path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            out.push(ListRow {
                root: root.clone(),
                name: entry.name.clone(),
                is_file,
                size,
                mtime,
                extension: if is_file { extension_of(&entry.name) } else { String::new() },
                link_target: entry.link_target.clone(),
            });
            if recursive && entry.kind == EntryKind::Directory {
                if let Some(child_id) = self.resolver.dir_id_at(&entry.entry_path.join(DIR_FILE))? {
                    children.push((entry.name.clone(), child_id));
                }
            }
        }
        for (name, child_id) in children {
            let child_shard = self.resolver.shard_path(&child_id)?;
            self.list_into(&root.join(&name), &child_id, &child_shard, true, out)?;
        }
        Ok(())
    }

    // ==================== maintenance ====================

    /// Change the vault password. Master keys and all content stay as they
    /// are; only the master-key artifact is rewritten (atomically).
    pub fn change_password(&self, old: &str, new: &str) -> Result<(), VaultOpError> {
        master_key::change_password(&self.master_key_path, old, new)?;
        info!("vault password changed");
        Ok(())
    }

    /// Recover a directory id from a shard's `dirid.c9r` backup, for
    /// reconstructing a lost `dir.c9r`.
    pub fn recover_dir_id(&self, shard: &Path) -> Result<DirId, VaultOpError> {
        let backup = shard.join(DIR_ID_BACKUP_FILE);
        let encrypted = fs::read(&backup).map_err(|e| VaultOpError::io(e, &backup))?;
        let id = crate::fs::file::decrypt_dir_id_backup(&encrypted, &self.master_key)?;
        Ok(DirId::from_raw(id))
    }

    // ==================== helpers ====================

    fn atomic_write(&self, path: &Path, content: &[u8]) -> Result<(), VaultOpError> {
        self.atomic_write_with(path, |out| {
            out.write_all(content).map_err(FileEncryptionError::from)?;
            Ok(0)
        })
        .map(|_| ())
    }

    /// Write through a temp file in the same directory and rename into
    /// place, so readers never observe a half-written artifact.
    fn atomic_write_with<F>(&self, path: &Path, write: F) -> Result<u64, VaultOpError>
    where
        F: FnOnce(&mut fs::File) -> Result<u64, FileEncryptionError>,
    {
        let parent = path
            .parent()
            .ok_or_else(|| VaultOpError::io(io::Error::other("no parent directory"), path))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| VaultOpError::io(e, parent))?;
        let written = write(tmp.as_file_mut())?;
        tmp.persist(path)
            .map_err(|e| VaultOpError::io(e.error, path))?;
        Ok(written)
    }
}

/// Copy access/modification times from `meta` onto `path`, best effort on
/// platforms without an accessed time.
fn restore_times(path: &Path, meta: &fs::Metadata) -> Result<(), VaultOpError> {
    let mut times = fs::FileTimes::new();
    if let Ok(modified) = meta.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    let file = fs::File::options()
        .append(true)
        .open(path)
        .map_err(|e| VaultOpError::io(e, path))?;
    file.set_times(times).map_err(|e| VaultOpError::io(e, path))?;
    Ok(())
}

/// Lowercased extension (with dot) of a filename, empty when absent.
fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!(".{}", ext.to_lowercase()),
        _ => String::new(),
    }
}

/// Split a pattern into its wildcard-free base directory and the trailing
/// per-component predicates starting at the first wildcard.
fn split_wildcard(pattern: &str) -> (VaultPath, Vec<String>) {
    let components: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let first_wild = components
        .iter()
        .position(|c| c.contains('*') || c.contains('?'))
        .unwrap_or(components.len());

    let mut base = VaultPath::root();
    for c in &components[..first_wild] {
        base = base.join(*c);
    }
    let predicates = components[first_wild..]
        .iter()
        .map(|s| (*s).to_string())
        .collect();
    (base, predicates)
}

/// Rewrite `target` relative to `link`'s directory, keeping it absolute
/// when the two share no prefix.
fn relative_target(target: &VaultPath, link: &VaultPath) -> String {
    let t: Vec<&str> = target.components().collect();
    let l: Vec<&str> = link.components().collect();
    let mut shared = 0;
    while shared < t.len() && shared < l.len() && t[shared] == l[shared] {
        shared += 1;
    }
    if shared == 0 {
        return format!("/{}", target.as_str());
    }
    let ups = l.len().saturating_sub(1 + shared);
    let mut out = "../".repeat(ups);
    out.push_str(&t[shared..].join("/"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_spec_parsing() {
        let spec = SortSpec::parse("NS-!").unwrap();
        assert_eq!(spec.keys, vec![SortKey::Name, SortKey::Size]);
        assert!(spec.reverse);
        assert!(spec.dirs_first);

        assert!(matches!(
            SortSpec::parse("NX").unwrap_err(),
            VaultOpError::InvalidSortKey { key: 'X' }
        ));
    }

    #[test]
    fn sort_rows_orders_dirs_first_then_keys() {
        let mtime = SystemTime::UNIX_EPOCH;
        let row = |name: &str, is_file: bool, size: u64| ListRow {
            root: VaultPath::root(),
            name: name.to_string(),
            is_file,
            size,
            mtime,
            extension: extension_of(name),
            link_target: None,
        };
        let mut rows = vec![
            row("zz.txt", true, 10),
            row("aa.txt", true, 5),
            row("sub", false, 0),
        ];
        let spec = SortSpec::parse("N!").unwrap();
        sort_rows(&mut rows, &spec);
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["sub", "aa.txt", "zz.txt"]);
    }

    #[test]
    fn split_wildcard_cases() {
        let (base, preds) = split_wildcard("/a/b/*.txt");
        assert_eq!(base.as_str(), "a/b");
        assert_eq!(preds, vec!["*.txt"]);

        let (base, preds) = split_wildcard("/a/*/c");
        assert_eq!(base.as_str(), "a");
        assert_eq!(preds, vec!["*", "c"]);

        let (base, preds) = split_wildcard("/plain/path");
        assert_eq!(base.as_str(), "plain/path");
        assert!(preds.is_empty());

        let (base, preds) = split_wildcard("/");
        assert!(base.is_root());
        assert!(preds.is_empty());
    }

    #[test]
    fn extension_lowercases_and_handles_dotfiles() {
        assert_eq!(extension_of("report.TXT"), ".txt");
        assert_eq!(extension_of("archive.tar.gz"), ".gz");
        assert_eq!(extension_of(".hidden"), "");
        assert_eq!(extension_of("plain"), "");
    }

    #[test]
    fn relative_target_shares_prefix() {
        assert_eq!(
            relative_target(&VaultPath::new("/a/b/tgt"), &VaultPath::new("/a/b/lnk")),
            "tgt"
        );
        assert_eq!(
            relative_target(&VaultPath::new("/a/tgt"), &VaultPath::new("/a/b/lnk")),
            "../tgt"
        );
        assert_eq!(
            relative_target(&VaultPath::new("/x/tgt"), &VaultPath::new("/a/b/lnk")),
            "/x/tgt"
        );
    }
}
