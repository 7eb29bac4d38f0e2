#![forbid(unsafe_code)]

//! Virtual-path resolution.
//!
//! A vault does not mirror the cleartext tree: every directory owns an
//! opaque id whose hash picks a two-level shard under `d/`, and each child
//! entry's on-disk name is derived from the cleartext component and the
//! PARENT's id. Resolving `/a/b/c` therefore walks the tree component by
//! component, running one deterministic AES-SIV encryption and one
//! `dir.c9r` read per level.
//!
//! `dir.c9r` reads go through a process-local cache keyed by the file's
//! absolute path. The on-disk state stays authoritative: a cache entry is
//! only ever a value that was current at read time, and it is evicted when
//! the directory entry is removed or renamed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{instrument, trace, warn};

use crate::crypto::keys::MasterKey;
use crate::fs::name::{encrypt_name, hash_dir_id, shorten_name, NameError, NamePolicy};
use crate::fs::symlink::decrypt_symlink_target;
use crate::vault::path::{DirId, VaultPath};

/// Maximum symlink hops before resolution gives up.
///
/// The reference does not bound resolution at all; 40 matches the usual
/// kernel limit.
pub const SYMLINK_HOP_LIMIT: usize = 40;

/// Marker file inside an entry directory that makes it a directory.
pub const DIR_FILE: &str = "dir.c9r";
/// Marker file inside an entry directory that makes it a symlink.
pub const SYMLINK_FILE: &str = "symlink.c9r";
/// Content file inside a `.c9s` sidecar.
pub const CONTENTS_FILE: &str = "contents.c9r";
/// Long-name file inside a `.c9s` sidecar.
pub const NAME_FILE: &str = "name.c9s";
/// Per-shard backup of the owning directory's id.
pub const DIR_ID_BACKUP_FILE: &str = "dirid.c9r";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Name(#[from] NameError),

    #[error("Too many levels of symbolic links resolving '{path}'")]
    SymlinkLoop { path: String },

    #[error("IO error reading {path}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Where an entry lives on disk.
///
/// Short encrypted names are stored directly; names longer than the
/// shortening threshold live behind a `.c9s` sidecar directory whose stem
/// is the SHA-1 of the full name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryLocation {
    /// A regular `name.c9r` entry in the parent shard.
    Plain { entry: PathBuf },
    /// A `hash.c9s/` sidecar; `full_name` is the verbatim long name that
    /// `name.c9s` stores.
    Long { sidecar: PathBuf, full_name: String },
}

impl EntryLocation {
    /// The on-disk node for this entry (file or directory).
    pub fn entry_path(&self) -> &Path {
        match self {
            EntryLocation::Plain { entry } => entry,
            EntryLocation::Long { sidecar, .. } => sidecar,
        }
    }

    /// The full encrypted name when deflated.
    pub fn long_name(&self) -> Option<&str> {
        match self {
            EntryLocation::Plain { .. } => None,
            EntryLocation::Long { full_name, .. } => Some(full_name),
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, EntryLocation::Long { .. })
    }
}

/// A resolved symbolic link.
#[derive(Debug, Clone)]
pub struct SymlinkInfo {
    /// Path of the on-disk `symlink.c9r` payload.
    pub payload: PathBuf,
    /// The link target, normalized against the link's parent directory.
    pub points_to: VaultPath,
}

/// Everything the operation layer needs to know about one virtual path.
#[derive(Debug, Clone)]
pub struct PathInfo {
    /// The virtual path this record describes. When resolution stopped at
    /// a missing intermediate component, this is the first missing prefix.
    pub pathname: VaultPath,
    /// The directory's own id, or the parent's id for files and symlinks.
    pub dir_id: DirId,
    /// Where the entry lives (or would live) on disk.
    pub location: EntryLocation,
    /// Contents shard for a directory; the parent's shard for a file.
    pub real_dir: PathBuf,
    /// Whether the path is (or, for a link, points to) a directory.
    pub is_dir: bool,
    /// Present when the entry itself is a symbolic link.
    pub symlink: Option<SymlinkInfo>,
    /// Whether the entry exists on disk. For a symlink this refers to the
    /// link entry, never to its target.
    pub exists: bool,
}

impl PathInfo {
    /// Whether this record describes the vault root.
    pub fn is_root(&self) -> bool {
        self.pathname.is_root()
    }

    /// `name.c9s` path for deflated entries.
    pub fn name_file(&self) -> Option<PathBuf> {
        match &self.location {
            EntryLocation::Plain { .. } => None,
            EntryLocation::Long { sidecar, .. } => Some(sidecar.join(NAME_FILE)),
        }
    }

    /// The file holding encrypted contents: the entry itself for plain
    /// files, `contents.c9r` inside the sidecar for deflated ones.
    pub fn contents_file(&self) -> PathBuf {
        match &self.location {
            EntryLocation::Plain { entry } => entry.clone(),
            EntryLocation::Long { sidecar, .. } => {
                if self.is_dir {
                    sidecar.clone()
                } else {
                    sidecar.join(CONTENTS_FILE)
                }
            }
        }
    }

    /// `dir.c9r` path for directories.
    pub fn dir_file(&self) -> Option<PathBuf> {
        if self.is_dir {
            Some(self.location.entry_path().join(DIR_FILE))
        } else {
            None
        }
    }

    /// `symlink.c9r` path inside the entry.
    pub fn symlink_file(&self) -> PathBuf {
        self.location.entry_path().join(SYMLINK_FILE)
    }
}

/// Walks virtual paths into [`PathInfo`] records.
pub struct Resolver {
    base: PathBuf,
    root_shard: PathBuf,
    threshold: usize,
    policy: NamePolicy,
    master_key: Arc<MasterKey>,
    dir_id_cache: DashMap<PathBuf, DirId>,
}

impl Resolver {
    pub fn new(
        base: PathBuf,
        master_key: Arc<MasterKey>,
        threshold: usize,
        policy: NamePolicy,
    ) -> Result<Self, NameError> {
        let root_hash = hash_dir_id("", &master_key)?;
        let root_shard = base.join("d").join(&root_hash[..2]).join(&root_hash[2..32]);
        Ok(Resolver {
            base,
            root_shard,
            threshold,
            policy,
            master_key,
            dir_id_cache: DashMap::new(),
        })
    }

    pub fn root_shard(&self) -> &Path {
        &self.root_shard
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn policy(&self) -> NamePolicy {
        self.policy
    }

    /// Swap the illegal-character policy (host default otherwise).
    pub fn set_policy(&mut self, policy: NamePolicy) {
        self.policy = policy;
    }

    /// Contents shard of a directory id: `d/XX/YYYY…` under the vault base.
    pub fn shard_path(&self, dir_id: &DirId) -> Result<PathBuf, NameError> {
        if dir_id.is_root() {
            return Ok(self.root_shard.clone());
        }
        let hashed = hash_dir_id(dir_id.as_str(), &self.master_key)?;
        Ok(self
            .base
            .join("d")
            .join(&hashed[..2])
            .join(&hashed[2..32]))
    }

    /// Compute where a child named `name` of `parent` lives on disk.
    pub fn child_location(
        &self,
        shard: &Path,
        parent_id: &DirId,
        name: &str,
    ) -> Result<EntryLocation, NameError> {
        let encrypted = encrypt_name(name, parent_id.as_str(), self.policy, &self.master_key)?;
        let full_name = format!("{encrypted}.c9r");
        if full_name.len() > self.threshold {
            let stem = shorten_name(&full_name);
            Ok(EntryLocation::Long {
                sidecar: shard.join(format!("{stem}.c9s")),
                full_name,
            })
        } else {
            Ok(EntryLocation::Plain {
                entry: shard.join(full_name),
            })
        }
    }

    /// Read a `dir.c9r`, consulting the id cache first.
    pub fn dir_id_at(&self, dir_file: &Path) -> Result<Option<DirId>, ResolveError> {
        if let Some(hit) = self.dir_id_cache.get(dir_file) {
            trace!(path = %dir_file.display(), "dir id cache hit");
            return Ok(Some(hit.clone()));
        }
        if !dir_file.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(dir_file).map_err(|source| ResolveError::Io {
            source,
            path: dir_file.to_path_buf(),
        })?;
        let id = DirId::from_raw(raw.trim());
        self.dir_id_cache
            .insert(dir_file.to_path_buf(), id.clone());
        Ok(Some(id))
    }

    /// Drop a cached id, e.g. after `rmdir` or a rename of the entry.
    pub fn evict(&self, dir_file: &Path) {
        self.dir_id_cache.remove(dir_file);
    }

    /// Resolve a virtual path into a [`PathInfo`].
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn resolve(&self, path: &VaultPath) -> Result<PathInfo, ResolveError> {
        self.resolve_inner(path, 0)
    }

    fn root_info(&self) -> PathInfo {
        PathInfo {
            pathname: VaultPath::root(),
            dir_id: DirId::root(),
            location: EntryLocation::Plain {
                entry: self.root_shard.clone(),
            },
            real_dir: self.root_shard.clone(),
            is_dir: true,
            symlink: None,
            exists: true,
        }
    }

    fn resolve_inner(&self, path: &VaultPath, hops: usize) -> Result<PathInfo, ResolveError> {
        if hops > SYMLINK_HOP_LIMIT {
            return Err(ResolveError::SymlinkLoop {
                path: path.to_string(),
            });
        }
        if path.is_root() {
            return Ok(self.root_info());
        }

        let components: Vec<&str> = path.components().collect();
        let last = components.len() - 1;
        let mut dir_id = DirId::root();

        for (i, component) in components.iter().enumerate() {
            let shard = self.shard_path(&dir_id)?;
            let location = self.child_location(&shard, &dir_id, component)?;
            let entry_path = location.entry_path().to_path_buf();
            let child_id = self.dir_id_at(&entry_path.join(DIR_FILE))?;

            if i < last {
                match child_id {
                    Some(id) => {
                        trace!(component, child = %id, "descended");
                        dir_id = id;
                        continue;
                    }
                    None => {
                        // first missing (or non-directory) segment
                        return Ok(PathInfo {
                            pathname: path.prefix(i + 1),
                            dir_id,
                            location,
                            real_dir: shard,
                            is_dir: false,
                            symlink: None,
                            exists: false,
                        });
                    }
                }
            }

            let mut info = PathInfo {
                pathname: path.clone(),
                dir_id: dir_id.clone(),
                exists: entry_path.exists(),
                real_dir: shard,
                is_dir: false,
                symlink: None,
                location,
            };

            if let Some(id) = child_id {
                info.real_dir = self.shard_path(&id)?;
                info.dir_id = id;
                info.is_dir = true;
                info.exists = true;
            }

            let payload = entry_path.join(SYMLINK_FILE);
            if payload.exists() {
                self.attach_symlink(&mut info, path, payload, hops)?;
            }

            return Ok(info);
        }

        unreachable!("non-root path has at least one component")
    }

    /// Decrypt and resolve a link target, copying the target's
    /// classification into `info` while `exists` keeps referring to the
    /// link entry itself.
    fn attach_symlink(
        &self,
        info: &mut PathInfo,
        link_path: &VaultPath,
        payload: PathBuf,
        hops: usize,
    ) -> Result<(), ResolveError> {
        let encrypted = match fs::read(&payload) {
            Ok(bytes) => bytes,
            Err(source) => {
                return Err(ResolveError::Io {
                    source,
                    path: payload,
                })
            }
        };
        let target = match decrypt_symlink_target(&encrypted, &self.master_key) {
            Ok(target) => target,
            Err(e) => {
                warn!(path = %payload.display(), error = %e, "corrupted symbolic link payload, treating entry as a file");
                return Ok(());
            }
        };

        let points_to = if target.starts_with('/') {
            VaultPath::new(&target)
        } else {
            // relative targets resolve against the link's directory
            let parent = link_path.parent().unwrap_or_else(VaultPath::root);
            parent.join(&target).normalized()
        };

        info.symlink = Some(SymlinkInfo {
            payload,
            points_to: points_to.clone(),
        });
        info.is_dir = false;

        match self.resolve_inner(&points_to, hops + 1) {
            Ok(target_info) => {
                info.dir_id = target_info.dir_id;
                info.is_dir = target_info.is_dir;
                info.real_dir = target_info.real_dir;
            }
            Err(e @ ResolveError::SymlinkLoop { .. }) => return Err(e),
            Err(e) => {
                warn!(target = %points_to, error = %e, "failed to resolve symlink target");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_resolver(dir: &Path) -> Resolver {
        let key = Arc::new(MasterKey::new([1u8; 32], [2u8; 32]).unwrap());
        Resolver::new(dir.to_path_buf(), key, 220, NamePolicy::Posix).unwrap()
    }

    #[test]
    fn root_resolves_without_io() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());
        let info = resolver.resolve(&VaultPath::root()).unwrap();
        assert!(info.is_root() && info.is_dir && info.exists);
        assert_eq!(info.dir_id, DirId::root());
        assert_eq!(info.real_dir, resolver.root_shard());
    }

    #[test]
    fn shard_path_shape() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());
        let shard = resolver.shard_path(&DirId::from_raw("some-id")).unwrap();
        let rel = shard.strip_prefix(dir.path()).unwrap();
        let parts: Vec<_> = rel.components().map(|c| c.as_os_str()).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "d");
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2].len(), 30);
    }

    #[test]
    fn missing_path_reports_first_missing_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());
        let info = resolver.resolve(&VaultPath::new("a/b/c")).unwrap();
        assert!(!info.exists);
        assert_eq!(info.pathname.as_str(), "a");
        assert_eq!(info.dir_id, DirId::root());
    }

    #[test]
    fn long_names_get_sidecar_locations() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());
        let long = "x".repeat(200); // encrypts well past 220 bytes
        let info = resolver.resolve(&VaultPath::new(&long)).unwrap();
        assert!(info.location.is_long());
        let entry = info.location.entry_path().to_string_lossy().into_owned();
        assert!(entry.ends_with(".c9s"), "{entry}");
        assert!(info.location.long_name().unwrap().ends_with(".c9r"));
        assert_eq!(
            info.name_file().unwrap().file_name().unwrap(),
            NAME_FILE
        );
    }

    #[test]
    fn dir_id_cache_inserts_and_evicts() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());

        let dir_file = dir.path().join("entry.c9r").join(DIR_FILE);
        fs::create_dir_all(dir_file.parent().unwrap()).unwrap();
        fs::write(&dir_file, "some-uuid").unwrap();

        let id = resolver.dir_id_at(&dir_file).unwrap().unwrap();
        assert_eq!(id.as_str(), "some-uuid");

        // a stale value survives until evicted
        fs::remove_file(&dir_file).unwrap();
        assert!(resolver.dir_id_at(&dir_file).unwrap().is_some());
        resolver.evict(&dir_file);
        assert!(resolver.dir_id_at(&dir_file).unwrap().is_none());
    }
}
