//! Type-safe identifiers and virtual paths.
//!
//! Two types that must never be confused: `DirId`, the opaque identifier a
//! directory carries in its `dir.c9r` file, and `VaultPath`, the cleartext
//! path a user sees. Neither has anything to do with the on-disk layout
//! under `d/`.

use relative_path::{RelativePath, RelativePathBuf};
use std::fmt;

/// Opaque directory identifier.
///
/// The root directory's id is the empty string; every other directory gets
/// a random UUID at creation time that never changes afterwards. The id is
/// the associated data for every name encrypted inside the directory, and
/// its SIV-then-SHA-1 hash picks the directory's storage shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirId(String);

impl DirId {
    /// The root directory (empty id).
    #[inline]
    pub fn root() -> Self {
        DirId(String::new())
    }

    /// Wrap an id read from a `dir.c9r` file.
    #[inline]
    pub fn from_raw(id: impl Into<String>) -> Self {
        DirId(id.into())
    }

    /// Generate a fresh random id for a new directory.
    pub fn random() -> Self {
        DirId(uuid::Uuid::new_v4().to_string())
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DirId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// What kind of entry a virtual path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Cleartext path within the vault.
///
/// Always `/`-separated regardless of host OS; a leading slash is
/// accepted and stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VaultPath(RelativePathBuf);

impl VaultPath {
    /// The root path.
    #[inline]
    pub fn root() -> Self {
        VaultPath(RelativePathBuf::new())
    }

    /// Create a path from a string, stripping leading slashes.
    pub fn new(path: impl AsRef<str>) -> Self {
        let s = path.as_ref().trim_start_matches('/');
        VaultPath(RelativePathBuf::from(s))
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.as_str().is_empty()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[inline]
    pub fn as_relative_path(&self) -> &RelativePath {
        &self.0
    }

    /// Append a component.
    pub fn join(&self, component: impl AsRef<str>) -> Self {
        VaultPath(self.0.join(component.as_ref()))
    }

    /// Parent path; `None` for the root.
    pub fn parent(&self) -> Option<VaultPath> {
        self.0.parent().map(|p| VaultPath(p.to_relative_path_buf()))
    }

    /// Final component; `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name()
    }

    /// Iterate over the non-empty components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.components().map(|c| c.as_str())
    }

    /// Split into parent and final component; `None` for the root.
    pub fn split(&self) -> Option<(VaultPath, &str)> {
        let parent = self.parent()?;
        let name = self.file_name()?;
        Some((parent, name))
    }

    /// Resolve `.` and `..` components, e.g. when normalizing a relative
    /// symlink target against the link's directory.
    pub fn normalized(&self) -> Self {
        VaultPath(self.0.normalize())
    }

    /// Keep only the first `n` components (the resolver uses this to name
    /// the first missing prefix of a path).
    pub fn prefix(&self, n: usize) -> Self {
        let mut out = RelativePathBuf::new();
        for c in self.0.components().take(n) {
            out.push(c.as_str());
        }
        VaultPath(out)
    }
}

impl AsRef<str> for VaultPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "/{}", self.0)
        }
    }
}

impl From<&str> for VaultPath {
    fn from(s: &str) -> Self {
        VaultPath::new(s)
    }
}

impl From<String> for VaultPath {
    fn from(s: String) -> Self {
        VaultPath::new(s)
    }
}
