//! Vault structure: configuration, key artifacts, path resolution and the
//! operation layer.

pub mod config;
pub mod creator;
pub mod master_key;
pub mod operations;
pub mod path;
pub mod resolver;

pub use config::{VaultClaims, DEFAULT_SHORTENING_THRESHOLD};
pub use creator::VaultCreator;
pub use operations::{
    sort_rows, ListRow, SortKey, SortSpec, TreeStats, Vault, VaultOpError, VaultOpenError,
    WalkEntry,
};
pub use path::{DirId, EntryKind, VaultPath};
pub use resolver::{EntryLocation, PathInfo, Resolver, SymlinkInfo};
