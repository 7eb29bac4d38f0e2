pub mod keys;
pub mod ls;
pub mod transfer;

use anyhow::Result;
use lynxcrypt_core::vault::{Vault, VaultPath};

/// `rm` semantics: files and symlinks are unlinked; directories are
/// removed only when empty, or recursively with `force`.
pub fn remove_paths(vault: &Vault, paths: &[String], force: bool) -> Result<()> {
    for path in paths {
        let vpath = VaultPath::new(path);
        if vpath.is_root() {
            eprintln!("Won't erase the root directory.");
            continue;
        }
        let info = vault.resolve(&vpath)?;
        if !info.exists {
            eprintln!("rm: {path}: no such file or directory");
            continue;
        }
        if !info.is_dir || info.symlink.is_some() {
            vault.remove(&vpath)?;
        } else if force {
            vault.rmtree(&vpath)?;
        } else {
            vault.rmdir(&vpath)?;
        }
    }
    Ok(())
}
