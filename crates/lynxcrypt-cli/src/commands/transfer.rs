use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use lynxcrypt_core::fs::file::IntegrityMode;
use lynxcrypt_core::vault::{Vault, VaultPath};

#[derive(clap::Args)]
pub struct EncryptArgs {
    pub vault: PathBuf,

    /// Real sources, then the virtual destination
    #[arg(required = true, num_args = 2..)]
    pub paths: Vec<String>,

    /// Overwrite existing destination files
    #[arg(short, long)]
    pub force: bool,

    /// Delete sources after successful encryption
    #[arg(short, long = "move")]
    pub move_source: bool,
}

#[derive(clap::Args)]
pub struct DecryptArgs {
    pub vault: PathBuf,

    /// Virtual sources, then the real destination (or `-` for stdout)
    #[arg(required = true, num_args = 2..)]
    pub paths: Vec<String>,

    /// Overwrite existing destination files
    #[arg(short, long)]
    pub force: bool,

    /// Delete vault entries after successful decryption
    #[arg(short, long = "move")]
    pub move_source: bool,

    /// Pass damaged chunks through as raw ciphertext instead of aborting
    #[arg(long)]
    pub permissive: bool,
}

pub fn encrypt(vault: &Vault, args: &EncryptArgs) -> Result<()> {
    let (dst, sources) = args.paths.split_last().expect("clap enforces two paths");
    let dst_path = VaultPath::new(dst);
    let many = sources.len() > 1;

    for src in sources {
        let src = Path::new(src);
        if src.is_dir() {
            vault.encrypt_tree(src, &dst_path, args.force, args.move_source)?;
            continue;
        }

        let target = resolve_file_target(vault, &dst_path, src, many)?;
        eprintln!("{target}");
        vault.encrypt_file(src, &target, args.force, args.move_source)?;
    }
    Ok(())
}

/// With several sources, or a destination that already is a directory, the
/// effective target is `dst/basename(src)`.
fn resolve_file_target(
    vault: &Vault,
    dst: &VaultPath,
    src: &Path,
    many: bool,
) -> Result<VaultPath> {
    let info = vault.resolve(dst)?;
    if many && info.exists && !info.is_dir {
        bail!("destination {dst} exists and is not a directory");
    }
    if info.is_dir || many {
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(dst.join(name))
    } else {
        Ok(dst.clone())
    }
}

pub fn decrypt(vault: &mut Vault, args: &DecryptArgs) -> Result<()> {
    if args.permissive {
        vault.set_integrity_mode(IntegrityMode::Permissive);
    }

    let (dst, sources) = args.paths.split_last().expect("clap enforces two paths");
    let many = sources.len() > 1;

    for src in sources {
        let src_path = VaultPath::new(src);

        if *dst == "-" {
            let mut stdout = io::stdout().lock();
            vault.read_to_writer(&src_path, &mut stdout)?;
            stdout.flush()?;
            continue;
        }

        let info = vault.resolve(&src_path)?;
        if info.is_dir {
            vault.decrypt_tree(&src_path, Path::new(dst), args.force, args.move_source)?;
            continue;
        }

        let mut target = PathBuf::from(dst);
        if many || target.is_dir() {
            if target.exists() && !target.is_dir() {
                bail!("destination {dst} exists and is not a directory");
            }
            let name = src_path.file_name().unwrap_or_default().to_string();
            target.push(name);
        }
        eprintln!("{}", target.display());
        vault.decrypt_file(&src_path, &target, args.force, args.move_source)?;
    }
    Ok(())
}
