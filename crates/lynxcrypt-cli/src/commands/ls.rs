use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Local};

use lynxcrypt_core::vault::{sort_rows, ListRow, SortSpec, Vault, VaultPath};

#[derive(clap::Args)]
pub struct Args {
    pub vault: PathBuf,

    /// Paths to list (the root when omitted)
    pub paths: Vec<String>,

    /// Bare output: names only, no banner or totals
    #[arg(short, long)]
    pub bare: bool,

    /// Recurse into subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Sort order: any of N(ame) S(ize) D(ate) E(xtension),
    /// `-` to reverse, `!` for directories first
    #[arg(short, long, value_name = "NSDE-!")]
    pub sort: Option<String>,
}

pub fn run(vault: &Vault, args: &Args) -> Result<()> {
    let sort = match &args.sort {
        Some(spec) => Some(SortSpec::parse(spec)?),
        None => None,
    };

    let paths: Vec<String> = if args.paths.is_empty() {
        vec!["/".to_string()]
    } else {
        args.paths.clone()
    };

    let mut grand_files = 0usize;
    let mut grand_dirs = 0usize;
    let mut grand_size = 0u64;

    for path in &paths {
        let rows = match vault.list(&VaultPath::new(path), args.recursive) {
            Ok(rows) => rows,
            Err(e) => {
                eprintln!("{path}: {e}");
                continue;
            }
        };

        // group rows by their directory, keeping traversal order
        let mut groups: Vec<(VaultPath, Vec<ListRow>)> = Vec::new();
        for row in rows {
            match groups.last_mut() {
                Some((root, group)) if *root == row.root => group.push(row),
                _ => groups.push((row.root.clone(), vec![row])),
            }
        }

        for (root, mut group) in groups {
            if let Some(spec) = &sort {
                sort_rows(&mut group, spec);
            }
            if args.bare {
                for row in &group {
                    println!("{}", row.name);
                }
                continue;
            }

            println!("\n  Directory of {root}\n");
            let mut files = 0usize;
            let mut dirs = 0usize;
            let mut size = 0u64;
            for row in &group {
                let stamp: DateTime<Local> = row.mtime.into();
                let stamp = stamp.format("%Y-%m-%d %H:%M");
                if !row.is_file {
                    dirs += 1;
                    println!("{:>12}  {}  {}", "<DIR>", stamp, row.name);
                } else if let Some(target) = &row.link_target {
                    files += 1;
                    println!("{:>12}  {}  {} [--> {}]", "<SYM>", stamp, row.name, target);
                } else {
                    files += 1;
                    size += row.size;
                    println!("{:>12}  {}  {}", row.size, stamp, row.name);
                }
            }
            println!("\n{size} bytes in {files} files and {dirs} directories.");
            grand_files += files;
            grand_dirs += dirs;
            grand_size += size;
        }
    }

    if args.recursive && !args.bare {
        println!(
            "\n   Total files listed:\n{grand_size} bytes in {grand_files} files and {grand_dirs} directories."
        );
    }
    Ok(())
}
