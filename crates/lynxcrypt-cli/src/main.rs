#![deny(unsafe_code)]

mod commands;

use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lynxcrypt_core::crypto::words::WordCodec;
use lynxcrypt_core::vault::{Vault, VaultCreator, VaultPath};

/// Command-line interface for Cryptomator V8 vaults
#[derive(Parser)]
#[command(name = "lynxcrypt")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Initialize a new vault in an empty directory
    lynxcrypt init ~/vault

    # List the vault root, sorted by name, directories first
    lynxcrypt ls ~/vault / -s 'N!'

    # Encrypt files into the vault, decrypt one back to stdout
    lynxcrypt encrypt ~/vault notes.txt /notes.txt
    lynxcrypt decrypt ~/vault /notes.txt -
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Vault passphrase (prefer --password-stdin or LYNXCRYPT_PASSWORD)
    #[arg(long, env = "LYNXCRYPT_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Read the passphrase from stdin (single line)
    #[arg(long, conflicts_with = "password", global = true)]
    password_stdin: bool,

    /// Raw master keys (base64url primary and HMAC key), or `- -` to read
    /// a 44-word list from stdin (requires --dictionary)
    #[arg(long, num_args = 2, value_names = ["PRIMARY_KEY", "HMAC_KEY"], global = true)]
    master_keys: Option<Vec<String>>,

    /// 4096-word dictionary file for the word codec
    #[arg(long, global = true)]
    dictionary: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new vault in an empty directory
    Init {
        vault: PathBuf,
        /// Deflate encrypted names longer than this many bytes
        #[arg(long, default_value_t = 220)]
        shortening_threshold: usize,
    },

    /// Print the raw master keys (KEEP THEM SECRET)
    PrintKeys {
        vault: PathBuf,
        /// Output format
        #[arg(value_parser = ["b64", "words"], default_value = "b64")]
        format: String,
    },

    /// Change the vault password
    ChangePassword { vault: PathBuf },

    /// List files and directories
    Ls(commands::ls::Args),

    /// Make directories (and missing parents)
    Mkdir {
        vault: PathBuf,
        #[arg(required = true)]
        dirs: Vec<String>,
    },

    /// Remove files, symlinks and directories (-f removes non-empty trees)
    Rm {
        vault: PathBuf,
        /// Delete directories even when non-empty
        #[arg(short, long)]
        force: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Remove empty directories
    Rmdir {
        vault: PathBuf,
        #[arg(required = true)]
        dirs: Vec<String>,
    },

    /// Move or rename files and directories
    Mv {
        vault: PathBuf,
        /// Sources, then the destination
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },

    /// Make a symbolic link to a file or directory
    Ln {
        vault: PathBuf,
        /// Also copy the target's dir.c9r for older clients
        #[arg(long = "old")]
        legacy: bool,
        target: String,
        link: String,
    },

    /// Encrypt real files or directories into the vault
    Encrypt(commands::transfer::EncryptArgs),

    /// Decrypt vault files or directories (`-` writes to stdout)
    Decrypt(commands::transfer::DecryptArgs),

    /// Decrypt files to stdout
    Cat {
        vault: PathBuf,
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Commands::Init {
            vault,
            shortening_threshold,
        } => {
            let password = obtain_new_password(&cli)?;
            VaultCreator::new(vault, &password)
                .with_shortening_threshold(*shortening_threshold)
                .create()
                .context("vault creation failed")?;
            eprintln!("Vault created. Consider `print-keys` and storing the keys safely.");
            Ok(())
        }

        Commands::PrintKeys { vault, format } => {
            let vault = open_vault(&cli, vault)?;
            commands::keys::print_keys(&vault, format, cli.dictionary.as_deref())
        }

        Commands::ChangePassword { vault } => {
            let vault_path = vault;
            let old = obtain_password(&cli)?;
            let vault = Vault::open(vault_path, &old).context("cannot open vault")?;
            let new = prompt_new_password()?;
            vault.change_password(&old, &new)?;
            eprintln!("done.");
            Ok(())
        }

        Commands::Ls(args) => {
            let vault = open_vault(&cli, &args.vault)?;
            commands::ls::run(&vault, args)
        }

        Commands::Mkdir { vault, dirs } => {
            let vault = open_vault(&cli, vault)?;
            for dir in dirs {
                vault.mkdir(&VaultPath::new(dir))?;
            }
            Ok(())
        }

        Commands::Rm {
            vault,
            force,
            paths,
        } => {
            let vault = open_vault(&cli, vault)?;
            commands::remove_paths(&vault, paths, *force)
        }

        Commands::Rmdir { vault, dirs } => {
            let vault = open_vault(&cli, vault)?;
            for dir in dirs {
                vault.rmdir(&VaultPath::new(dir))?;
            }
            Ok(())
        }

        Commands::Mv { vault, paths } => {
            let vault = open_vault(&cli, vault)?;
            let (dst, sources) = paths.split_last().expect("clap enforces two paths");
            for src in sources {
                vault.mv(&VaultPath::new(src), &VaultPath::new(dst))?;
            }
            Ok(())
        }

        Commands::Ln {
            vault,
            legacy,
            target,
            link,
        } => {
            let vault = open_vault(&cli, vault)?;
            vault.symlink(target, &VaultPath::new(link), *legacy)?;
            Ok(())
        }

        Commands::Encrypt(args) => {
            let vault = open_vault(&cli, &args.vault)?;
            commands::transfer::encrypt(&vault, args)
        }

        Commands::Decrypt(args) => {
            let mut vault = open_vault(&cli, &args.vault)?;
            commands::transfer::decrypt(&mut vault, args)
        }

        Commands::Cat { vault, paths } => {
            let vault = open_vault(&cli, vault)?;
            let mut stdout = io::stdout().lock();
            for path in paths {
                vault.read_to_writer(&VaultPath::new(path), &mut stdout)?;
            }
            Ok(())
        }
    }
}

/// Open a vault with whatever credentials the invocation carries: raw
/// keys, a word list, or a passphrase.
fn open_vault(cli: &Cli, path: &std::path::Path) -> Result<Vault> {
    if let Some(keys) = &cli.master_keys {
        let (pk, hk) = if keys[0] == "-" && keys[1] == "-" {
            read_keys_from_words(cli)?
        } else {
            (decode_key(&keys[0])?, decode_key(&keys[1])?)
        };
        return Vault::open_with_keys(path, pk, hk).context("cannot open vault with raw keys");
    }
    let password = obtain_password(cli)?;
    Vault::open(path, &password).context("cannot open vault")
}

fn decode_key(encoded: &str) -> Result<[u8; 32]> {
    let bytes = general_purpose::URL_SAFE
        .decode(encoded)
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(encoded))
        .or_else(|_| general_purpose::STANDARD.decode(encoded))
        .context("master key is not valid base64")?;
    let key: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("master key must decode to 32 bytes, got {}", bytes.len()))?;
    Ok(key)
}

fn read_keys_from_words(cli: &Cli) -> Result<([u8; 32], [u8; 32])> {
    let dictionary = cli
        .dictionary
        .as_ref()
        .context("--master-keys - - needs --dictionary")?;
    let codec = WordCodec::load(dictionary)?;

    eprint!("Words list: ");
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let words: Vec<&str> = line.split_whitespace().collect();

    let (pk, hk) = codec.decode_keys(&words)?;
    Ok((*pk, *hk))
}

fn obtain_password(cli: &Cli) -> Result<String> {
    if let Some(password) = &cli.password {
        return Ok(password.clone());
    }
    if cli.password_stdin {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        return Ok(line.trim_end_matches(['\r', '\n']).to_string());
    }
    if !io::stdin().is_terminal() {
        bail!("no password given and stdin is not a terminal (use --password-stdin)");
    }
    Ok(rpassword::prompt_password("Password: ")?)
}

fn obtain_new_password(cli: &Cli) -> Result<String> {
    if cli.password.is_some() || cli.password_stdin {
        return obtain_password(cli);
    }
    prompt_new_password()
}

fn prompt_new_password() -> Result<String> {
    loop {
        let first = rpassword::prompt_password("Please type the new password: ")?;
        let second = rpassword::prompt_password("Confirm the password: ")?;
        if first == second {
            return Ok(first);
        }
        eprintln!("The passwords you typed do not match!");
    }
}
