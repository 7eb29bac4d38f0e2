use std::path::Path;

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};

use lynxcrypt_core::crypto::words::WordCodec;
use lynxcrypt_core::vault::Vault;

/// Print the raw master keys for recovery purposes.
pub fn print_keys(vault: &Vault, format: &str, dictionary: Option<&Path>) -> Result<()> {
    eprintln!("\n   * * *  WARNING !!!  * * *\n");
    eprintln!("KEEP THESE KEYS TOP SECRET!\nFor recovering purposes only.\n");

    let pk = vault.master_key().with_primary_key(|k| *k)?;
    let hk = vault.master_key().with_hmac_key(|k| *k)?;

    match format {
        "words" => {
            let dictionary = dictionary.context("--print-keys words needs --dictionary")?;
            let codec = WordCodec::load(dictionary)?;
            let words = codec.encode_keys(&pk, &hk)?;
            println!("{}", words.join(" "));
        }
        _ => {
            println!("Primary master key : {}", general_purpose::URL_SAFE.encode(pk));
            println!("HMAC master key    : {}", general_purpose::URL_SAFE.encode(hk));
        }
    }
    Ok(())
}
