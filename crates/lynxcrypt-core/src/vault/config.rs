#![forbid(unsafe_code)]

//! The vault configuration token (`vault.cryptomator`).
//!
//! A JWT with three dot-separated base64 sections. The header names the
//! MAC algorithm (HS256/384/512) and points at the master-key artifact via
//! `kid: masterkeyfile:...`; the payload declares format 8, the SIV_GCM
//! cipher combo, a random vault id and the shortening threshold; the
//! signature is HMAC over `header.payload` under `PK || HK`.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose, Engine as _};
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::crypto::{
    keys::{KeyAccessError, MasterKey, TokenValidationError},
    CryptoError,
};
use crate::vault::master_key::MasterKeyFile;

/// Default threshold (in bytes of the full on-disk name) above which
/// encrypted names are deflated into `.c9s` sidecars.
pub const DEFAULT_SHORTENING_THRESHOLD: usize = 220;

/// Name of the configuration token file inside the vault directory.
pub const CONFIG_FILE_NAME: &str = "vault.cryptomator";

/// The only cipher combo this engine speaks.
pub const CIPHER_COMBO_SIV_GCM: &str = "SIV_GCM";

/// Claims carried by the configuration token.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultClaims {
    pub jti: String,
    pub format: i32,
    pub cipher_combo: String,
    #[serde(default = "default_shortening_threshold")]
    pub shortening_threshold: i32,
}

fn default_shortening_threshold() -> i32 {
    DEFAULT_SHORTENING_THRESHOLD as i32
}

impl VaultClaims {
    /// The shortening threshold as a usize, clamped to non-negative.
    pub fn shortening_threshold(&self) -> usize {
        usize::try_from(self.shortening_threshold.max(0))
            .expect("non-negative i32 fits in usize")
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Token decode error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Token validation error: {0}")]
    Validation(#[from] TokenValidationError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Configuration token is not of type JWT")]
    NotAJwt,

    #[error("Missing kid in configuration header")]
    MissingKid,

    #[error("kid does not use the masterkeyfile scheme")]
    InvalidScheme,

    #[error("Unsupported MAC algorithm {0:?} in configuration header")]
    UnsupportedAlgorithm(Algorithm),

    #[error("Master key file not found at {0}")]
    MasterKeyFileNotFound(PathBuf),

    #[error("Unsupported vault format {0} (only format 8 is supported)")]
    UnsupportedFormat(i32),

    #[error("Unsupported cipher combo \"{0}\" (only SIV_GCM is supported)")]
    UnsupportedCipherCombo(String),

    #[error("Malformed configuration token: {0}")]
    Malformed(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Key access error: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

fn permitted_algorithm(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Read the configuration token text from a vault directory.
pub fn read_config_token(vault_dir: &Path) -> Result<String, ConfigError> {
    Ok(fs::read_to_string(vault_dir.join(CONFIG_FILE_NAME))?
        .trim()
        .to_string())
}

/// Path of the master-key artifact named by the token's `kid`.
pub fn master_key_path(vault_dir: &Path, token: &str) -> Result<PathBuf, ConfigError> {
    let header = jsonwebtoken::decode_header(token)?;
    let kid = header.kid.ok_or(ConfigError::MissingKid)?;
    let masterkey_uri = Url::parse(&kid)?;
    if masterkey_uri.scheme() != "masterkeyfile" {
        return Err(ConfigError::InvalidScheme);
    }
    Ok(vault_dir.join(masterkey_uri.path()))
}

/// Locate and unlock the master-key artifact named by the token's `kid`.
///
/// Validates the token header (type, algorithm, `masterkeyfile:` scheme)
/// but NOT the signature, which cannot be checked before the keys exist;
/// callers follow up with [`validate_claims`].
pub fn extract_master_key(vault_dir: &Path, passphrase: &str) -> Result<MasterKey, ConfigError> {
    let token = read_config_token(vault_dir)?;
    let header = jsonwebtoken::decode_header(&token)?;

    if header.typ.as_deref() != Some("JWT") {
        return Err(ConfigError::NotAJwt);
    }
    if !permitted_algorithm(header.alg) {
        return Err(ConfigError::UnsupportedAlgorithm(header.alg));
    }

    let master_key_path = master_key_path(vault_dir, &token)?;
    if !master_key_path.exists() {
        return Err(ConfigError::MasterKeyFileNotFound(master_key_path));
    }

    let json = fs::read_to_string(&master_key_path)?;
    let file = MasterKeyFile::from_json(&json)?;
    Ok(file.unlock(passphrase)?)
}

/// Verify the token signature under `PK || HK` and check the claims.
pub fn validate_claims(token: &str, master_key: &MasterKey) -> Result<VaultClaims, ConfigError> {
    let header = jsonwebtoken::decode_header(token)?;
    if !permitted_algorithm(header.alg) {
        return Err(ConfigError::UnsupportedAlgorithm(header.alg));
    }

    let mut validation = Validation::new(header.alg);
    validation.required_spec_claims.clear();
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

    let claims = master_key.validate_token::<VaultClaims>(token, &validation)?;
    check_claims(claims)
}

/// Decode the claims WITHOUT verifying the signature.
///
/// Used when the caller supplied raw master keys (or a word list) and
/// therefore vouches for them directly; there is nothing the MAC would add.
pub fn decode_claims_unverified(token: &str) -> Result<VaultClaims, ConfigError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| ConfigError::Malformed("expected three dot-separated sections".into()))?;
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| general_purpose::STANDARD.decode(payload))
        .map_err(|e| ConfigError::Malformed(format!("payload is not base64: {e}")))?;
    let claims: VaultClaims = serde_json::from_slice(&bytes)?;
    check_claims(claims)
}

fn check_claims(claims: VaultClaims) -> Result<VaultClaims, ConfigError> {
    if claims.format != 8 {
        return Err(ConfigError::UnsupportedFormat(claims.format));
    }
    if claims.cipher_combo != CIPHER_COMBO_SIV_GCM {
        return Err(ConfigError::UnsupportedCipherCombo(claims.cipher_combo));
    }
    Ok(claims)
}

/// Parameters for a new configuration token.
#[derive(Debug)]
pub struct NewVaultConfig {
    pub jti: String,
    pub shortening_threshold: usize,
}

impl fmt::Display for NewVaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vault {} (threshold {})", self.jti, self.shortening_threshold)
    }
}

/// Sign a fresh configuration token for a new vault.
pub fn create_config_token(
    config: &NewVaultConfig,
    master_key: &MasterKey,
) -> Result<String, ConfigError> {
    let claims = VaultClaims {
        jti: config.jti.clone(),
        format: 8,
        cipher_combo: CIPHER_COMBO_SIV_GCM.to_string(),
        shortening_threshold: config.shortening_threshold as i32,
    };

    let encoding_key = master_key.token_signing_key()?;
    let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
    header.kid = Some("masterkeyfile:masterkey.cryptomator".to_string());

    Ok(jsonwebtoken::encode(&header, &claims, &encoding_key)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_for(key: &MasterKey, claims: &VaultClaims) -> String {
        let encoding_key = key.token_signing_key().unwrap();
        let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
        header.kid = Some("masterkeyfile:masterkey.cryptomator".to_string());
        jsonwebtoken::encode(&header, claims, &encoding_key).unwrap()
    }

    fn good_claims() -> VaultClaims {
        VaultClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            format: 8,
            cipher_combo: CIPHER_COMBO_SIV_GCM.to_string(),
            shortening_threshold: 220,
        }
    }

    #[test]
    fn claims_roundtrip_through_token() {
        let key = MasterKey::random().unwrap();
        let claims = good_claims();
        let token = token_for(&key, &claims);
        assert_eq!(token.matches('.').count(), 2);

        let validated = validate_claims(&token, &key).unwrap();
        assert_eq!(validated, claims);
    }

    #[test]
    fn tampered_payload_fails_validation() {
        let key = MasterKey::random().unwrap();
        let token = token_for(&key, &good_claims());

        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let payload = general_purpose::URL_SAFE_NO_PAD
            .decode(parts[1].as_bytes())
            .unwrap();
        let tampered = String::from_utf8(payload)
            .unwrap()
            .replace("\"format\":8", "\"format\":9");
        parts[1] = general_purpose::URL_SAFE_NO_PAD.encode(tampered.as_bytes());
        let tampered_token = parts.join(".");

        assert!(validate_claims(&tampered_token, &key).is_err());
    }

    #[test]
    fn wrong_key_fails_validation() {
        let key = MasterKey::random().unwrap();
        let other = MasterKey::random().unwrap();
        let token = token_for(&key, &good_claims());
        assert!(validate_claims(&token, &other).is_err());
    }

    #[test]
    fn format_and_combo_are_checked() {
        let key = MasterKey::random().unwrap();

        let mut claims = good_claims();
        claims.format = 7;
        let token = token_for(&key, &claims);
        assert!(matches!(
            validate_claims(&token, &key).unwrap_err(),
            ConfigError::UnsupportedFormat(7)
        ));

        let mut claims = good_claims();
        claims.cipher_combo = "SIV_CTRMAC".to_string();
        let token = token_for(&key, &claims);
        assert!(matches!(
            validate_claims(&token, &key).unwrap_err(),
            ConfigError::UnsupportedCipherCombo(_)
        ));
    }

    #[test]
    fn unverified_decode_reads_claims() {
        let key = MasterKey::random().unwrap();
        let claims = good_claims();
        let token = token_for(&key, &claims);

        // no key needed
        let decoded = decode_claims_unverified(&token).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn shortening_threshold_defaults_to_220() {
        // claims JSON without the shorteningThreshold field
        let json = format!(
            "{{\"jti\":\"{}\",\"format\":8,\"cipherCombo\":\"SIV_GCM\"}}",
            uuid::Uuid::new_v4()
        );
        let payload = general_purpose::URL_SAFE_NO_PAD.encode(json.as_bytes());
        let header = general_purpose::URL_SAFE_NO_PAD
            .encode(b"{\"alg\":\"HS256\",\"typ\":\"JWT\",\"kid\":\"masterkeyfile:masterkey.cryptomator\"}");
        let token = format!("{header}.{payload}.");

        let decoded = decode_claims_unverified(&token).unwrap();
        assert_eq!(decoded.shortening_threshold(), 220);
    }

    #[test]
    fn create_config_token_is_validatable() {
        let key = MasterKey::random().unwrap();
        let token = create_config_token(
            &NewVaultConfig {
                jti: "test-vault".to_string(),
                shortening_threshold: 100,
            },
            &key,
        )
        .unwrap();

        let claims = validate_claims(&token, &key).unwrap();
        assert_eq!(claims.jti, "test-vault");
        assert_eq!(claims.shortening_threshold(), 100);
    }
}
