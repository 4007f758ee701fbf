//! Identity-key loader: JSON key file with legacy-path fallback and
//! environment-variable override, per §6 "Key-identity file".

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use crate::crypto::{Secp256k1Crypto, WalletCrypto};
use crate::network_type::NetworkType;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("no identity key found: checked {0}, legacy path, and environment")]
    NotFound(String),
    #[error("malformed identity file: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    root_key_hex: String,
    identity_key: String,
    network: String,
}

/// Loaded identity, zeroized on drop.
pub struct Identity {
    pub root_key_hex: String,
    pub identity_key: String, // compressed pubkey hex
    pub network: NetworkType,
}

impl Drop for Identity {
    fn drop(&mut self) {
        self.root_key_hex.zeroize();
    }
}

pub fn default_identity_path() -> PathBuf {
    crate::config::get_data_dir().join("wallet-identity.json")
}

fn legacy_identity_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clawdbot")
        .join("bsv-wallet")
        .join("wallet-identity.json")
}

/// Loads the identity in priority order: explicit `--key-file` path (if
/// given), environment variables, the default path, then the legacy
/// fallback path.
pub fn load_identity(key_file: Option<&Path>) -> Result<Identity, IdentityError> {
    if let (Ok(root_key_hex), Ok(network_str)) = (
        std::env::var("GEBUNDEN_PRIVATE_KEY"),
        std::env::var("GEBUNDEN_NETWORK"),
    ) {
        return from_root_key(root_key_hex, &network_str);
    }

    let candidates: Vec<PathBuf> = match key_file {
        Some(p) => vec![p.to_path_buf()],
        None => vec![default_identity_path(), legacy_identity_path()],
    };

    for path in &candidates {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let file: IdentityFile = serde_json::from_str(&contents)
                .map_err(|e| IdentityError::Malformed(e.to_string()))?;
            return from_root_key(file.root_key_hex, &file.network);
        }
    }

    Err(IdentityError::NotFound(
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    ))
}

fn from_root_key(root_key_hex: String, network_str: &str) -> Result<Identity, IdentityError> {
    let network = NetworkType::parse(network_str)
        .ok_or_else(|| IdentityError::Malformed(format!("unknown network '{network_str}'")))?;
    let crypto = Secp256k1Crypto::new();
    let identity_key = crypto
        .public_key_from_private(&root_key_hex)
        .map_err(|e| IdentityError::Malformed(e.to_string()))?;
    Ok(Identity {
        root_key_hex,
        identity_key,
        network,
    })
}

/// Writes a freshly generated identity file atomically (temp file + rename),
/// matching the daemon's other durable-write pattern.
pub fn generate_and_save(path: &Path, network: NetworkType) -> Result<Identity, IdentityError> {
    use rand::RngCore;
    let mut rng = rand::rngs::OsRng;
    let mut key_bytes = [0u8; 32];
    rng.fill_bytes(&mut key_bytes);
    let root_key_hex = hex::encode(key_bytes);

    let crypto = Secp256k1Crypto::new();
    let identity_key = crypto
        .public_key_from_private(&root_key_hex)
        .map_err(|e| IdentityError::Malformed(e.to_string()))?;

    let file = IdentityFile {
        root_key_hex: root_key_hex.clone(),
        identity_key: identity_key.clone(),
        network: network.to_string(),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&file).map_err(|e| IdentityError::Malformed(e.to_string()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)?;

    Ok(Identity {
        root_key_hex,
        identity_key,
        network,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_reload_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet-identity.json");
        let generated = generate_and_save(&path, NetworkType::Test).unwrap();
        let loaded = load_identity(Some(&path)).unwrap();
        assert_eq!(loaded.identity_key, generated.identity_key);
        assert_eq!(loaded.network, NetworkType::Test);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let result = load_identity(Some(&path));
        assert!(matches!(result, Err(IdentityError::NotFound(_))));
    }
}
