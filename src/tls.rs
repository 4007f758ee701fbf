//! TLS material for the 2121 listener (§2a, §6): loads an operator-supplied
//! certificate/key pair if configured, otherwise generates and persists a
//! self-signed one on first run, the way the lineage generates its wallet
//! file on first run.

use std::io::Error as IoError;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

use crate::config::SecurityConfig;
use crate::error::AppError;

fn load_pem_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, IoError> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()
}

fn load_pem_key(path: &Path) -> Result<PrivateKeyDer<'static>, AppError> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| AppError::Config(format!("no private key found in {}", path.display())))
}

/// Generates a self-signed certificate for `localhost`/`127.0.0.1` and
/// writes it alongside the key as PEM files at `cert_path`/`key_path`, so
/// subsequent restarts reuse the same identity instead of minting a new
/// one (and a new set of browser warnings) every time.
fn generate_self_signed(cert_path: &Path, key_path: &Path) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), AppError> {
    let subject_alt_names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    let generated = rcgen::generate_simple_self_signed(subject_alt_names)
        .map_err(|e| AppError::Config(format!("failed to generate self-signed certificate: {e}")))?;

    let cert_pem = generated.cert.pem();
    let key_pem = generated.key_pair.serialize_pem();

    if let Some(parent) = cert_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = key_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(cert_path, &cert_pem)?;
    std::fs::write(key_path, &key_pem)?;

    let chain = load_pem_chain(cert_path)?;
    let key = load_pem_key(key_path)?;
    Ok((chain, key))
}

/// Builds the `rustls::ServerConfig` for the 2121 listener per `security`:
/// an operator-supplied PEM pair if both paths are set and exist, else a
/// generated-and-cached self-signed pair under the data directory.
pub fn server_config(security: &SecurityConfig, data_dir: &Path) -> Result<Arc<ServerConfig>, AppError> {
    let (cert_path, key_path) = if !security.cert_path.is_empty() && !security.key_path.is_empty() {
        (
            std::path::PathBuf::from(&security.cert_path),
            std::path::PathBuf::from(&security.key_path),
        )
    } else {
        (
            data_dir.join("tls-cert.pem"),
            data_dir.join("tls-key.pem"),
        )
    };

    let (chain, key) = if cert_path.exists() && key_path.exists() {
        (load_pem_chain(&cert_path)?, load_pem_key(&key_path)?)
    } else {
        generate_self_signed(&cert_path, &key_path)?
    };

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| AppError::Config(format!("invalid TLS certificate/key pair: {e}")))?;
    Ok(Arc::new(config))
}
