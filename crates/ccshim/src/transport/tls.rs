//! Client TLS material for dialing the peer.
//!
//! The client key and certificate files hold base64-encoded PEM, the way the
//! peer hands them to launched chaincode. The root certificate file is plain
//! PEM.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

use ccshim_core::config::TlsConfig;
use ccshim_core::ConfigError;

/// Build the client TLS config for `tls`. Requires `enabled` to be set.
///
/// Every file is parsed here so bad material is a configuration error at
/// startup rather than a handshake failure later.
pub fn client_config(tls: &TlsConfig) -> Result<ClientTlsConfig, ConfigError> {
    let key_path = required(&tls.client_key_path, "client key path")?;
    let cert_path = required(&tls.client_cert_path, "client certificate path")?;
    let root_path = required(&tls.root_cert_path, "root certificate file")?;

    let key_pem = decode_base64_file(key_path)?;
    let cert_pem = decode_base64_file(cert_path)?;
    let root_pem = read(root_path)?;

    parse_key(&key_pem, key_path)?;
    parse_certs(&cert_pem, cert_path)?;
    let roots = parse_certs(&root_pem, root_path)?;
    tracing::debug!(roots = roots.len(), root = %root_path.display(), "loaded peer TLS material");

    Ok(ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(root_pem))
        .identity(Identity::from_pem(cert_pem, key_pem)))
}

fn required<'a>(path: &'a Option<PathBuf>, what: &str) -> Result<&'a Path, ConfigError> {
    path.as_deref()
        .ok_or_else(|| ConfigError::Tls(format!("{what} must be set when TLS is enabled")))
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))
}

fn decode_base64_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let raw = read(path)?;
    let text: Vec<u8> = raw.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
    STANDARD
        .decode(text)
        .map_err(|e| ConfigError::Tls(format!("{} is not base64: {e}", path.display())))
}

fn parse_certs(pem: &[u8], path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("failed to parse certificates in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ConfigError::Tls(format!("no certificate found in {}", path.display())));
    }
    Ok(certs)
}

fn parse_key(pem: &[u8], path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| ConfigError::Tls(format!("failed to parse private key in {}: {e}", path.display())))?
        .ok_or_else(|| ConfigError::Tls(format!("no private key found in {}", path.display())))
}
