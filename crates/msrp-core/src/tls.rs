//! TLS configuration helpers for `msrps` connections

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig};
use sha2::{Digest, Sha256};

use crate::error::{MsrpError, Result};

fn read_certs(path: &Path) -> Result<Vec<Certificate>> {
    let file = std::fs::File::open(path)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))?;
    if certs.is_empty() {
        return Err(MsrpError::tls(format!("no certificate in {}", path.display())));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn read_key(path: &Path) -> Result<PrivateKey> {
    let file = std::fs::File::open(path)?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(file))?;
    if keys.is_empty() {
        let file = std::fs::File::open(path)?;
        keys = rustls_pemfile::rsa_private_keys(&mut BufReader::new(file))?;
    }
    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| MsrpError::tls(format!("no private key in {}", path.display())))
}

/// Server side config from a PEM certificate chain and private key
pub fn server_config_from_pem(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    let certs = read_certs(cert_path)?;
    let key = read_key(key_path)?;
    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| MsrpError::tls(e.to_string()))?;
    Ok(Arc::new(config))
}

/// Client side config trusting the CA certificates of a PEM file
pub fn client_config_from_pem(ca_path: &Path) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(ca_path)? {
        roots
            .add(&cert)
            .map_err(|e| MsrpError::tls(e.to_string()))?;
    }
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// SDP `a=fingerprint` value of the first certificate in a PEM file
pub fn certificate_fingerprint(cert_path: &Path) -> Result<String> {
    let certs = read_certs(cert_path)?;
    Ok(fingerprint_of(&certs[0].0))
}

/// `SHA-256 AB:CD:...` over a DER certificate
pub fn fingerprint_of(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    let hex: Vec<String> = digest.iter().map(|b| format!("{:02X}", b)).collect();
    format!("SHA-256 {}", hex.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint_of(b"not really a certificate");
        assert!(fp.starts_with("SHA-256 "));
        // 32 bytes, two hex digits each, 31 separators
        assert_eq!(fp.len(), "SHA-256 ".len() + 32 * 2 + 31);
    }

    #[test]
    fn test_missing_pem_file_is_io_error() {
        let err = server_config_from_pem(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"))
            .unwrap_err();
        assert!(matches!(err, MsrpError::Io(_)));
    }
}
