//! rustls client configuration from the opaque certificate paths.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use tokio_tungstenite::Connector;

use crate::config::TlsConfig;
use crate::types::SdkError;

/// Build the TLS connector for a `wss://` link.
///
/// Returns `None` when no paths are configured, which leaves tungstenite on
/// its built-in web roots.
pub(crate) fn connector(tls: &TlsConfig) -> Result<Option<Connector>, SdkError> {
    if tls.ca_path.is_none() && tls.cert_path.is_none() && tls.key_path.is_none() {
        return Ok(None);
    }

    let ca_path = tls.ca_path.as_deref().ok_or_else(|| {
        SdkError::Config("ca_path is required when a client certificate is configured".into())
    })?;
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        roots
            .add(cert)
            .map_err(|e| SdkError::Tls(format!("{}: {e}", ca_path.display())))?;
    }

    let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| SdkError::Tls(e.to_string()))?
    .with_root_certificates(roots);

    let config = match (&tls.cert_path, &tls.key_path) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(|e| SdkError::Tls(e.to_string()))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(SdkError::Config(
                "cert_path and key_path must be set together".into(),
            ))
        }
    };

    tracing::debug!(ca = %ca_path.display(), client_auth = tls.has_client_auth(), "tls configured");
    Ok(Some(Connector::Rustls(Arc::new(config))))
}

fn open(path: &Path) -> Result<BufReader<File>, SdkError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| SdkError::Config(format!("{}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, SdkError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SdkError::Tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(SdkError::Tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, SdkError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| SdkError::Tls(format!("{}: {e}", path.display())))?
        .ok_or_else(|| SdkError::Tls(format!("{}: no private key found", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn no_paths_means_default_roots() {
        assert!(connector(&TlsConfig::default()).unwrap().is_none());
    }

    #[test]
    fn half_configured_client_auth_is_rejected() {
        let tls = TlsConfig {
            ca_path: None,
            cert_path: Some(PathBuf::from("/nonexistent/cert.pem")),
            key_path: None,
        };
        assert!(matches!(connector(&tls), Err(SdkError::Config(_))));
    }

    #[test]
    fn missing_ca_file_is_a_config_error() {
        let tls = TlsConfig {
            ca_path: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..TlsConfig::default()
        };
        assert!(matches!(connector(&tls), Err(SdkError::Config(_))));
    }
}
