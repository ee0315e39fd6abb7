//! TLS for the raw-socket and WebSocket clients (`https://` and `wss://`).
//!
//! Roots come from `webpki-roots`, extended with any certificates in the
//! configured CA bundle. The library-backed client uses reqwest's own TLS
//! stack and does not go through this module.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::error::{Error, Result};

/// Build a client configuration trusting the webpki roots plus `ca_file`.
///
/// # Errors
///
/// Returns [`Error::Tls`] if the CA bundle cannot be read, contains no
/// certificates, or the configuration cannot be built.
pub fn client_config(ca_file: Option<&Path>) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(path) = ca_file {
        for cert in load_certs_from_file(path)? {
            roots
                .add(cert)
                .map_err(|e| Error::Tls(format!("{}: {}", path.display(), e)))?;
        }
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Read every PEM certificate in `path`.
///
/// # Errors
///
/// Returns [`Error::Tls`] if the file cannot be read or holds no certificate.
pub fn load_certs_from_file(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| Error::Tls(format!("{}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("{}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("{}: no certificates found", path.display())));
    }

    Ok(certs)
}

/// Client-side TLS connector.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Create a connector from a client configuration.
    #[must_use]
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsConnector::from(config),
        }
    }

    /// Run the TLS handshake for `domain` over `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] for an invalid server name and
    /// [`Error::Io`] if the handshake fails.
    pub async fn connect(&self, domain: &str, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|_| Error::Tls(format!("invalid DNS name: {}", domain)))?;

        Ok(self.inner.connect(server_name, stream).await?)
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}
