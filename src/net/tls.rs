//! TLS configuration and certificate loading.
//!
//! Certificates come either from PEM files or, for development serving,
//! from a throwaway self-signed pair generated at startup.

use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};

/// Error type for TLS setup.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Certificate file not found: {0:?}")]
    CertificateNotFound(PathBuf),
    #[error("Private key file not found: {0:?}")]
    KeyNotFound(PathBuf),
    #[error("No certificates found in {0:?}")]
    NoCertificates(PathBuf),
    #[error("No private key found in {0:?}")]
    NoPrivateKey(PathBuf),
    #[error("Failed to read TLS material: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("Failed to generate ad-hoc certificate: {0}")]
    Generate(#[from] rcgen::Error),
}

/// Load TLS configuration from certificate and key files.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, TlsError> {
    if !cert_path.exists() {
        return Err(TlsError::CertificateNotFound(cert_path.to_path_buf()));
    }
    if !key_path.exists() {
        return Err(TlsError::KeyNotFound(key_path.to_path_buf()));
    }

    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let config = server_config(certs, key)?;
    tracing::info!(cert = ?cert_path, "TLS configuration loaded");
    Ok(config)
}

fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>, TlsError> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// A self-signed certificate and key that live only as long as the process.
///
/// Clients will not trust it unless told to; it exists so TLS code paths
/// can be exercised without provisioning real certificates.
pub struct AdhocCertificate {
    cert: CertificateDer<'static>,
    key: PrivatePkcs8KeyDer<'static>,
    cert_pem: String,
    key_pem: String,
}

impl AdhocCertificate {
    /// Generate a fresh pair for `common_name`.
    ///
    /// Host names are covered along with their subdomains; IP literals are
    /// covered as-is. `localhost` is always included.
    pub fn generate(common_name: &str) -> Result<Self, TlsError> {
        let mut names = vec![common_name.to_string()];
        if common_name.parse::<IpAddr>().is_err() {
            names.push(format!("*.{common_name}"));
        }
        if common_name != "localhost" {
            names.push("localhost".to_string());
        }

        let mut params = CertificateParams::new(names)?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, "Dummy Certificate");
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;

        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;

        tracing::warn!(common_name, "Generated ad-hoc self-signed TLS certificate");

        Ok(Self {
            cert: cert.der().clone(),
            key: PrivatePkcs8KeyDer::from(key_pair.serialize_der()),
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// DER form, for adding to a client's trust store.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.cert
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn server_config(&self) -> Result<Arc<ServerConfig>, TlsError> {
        server_config(vec![self.cert.clone()], PrivateKeyDer::Pkcs8(self.key.clone_key()))
    }
}

impl std::fmt::Debug for AdhocCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdhocCertificate").finish_non_exhaustive()
    }
}

/// Wraps accepted sockets in a server-side TLS session.
///
/// The handshake is not driven here; it runs on the first read or write,
/// inside the connection's own execution context.
#[derive(Clone)]
pub struct TlsAcceptor {
    config: Arc<ServerConfig>,
}

impl TlsAcceptor {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    pub fn wrap(
        &self,
        socket: TcpStream,
    ) -> Result<StreamOwned<ServerConnection, TcpStream>, TlsError> {
        let session = ServerConnection::new(Arc::clone(&self.config))?;
        Ok(StreamOwned::new(session, socket))
    }
}

impl std::fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAcceptor").finish_non_exhaustive()
    }
}
