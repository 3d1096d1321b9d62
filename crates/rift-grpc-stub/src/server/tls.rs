//! TLS for the stub server and its convenience client.
//!
//! Certificates and keys are taken as PEM bytes. Both sides use the `ring`
//! crypto provider and negotiate `h2` through ALPN.

use anyhow::{bail, Context};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

const ALPN_H2: &[u8] = b"h2";
const DEFAULT_SERVER_NAME: &str = "localhost";

/// PEM-encoded certificate material for serving over TLS.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    /// CA used by [`StubServer::conn`](super::StubServer::conn) to verify
    /// the server. Without it the convenience client accepts any
    /// certificate.
    pub ca_cert_pem: Option<Vec<u8>>,
    /// Name the convenience client expects in the certificate.
    pub server_name: String,
}

impl TlsMaterial {
    pub fn new(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
            ca_cert_pem: None,
            server_name: DEFAULT_SERVER_NAME.to_string(),
        }
    }

    pub fn with_ca_cert(mut self, ca_cert_pem: impl Into<Vec<u8>>) -> Self {
        self.ca_cert_pem = Some(ca_cert_pem.into());
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Read certificate, key and optional CA from PEM files.
    pub fn from_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        ca_cert_path: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let read = |path: &Path| {
            std::fs::read(path).with_context(|| format!("Failed to read '{}'", path.display()))
        };
        let mut material = Self::new(read(cert_path.as_ref())?, read(key_path.as_ref())?);
        if let Some(path) = ca_cert_path {
            material.ca_cert_pem = Some(read(path)?);
        }
        Ok(material)
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn load_certs(pem: &[u8], what: &str) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let mut reader = pem;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .with_context(|| format!("Failed to parse {what}"))?;
    if certs.is_empty() {
        bail!("No certificates found in {what}");
    }
    Ok(certs)
}

fn load_key(pem: &[u8]) -> anyhow::Result<PrivateKeyDer<'static>> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)
        .context("Failed to parse private key")?
        .context("No private key found")
}

/// Build the server-side acceptor, advertising `h2`.
pub fn create_tls_acceptor(material: &TlsMaterial) -> anyhow::Result<TlsAcceptor> {
    let certs = load_certs(&material.cert_pem, "certificate")?;
    let key = load_key(&material.key_pem)?;

    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Failed to build TLS configuration")?;
    config.alpn_protocols = vec![ALPN_H2.to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the client-side connector and the name to present via SNI.
pub(crate) fn create_tls_connector(
    material: &TlsMaterial,
) -> anyhow::Result<(TlsConnector, ServerName<'static>)> {
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?;

    let mut config = match &material.ca_cert_pem {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca, "CA certificate")? {
                roots.add(cert).context("Failed to add CA certificate")?;
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        None => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth(),
    };
    config.alpn_protocols = vec![ALPN_H2.to_vec()];

    let server_name = ServerName::try_from(material.server_name.clone())
        .with_context(|| format!("Invalid server name '{}'", material.server_name))?;
    Ok((TlsConnector::from(Arc::new(config)), server_name))
}

/// Accepts any server certificate. Used by the convenience client when no
/// CA certificate is configured.
#[derive(Debug)]
pub struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}
