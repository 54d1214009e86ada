//! mTLS material for the control plane.
//!
//! Loads the node's CA, certificate and key from PEM and builds rustls
//! server and client configs that both require the peer to present a
//! certificate signed by that CA. Also generates throwaway CA and node
//! certificates for development clusters and tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PEM in {what}: {source}")]
    Pem {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(&'static str),

    #[error("no private key found")]
    NoPrivateKey,

    #[error("tls configuration error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("client verifier error: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),
}

/// PEM-encoded CA bundle plus this node's certificate and key.
#[derive(Clone)]
pub struct TlsIdentity {
    pub ca_pem: Vec<u8>,
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("ca_pem", &self.ca_pem.len())
            .field("cert_pem", &self.cert_pem.len())
            .finish_non_exhaustive()
    }
}

impl TlsIdentity {
    pub fn from_files(ca: &Path, cert: &Path, key: &Path) -> Result<Self, TlsError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|source| TlsError::Read {
                path: path.to_path_buf(),
                source,
            })
        };
        Ok(Self {
            ca_pem: read(ca)?,
            cert_pem: read(cert)?,
            key_pem: read(key)?,
        })
    }

    /// Trust store holding every certificate in the CA bundle.
    pub fn root_store(&self) -> Result<RootCertStore, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in parse_certs(&self.ca_pem, "ca bundle")? {
            roots.add(cert)?;
        }
        Ok(roots)
    }

    /// Server config that rejects clients without a CA-signed certificate.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, TlsError> {
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(self.root_store()?), provider())
                .build()?;

        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(verifier)
            .with_single_cert(parse_certs(&self.cert_pem, "certificate")?, self.private_key()?)?;
        Ok(Arc::new(config))
    }

    /// Client config presenting this node's certificate.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, TlsError> {
        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(self.root_store()?)
            .with_client_auth_cert(parse_certs(&self.cert_pem, "certificate")?, self.private_key()?)?;
        Ok(Arc::new(config))
    }

    fn private_key(&self) -> Result<PrivateKeyDer<'static>, TlsError> {
        rustls_pemfile::private_key(&mut self.key_pem.as_slice())
            .map_err(|source| TlsError::Pem {
                what: "private key",
                source,
            })?
            .ok_or(TlsError::NoPrivateKey)
    }
}

pub(crate) fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn parse_certs(pem: &[u8], what: &'static str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem { what, source })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(what));
    }
    Ok(certs)
}

/// A generated certificate and private key pair.
#[derive(Debug, Clone)]
pub struct CertKeyPair {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

/// A self-signed cluster CA able to issue node certificates.
pub struct ClusterCa {
    pair: CertKeyPair,
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl ClusterCa {
    pub fn generate() -> Result<Self, TlsError> {
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, "cutover");
        dn.push(DnType::CommonName, "cutover cluster CA");
        params.distinguished_name = dn;

        let key = KeyPair::generate()?;
        let cert = params.self_signed(&key)?;
        info!("generated cluster CA certificate");

        Ok(Self {
            pair: CertKeyPair {
                cert_pem: cert.pem(),
                key_pem: key.serialize_pem(),
            },
            cert,
            key,
        })
    }

    pub fn pem(&self) -> &CertKeyPair {
        &self.pair
    }

    /// Issue a certificate usable both as control-plane server and client.
    pub fn issue(&self, node: &str, addresses: &[String]) -> Result<CertKeyPair, TlsError> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, "cutover");
        dn.push(DnType::CommonName, node);
        params.distinguished_name = dn;
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        for addr in addresses {
            if let Ok(ip) = addr.parse::<std::net::IpAddr>() {
                params.subject_alt_names.push(SanType::IpAddress(ip));
            } else {
                params
                    .subject_alt_names
                    .push(SanType::DnsName(addr.clone().try_into()?));
            }
        }

        let node_key = KeyPair::generate()?;
        let node_cert = params.signed_by(&node_key, &self.cert, &self.key)?;

        info!(%node, sans = addresses.len(), "issued node certificate");

        Ok(CertKeyPair {
            cert_pem: node_cert.pem(),
            key_pem: node_key.serialize_pem(),
        })
    }

    /// Issue a node certificate and bundle it with this CA.
    pub fn identity(&self, node: &str, addresses: &[String]) -> Result<TlsIdentity, TlsError> {
        let pair = self.issue(node, addresses)?;
        Ok(TlsIdentity {
            ca_pem: self.pair.cert_pem.clone().into_bytes(),
            cert_pem: pair.cert_pem.into_bytes(),
            key_pem: pair.key_pem.into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn generate_ca_succeeds() {
        let ca = ClusterCa::generate().unwrap();
        assert!(ca.pem().cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(ca.pem().key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn issue_with_ip_and_dns() {
        let ca = ClusterCa::generate().unwrap();
        let pair = ca
            .issue(
                "node-1",
                &["10.0.0.1".to_string(), "node1.cutover.internal".to_string()],
            )
            .unwrap();
        assert!(pair.cert_pem.contains("BEGIN CERTIFICATE"));
        assert_ne!(pair.cert_pem, ca.pem().cert_pem);
    }

    #[test]
    fn builds_server_and_client_configs() {
        let ca = ClusterCa::generate().unwrap();
        let identity = ca.identity("node-1", &["127.0.0.1".to_string()]).unwrap();
        identity.server_config().unwrap();
        identity.client_config().unwrap();
    }

    #[test]
    fn empty_ca_bundle_is_rejected() {
        let ca = ClusterCa::generate().unwrap();
        let mut identity = ca.identity("node-1", &["127.0.0.1".to_string()]).unwrap();
        identity.ca_pem = Vec::new();
        assert!(matches!(
            identity.server_config(),
            Err(TlsError::NoCertificates(_))
        ));
    }

    #[test]
    fn missing_key_is_rejected() {
        let ca = ClusterCa::generate().unwrap();
        let mut identity = ca.identity("node-1", &["127.0.0.1".to_string()]).unwrap();
        identity.key_pem = identity.cert_pem.clone();
        assert!(matches!(identity.client_config(), Err(TlsError::NoPrivateKey)));
    }

    #[test]
    fn loads_from_files() {
        let ca = ClusterCa::generate().unwrap();
        let pair = ca.issue("node-1", &["127.0.0.1".to_string()]).unwrap();

        let write = |content: &str| {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(content.as_bytes()).unwrap();
            file
        };
        let ca_file = write(&ca.pem().cert_pem);
        let cert_file = write(&pair.cert_pem);
        let key_file = write(&pair.key_pem);

        let identity =
            TlsIdentity::from_files(ca_file.path(), cert_file.path(), key_file.path()).unwrap();
        identity.server_config().unwrap();
    }

    #[test]
    fn missing_file_reports_path() {
        let err = TlsIdentity::from_files(
            Path::new("/nonexistent/ca.pem"),
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ca.pem"));
    }
}
