//! Mutual-TLS credential loading
//!
//! Reads the CA certificate, client certificate and client key from disk and
//! checks that each holds the PEM material it should before any connection
//! is attempted. The bytes are handed to rumqttc as-is; rustls negotiates
//! TLS 1.2 or 1.3 only.

use rumqttc::{TlsConfiguration, Transport};
use rustls_pemfile::Item;
use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The three files that make up a client identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialArtifact {
    CaCertificate,
    ClientCertificate,
    ClientKey,
}

impl fmt::Display for CredentialArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialArtifact::CaCertificate => "CA certificate",
            CredentialArtifact::ClientCertificate => "client certificate",
            CredentialArtifact::ClientKey => "client key",
        })
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Cannot read {artifact} at {}", path.display())]
    Unreadable {
        artifact: CredentialArtifact,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{artifact} at {} contains no certificate", path.display())]
    NoCertificate {
        artifact: CredentialArtifact,
        path: PathBuf,
    },
    #[error("{artifact} at {} is not valid PEM: {detail}", path.display())]
    InvalidPem {
        artifact: CredentialArtifact,
        path: PathBuf,
        detail: String,
    },
    #[error("{artifact} at {} contains no private key", path.display())]
    NoPrivateKey {
        artifact: CredentialArtifact,
        path: PathBuf,
    },
    #[error("{artifact} at {} contains {count} private keys, expected one", path.display())]
    MultiplePrivateKeys {
        artifact: CredentialArtifact,
        path: PathBuf,
        count: usize,
    },
}

impl CredentialError {
    pub fn artifact(&self) -> CredentialArtifact {
        match self {
            CredentialError::Unreadable { artifact, .. }
            | CredentialError::NoCertificate { artifact, .. }
            | CredentialError::InvalidPem { artifact, .. }
            | CredentialError::NoPrivateKey { artifact, .. }
            | CredentialError::MultiplePrivateKeys { artifact, .. } => *artifact,
        }
    }
}

/// Validated PEM material for a mutually-authenticated connection
#[derive(Clone)]
pub struct TlsMaterial {
    ca: Vec<u8>,
    client_cert: Vec<u8>,
    client_key: Vec<u8>,
}

// Key bytes stay out of logs.
impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_bytes", &self.ca.len())
            .field("client_cert_bytes", &self.client_cert.len())
            .finish_non_exhaustive()
    }
}

impl TlsMaterial {
    /// Load and check all three artifacts
    pub fn load(ca: &Path, client_cert: &Path, client_key: &Path) -> Result<Self, CredentialError> {
        let ca = read_certificates(CredentialArtifact::CaCertificate, ca)?;
        let client_cert = read_certificates(CredentialArtifact::ClientCertificate, client_cert)?;
        let client_key = read_private_key(CredentialArtifact::ClientKey, client_key)?;

        tracing::debug!("Loaded TLS credentials");

        Ok(Self {
            ca,
            client_cert,
            client_key,
        })
    }

    /// rumqttc transport presenting the client identity and trusting only the CA
    pub fn transport(&self) -> Transport {
        Transport::tls_with_config(TlsConfiguration::Simple {
            ca: self.ca.clone(),
            alpn: None,
            client_auth: Some((self.client_cert.clone(), self.client_key.clone())),
        })
    }
}

fn read_artifact(artifact: CredentialArtifact, path: &Path) -> Result<Vec<u8>, CredentialError> {
    std::fs::read(path).map_err(|source| CredentialError::Unreadable {
        artifact,
        path: path.to_path_buf(),
        source,
    })
}

/// Tally of the PEM sections found in a file
#[derive(Debug, Default, PartialEq)]
struct PemSummary {
    certificates: usize,
    private_keys: usize,
}

fn summarize_pem(pem: &[u8]) -> Result<PemSummary, String> {
    let mut summary = PemSummary::default();
    for item in rustls_pemfile::read_all(&mut BufReader::new(pem)) {
        match item.map_err(|e| e.to_string())? {
            Item::X509Certificate(_) => summary.certificates += 1,
            Item::Pkcs1Key(_) | Item::Pkcs8Key(_) | Item::Sec1Key(_) => summary.private_keys += 1,
            _ => {}
        }
    }
    Ok(summary)
}

fn read_certificates(artifact: CredentialArtifact, path: &Path) -> Result<Vec<u8>, CredentialError> {
    let pem = read_artifact(artifact, path)?;
    let summary = summarize_pem(&pem).map_err(|detail| CredentialError::InvalidPem {
        artifact,
        path: path.to_path_buf(),
        detail,
    })?;

    if summary.certificates == 0 {
        return Err(CredentialError::NoCertificate {
            artifact,
            path: path.to_path_buf(),
        });
    }
    Ok(pem)
}

fn read_private_key(artifact: CredentialArtifact, path: &Path) -> Result<Vec<u8>, CredentialError> {
    let pem = read_artifact(artifact, path)?;
    let summary = summarize_pem(&pem).map_err(|detail| CredentialError::InvalidPem {
        artifact,
        path: path.to_path_buf(),
        detail,
    })?;

    match summary.private_keys {
        0 => Err(CredentialError::NoPrivateKey {
            artifact,
            path: path.to_path_buf(),
        }),
        1 => Ok(pem),
        count => Err(CredentialError::MultiplePrivateKeys {
            artifact,
            path: path.to_path_buf(),
            count,
        }),
    }
}
