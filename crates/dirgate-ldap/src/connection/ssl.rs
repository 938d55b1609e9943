//! SSL material for directory connections
//!
//! Precedence: explicit trust certificates, then a trust store / key store
//! pair, then the platform default trust. PEM is the only supported
//! encoding.

use dirgate_core::config::{HostnameVerifier, TrustManager};
use dirgate_core::LdapProperties;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{DirectoryError, DirectoryResult};

/// Where trust and client key material come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SslCredential {
    /// Platform trust, no client certificate
    Default,
    /// PEM bundle of trusted CA certificates
    TrustCertificates(PathBuf),
    /// PEM trust store plus an optional PEM key store (certificate chain and key)
    KeyStore {
        trust_store: PathBuf,
        keystore: Option<PathBuf>,
    },
}

#[derive(Clone)]
pub struct SslConfig {
    pub credential: SslCredential,
    pub hostname_verifier: HostnameVerifier,
    pub trust_manager: TrustManager,
    client_config: Option<Arc<ClientConfig>>,
}

impl std::fmt::Debug for SslConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SslConfig")
            .field("credential", &self.credential)
            .field("hostname_verifier", &self.hostname_verifier)
            .field("trust_manager", &self.trust_manager)
            .finish()
    }
}

impl SslConfig {
    /// Whether certificate and host name checks are switched off
    pub fn trusts_any(&self) -> bool {
        self.hostname_verifier == HostnameVerifier::Any || self.trust_manager == TrustManager::Any
    }

    /// TLS client configuration, `None` for the platform default
    pub fn client_config(&self) -> DirectoryResult<Option<Arc<ClientConfig>>> {
        Ok(self.client_config.clone())
    }
}

/// Resolve the SSL credential source and load its material
pub fn new_ssl_config(props: &LdapProperties) -> DirectoryResult<SslConfig> {
    let hostname_verifier = props.hostname_verifier.parse::<HostnameVerifier>()?;
    let trust_manager = match props.trust_manager.as_deref() {
        Some(name) if !name.trim().is_empty() => name.parse::<TrustManager>()?,
        _ => TrustManager::Default,
    };

    let credential = if let Some(path) = &props.trust_certificates {
        SslCredential::TrustCertificates(path.clone())
    } else if let Some(trust_store) = &props.trust_store {
        SslCredential::KeyStore {
            trust_store: trust_store.clone(),
            keystore: props.keystore.clone(),
        }
    } else {
        if props.keystore.is_some() {
            warn!("A key store is configured without a trust store; it will be ignored");
        }
        SslCredential::Default
    };

    let any = hostname_verifier == HostnameVerifier::Any || trust_manager == TrustManager::Any;
    let client_config = if any {
        if credential != SslCredential::Default {
            warn!("Certificate verification is disabled; configured trust material is not used");
        }
        None
    } else {
        build_client_config(&credential)?
    };

    Ok(SslConfig {
        credential,
        hostname_verifier,
        trust_manager,
        client_config,
    })
}

fn build_client_config(credential: &SslCredential) -> DirectoryResult<Option<Arc<ClientConfig>>> {
    match credential {
        SslCredential::Default => Ok(None),
        SslCredential::TrustCertificates(path) => {
            let roots = load_root_store(path)?;
            let config = ClientConfig::builder()
                .with_safe_defaults()
                .with_root_certificates(roots)
                .with_no_client_auth();
            Ok(Some(Arc::new(config)))
        }
        SslCredential::KeyStore {
            trust_store,
            keystore,
        } => {
            let roots = load_root_store(trust_store)?;
            let builder = ClientConfig::builder()
                .with_safe_defaults()
                .with_root_certificates(roots);

            let config = match keystore {
                Some(path) => {
                    let (certs, key) = load_key_store(path)?;
                    builder
                        .with_client_auth_cert(certs, key)
                        .map_err(|e| DirectoryError::Tls(format!("Invalid client certificate: {}", e)))?
                }
                None => builder.with_no_client_auth(),
            };
            Ok(Some(Arc::new(config)))
        }
    }
}

fn open(path: &Path) -> DirectoryResult<BufReader<File>> {
    let file = File::open(path).map_err(|e| {
        DirectoryError::configuration(format!("Cannot open {}: {}", path.display(), e))
    })?;
    Ok(BufReader::new(file))
}

fn load_root_store(path: &Path) -> DirectoryResult<RootCertStore> {
    let certs = rustls_pemfile::certs(&mut open(path)?)?;
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(&certs);
    debug!(
        "Loaded {} trusted certificate(s) from {} ({} ignored)",
        added,
        path.display(),
        ignored
    );

    if added == 0 {
        return Err(DirectoryError::configuration(format!(
            "No usable certificates found in {}",
            path.display()
        )));
    }
    Ok(roots)
}

fn load_key_store(path: &Path) -> DirectoryResult<(Vec<Certificate>, PrivateKey)> {
    let mut certs = Vec::new();
    let mut key = None;

    for item in rustls_pemfile::read_all(&mut open(path)?)? {
        match item {
            rustls_pemfile::Item::X509Certificate(der) => certs.push(Certificate(der)),
            rustls_pemfile::Item::PKCS8Key(der)
            | rustls_pemfile::Item::RSAKey(der)
            | rustls_pemfile::Item::ECKey(der) => {
                if key.is_none() {
                    key = Some(PrivateKey(der));
                }
            }
            _ => {}
        }
    }

    let key = key.ok_or_else(|| {
        DirectoryError::configuration(format!("No private key found in {}", path.display()))
    })?;
    if certs.is_empty() {
        return Err(DirectoryError::configuration(format!(
            "No certificate chain found in {}",
            path.display()
        )));
    }
    Ok((certs, key))
}
