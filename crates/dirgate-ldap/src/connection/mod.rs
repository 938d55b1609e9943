//! Connection descriptor construction
//!
//! Turns raw connection properties into an immutable [`ConnectionDescriptor`]:
//! normalized URL list, timeouts, TLS mode, SSL material, the connection
//! initializer (SASL, fast bind, simple bind or none) and the multi-URL
//! strategy.

mod sasl;
mod ssl;

pub use sasl::{new_sasl_config, SaslConfig};
pub use ssl::{new_ssl_config, SslConfig, SslCredential};

use dirgate_core::config::ConnectionStrategy;
use dirgate_core::LdapProperties;
use std::time::Duration;
use tracing::debug;

use crate::error::{DirectoryError, DirectoryResult};

/// What a freshly opened connection does before it is handed out
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionInitializer {
    /// Anonymous
    None,
    /// Simple bind with a service identity
    Bind { dn: String, credential: String },
    /// Active Directory fast concurrent bind
    FastBind,
    Sasl(SaslConfig),
}

impl std::fmt::Debug for ConnectionInitializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionInitializer::None => f.write_str("None"),
            ConnectionInitializer::Bind { dn, .. } => {
                f.debug_struct("Bind").field("dn", dn).finish_non_exhaustive()
            }
            ConnectionInitializer::FastBind => f.write_str("FastBind"),
            ConnectionInitializer::Sasl(config) => f.debug_tuple("Sasl").field(config).finish(),
        }
    }
}

/// Immutable network, TLS and bind settings for one directory target
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    /// Space separated URL list
    pub ldap_url: String,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub use_start_tls: bool,
    pub ssl: SslConfig,
    pub initializer: ConnectionInitializer,
    pub strategy: ConnectionStrategy,
}

impl ConnectionDescriptor {
    /// Individual URLs in declared order
    pub fn urls(&self) -> Vec<&str> {
        self.ldap_url.split_whitespace().collect()
    }

    /// Whether every URL is protected by SSL or STARTTLS
    pub fn is_secure(&self) -> bool {
        self.use_start_tls || self.urls().iter().all(|u| u.to_ascii_lowercase().starts_with("ldaps://"))
    }

    /// Concrete bind identity, if the initializer carries one
    pub fn bind_credentials(&self) -> Option<(&str, &str)> {
        match &self.initializer {
            ConnectionInitializer::Bind { dn, credential } => Some((dn, credential)),
            _ => None,
        }
    }
}

/// Normalize a comma and/or whitespace separated URL list into a single-space separated one
pub fn normalize_ldap_url(url: &str) -> String {
    url.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether the value looks like a directory URL
pub fn is_ldap_connection_url(value: &str) -> bool {
    match url::Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "ldap" | "ldaps" | "ldapi"),
        Err(_) => false,
    }
}

/// Build the connection descriptor for a directory target
pub fn new_connection_descriptor(props: &LdapProperties) -> DirectoryResult<ConnectionDescriptor> {
    if props.ldap_url.trim().is_empty() {
        return Err(DirectoryError::configuration("LDAP url cannot be empty/blank"));
    }

    let ldap_url = normalize_ldap_url(&props.ldap_url);
    debug!("Creating LDAP connection configuration for [{}]", ldap_url);

    let strategy = match props.connection_strategy.as_deref() {
        Some(name) if !name.trim().is_empty() => name.parse::<ConnectionStrategy>()?,
        _ => ConnectionStrategy::default(),
    };

    let ssl = new_ssl_config(props)?;
    let initializer = new_connection_initializer(props)?;

    let descriptor = ConnectionDescriptor {
        ldap_url,
        connect_timeout: Duration::from_secs(props.connect_timeout_secs),
        response_timeout: Duration::from_secs(props.response_timeout_secs),
        use_start_tls: props.use_start_tls,
        ssl,
        initializer,
        strategy,
    };

    if !descriptor.is_secure() {
        debug!("Connections to [{}] are not protected by SSL or STARTTLS", descriptor.ldap_url);
    }

    Ok(descriptor)
}

fn new_connection_initializer(props: &LdapProperties) -> DirectoryResult<ConnectionInitializer> {
    if let Some(mechanism) = props.sasl_mechanism.as_deref().filter(|m| !m.trim().is_empty()) {
        let config = new_sasl_config(mechanism, props)?;
        debug!("Using SASL {:?} connection initializer", config.mechanism);
        return Ok(ConnectionInitializer::Sasl(config));
    }

    if props.is_fast_bind() {
        debug!("Using fast bind connection initialization");
        return Ok(ConnectionInitializer::FastBind);
    }

    if let Some((dn, credential)) = props.bind_credentials() {
        debug!("Using bind DN [{}] for connection initialization", dn);
        return Ok(ConnectionInitializer::Bind {
            dn: dn.to_string(),
            credential: credential.to_string(),
        });
    }

    debug!("No bind DN or SASL mechanism configured; connections stay anonymous");
    Ok(ConnectionInitializer::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(url: &str) -> LdapProperties {
        LdapProperties {
            ldap_url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_blank_url_is_rejected() {
        let result = new_connection_descriptor(&props("  "));
        assert!(matches!(result, Err(DirectoryError::Configuration(_))));
    }

    #[test]
    fn test_url_list_is_normalized() {
        let mut p = props("ldap://a, ldap://b");
        p.use_start_tls = true;

        let descriptor = new_connection_descriptor(&p).unwrap();
        assert_eq!(descriptor.ldap_url, "ldap://a ldap://b");
        assert!(descriptor.use_start_tls);
        assert!(descriptor.is_secure());
        assert_eq!(descriptor.urls(), vec!["ldap://a", "ldap://b"]);
    }

    #[test]
    fn test_initializer_precedence() {
        let mut p = props("ldaps://dc.example.com");
        p.bind_dn = Some("*".to_string());
        p.bind_credential = Some("*".to_string());
        assert_eq!(
            new_connection_descriptor(&p).unwrap().initializer,
            ConnectionInitializer::FastBind
        );

        p.sasl_mechanism = Some("EXTERNAL".to_string());
        assert!(matches!(
            new_connection_descriptor(&p).unwrap().initializer,
            ConnectionInitializer::Sasl(_)
        ));

        let mut p = props("ldap://localhost");
        p.bind_dn = Some("cn=admin,dc=example,dc=com".to_string());
        p.bind_credential = Some("secret".to_string());
        let descriptor = new_connection_descriptor(&p).unwrap();
        assert_eq!(
            descriptor.bind_credentials(),
            Some(("cn=admin,dc=example,dc=com", "secret"))
        );
        assert!(!descriptor.is_secure());
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let mut p = props("ldap://localhost");
        p.connection_strategy = Some("FASTEST".to_string());
        assert!(matches!(
            new_connection_descriptor(&p),
            Err(DirectoryError::Configuration(_))
        ));
    }

    #[test]
    fn test_is_ldap_connection_url() {
        assert!(is_ldap_connection_url("ldap://localhost:389"));
        assert!(is_ldap_connection_url("ldaps://dc.example.com"));
        assert!(!is_ldap_connection_url("https://example.com"));
        assert!(!is_ldap_connection_url("not a url"));
    }
}
