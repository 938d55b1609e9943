//! Configuration loading for the Dirgate CLI
//!
//! Example config:
//! ```toml
//! log_level = "info"
//!
//! [ldap]
//! ldap_url = "ldaps://ldap1.example.com ldaps://ldap2.example.com"
//! bind_dn = "cn=admin,dc=example,dc=com"
//! bind_credential = "secret"
//! type = "AUTHENTICATED"
//! base_dn = "ou=people,dc=example,dc=com"
//! search_filter = "(uid={user})"
//! principal_attribute_list = ["mail", "cn:commonName"]
//!
//! [ldap.password_policy]
//! type = "AD"
//! ```

use anyhow::{Context, Result};
use dirgate_core::LdapAuthenticationProperties;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const ENV_LDAP_URL: &str = "DIRGATE_LDAP_URL";
const ENV_BIND_DN: &str = "DIRGATE_BIND_DN";
const ENV_BIND_CREDENTIAL: &str = "DIRGATE_BIND_CREDENTIAL";
const ENV_BASE_DN: &str = "DIRGATE_BASE_DN";
const ENV_SEARCH_FILTER: &str = "DIRGATE_SEARCH_FILTER";
const ENV_LOG_LEVEL: &str = "DIRGATE_LOG_LEVEL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default)]
    pub log_level: Option<String>,

    /// Directory target
    #[serde(default)]
    pub ldap: LdapAuthenticationProperties,
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    /// Load the file when given, then apply environment overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_LDAP_URL) {
            self.ldap.connection.ldap_url = url;
        }
        if let Some(bind_dn) = lookup(ENV_BIND_DN) {
            self.ldap.connection.bind_dn = Some(bind_dn);
        }
        if let Some(credential) = lookup(ENV_BIND_CREDENTIAL) {
            self.ldap.connection.bind_credential = Some(credential);
        }
        if let Some(base_dn) = lookup(ENV_BASE_DN) {
            self.ldap.base_dn = Some(base_dn);
        }
        if let Some(filter) = lookup(ENV_SEARCH_FILTER) {
            self.ldap.search_filter = Some(filter);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = Some(level);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.ldap
            .connection
            .validate()
            .with_context(|| format!("Invalid directory settings; set {} or ldap.ldap_url", ENV_LDAP_URL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirgate_core::config::{AuthenticationType, LdapType};
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
log_level = "debug"

[ldap]
ldap_url = "ldap://localhost:389"
bind_dn = "cn=admin,dc=example,dc=com"
bind_credential = "admin"
type = "DIRECT"
dn_format = "uid=%s,ou=people,dc=example,dc=com"
principal_attribute_list = ["mail", "cn:commonName"]

[ldap.password_policy]
type = "AD"
password_warning_number_of_days = 14
"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.ldap.connection.ldap_url, "ldap://localhost:389");
        assert_eq!(config.ldap.auth_type, AuthenticationType::Direct);
        assert_eq!(config.ldap.principal_attribute_list.len(), 2);
        assert_eq!(config.ldap.password_policy.policy_type, LdapType::Ad);
        assert_eq!(config.ldap.password_policy.password_warning_number_of_days, 14);
        // untouched settings keep their defaults
        assert!(config.ldap.collect_dn_attribute);
        assert_eq!(config.ldap.password_policy.login_failures, 5);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::from_file(dir.path().join("missing.toml")).is_err());

        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[ldap\nldap_url = ").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_LDAP_URL, "ldaps://ldap.example.com"),
            (ENV_BASE_DN, "ou=staff,dc=example,dc=com"),
            (ENV_SEARCH_FILTER, "(mail={user})"),
            (ENV_LOG_LEVEL, "warn"),
        ]);
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.ldap.connection.ldap_url, "ldaps://ldap.example.com");
        assert_eq!(config.ldap.base_dn.as_deref(), Some("ou=staff,dc=example,dc=com"));
        assert_eq!(config.ldap.search_filter.as_deref(), Some("(mail={user})"));
        assert_eq!(config.log_level.as_deref(), Some("warn"));
        // not overridden
        assert_eq!(config.ldap.connection.bind_dn.as_deref(), Some("cn=admin,dc=example,dc=com"));
    }

    #[test]
    fn test_default_config_is_invalid() {
        assert!(Config::default().validate().is_err());
    }
}
