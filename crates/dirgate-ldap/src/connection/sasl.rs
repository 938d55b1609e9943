//! SASL bind settings

use dirgate_core::config::{QualityOfProtection, SaslMechanism, SecurityStrength};
use dirgate_core::LdapProperties;
use tracing::debug;

use crate::error::{DirectoryError, DirectoryResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslConfig {
    pub mechanism: SaslMechanism,
    /// Only carried by mechanisms that support a realm
    pub realm: Option<String>,
    pub authorization_id: Option<String>,
    pub mutual_auth: Option<bool>,
    pub quality_of_protection: Option<QualityOfProtection>,
    pub security_strength: Option<SecurityStrength>,
}

/// Build the SASL configuration for the named mechanism.
///
/// Only EXTERNAL can bind over the ldap3 client; other mechanisms are
/// rejected here instead of failing on every connect.
pub fn new_sasl_config(mechanism: &str, props: &LdapProperties) -> DirectoryResult<SaslConfig> {
    let mechanism = mechanism.parse::<SaslMechanism>()?;
    if mechanism != SaslMechanism::External {
        return Err(DirectoryError::configuration(format!(
            "SASL mechanism {:?} is not supported for [{}]; use EXTERNAL",
            mechanism, props.ldap_url
        )));
    }

    let realm = if mechanism.supports_realm() {
        non_blank(&props.sasl_realm)
    } else {
        if non_blank(&props.sasl_realm).is_some() {
            debug!("SASL {:?} does not take a realm; ignoring it", mechanism);
        }
        None
    };

    let quality_of_protection = non_blank(&props.sasl_quality_of_protection)
        .map(|q| q.parse::<QualityOfProtection>())
        .transpose()?;
    let security_strength = non_blank(&props.sasl_security_strength)
        .map(|s| s.parse::<SecurityStrength>())
        .transpose()?;

    Ok(SaslConfig {
        mechanism,
        realm,
        authorization_id: non_blank(&props.sasl_authorization_id),
        mutual_auth: props.sasl_mutual_auth,
        quality_of_protection,
        security_strength,
    })
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
