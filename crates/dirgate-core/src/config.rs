//! Configuration for Dirgate
//!
//! The engine consumes a fully-resolved [`LdapAuthenticationProperties`]
//! value. Loading it from files or the environment is the caller's job.
//!
//! Settings that name a strategy (connection strategy, SASL mechanism,
//! validator type, ...) are kept as strings and parsed when the engine
//! builds its components, so a typo surfaces as a configuration error at
//! construction time with the offending value in the message.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::types::PolicyViolationKind;
use crate::{Error, Result};

// ============================================================================
// Connection & pool settings
// ============================================================================

/// Connection, SSL, SASL and pool settings for one directory target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LdapProperties {
    /// Name used in logs and attached to authentication results
    #[serde(default)]
    pub name: Option<String>,

    /// Directory URL(s), comma or space separated.
    /// Example: "ldaps://ldap1.example.com, ldaps://ldap2.example.com"
    #[serde(default)]
    pub ldap_url: String,

    /// Bind DN for the service account.
    /// Use "*" together with a "*" credential to request AD fast bind.
    #[serde(default)]
    pub bind_dn: Option<String>,

    /// Bind credential for the service account
    #[serde(default)]
    pub bind_credential: Option<String>,

    /// Use STARTTLS for connection upgrade
    #[serde(default)]
    pub use_start_tls: bool,

    /// Connect timeout in seconds
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,

    /// Response timeout in seconds
    #[serde(default = "default_timeout")]
    pub response_timeout_secs: u64,

    /// ACTIVE_PASSIVE, ROUND_ROBIN, RANDOM or DNS_SRV
    #[serde(default)]
    pub connection_strategy: Option<String>,

    /// PEM file with trusted CA certificates
    #[serde(default)]
    pub trust_certificates: Option<PathBuf>,

    /// PEM trust store used when no trust certificate list is given
    #[serde(default)]
    pub trust_store: Option<PathBuf>,

    /// PEM key store holding the client certificate chain and private key
    #[serde(default)]
    pub keystore: Option<PathBuf>,

    /// DEFAULT or ANY
    #[serde(default = "default_hostname_verifier")]
    pub hostname_verifier: String,

    /// DEFAULT or ANY
    #[serde(default)]
    pub trust_manager: Option<String>,

    /// SASL mechanism: DIGEST_MD5, CRAM_MD5, EXTERNAL or GSSAPI
    #[serde(default)]
    pub sasl_mechanism: Option<String>,

    #[serde(default)]
    pub sasl_realm: Option<String>,

    #[serde(default)]
    pub sasl_authorization_id: Option<String>,

    #[serde(default)]
    pub sasl_mutual_auth: Option<bool>,

    /// AUTH, AUTH_INT or AUTH_CONF
    #[serde(default)]
    pub sasl_quality_of_protection: Option<String>,

    /// LOW, MEDIUM or HIGH
    #[serde(default)]
    pub sasl_security_strength: Option<String>,

    /// Open one connection per operation instead of pooling
    #[serde(default)]
    pub disable_pooling: bool,

    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: usize,

    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,

    #[serde(default = "default_true")]
    pub validate_on_checkout: bool,

    #[serde(default = "default_true")]
    pub validate_periodically: bool,

    /// Period between background validations in seconds
    #[serde(default = "default_validate_period")]
    pub validate_period_secs: u64,

    /// Timeout for a single validation in seconds
    #[serde(default = "default_timeout")]
    pub validate_timeout_secs: u64,

    /// How long a checkout waits for a free connection, in seconds
    #[serde(default = "default_block_wait_time")]
    pub block_wait_time_secs: u64,

    /// Idle time after which a pooled connection may be pruned, in seconds
    #[serde(default = "default_idle_time")]
    pub idle_time_secs: u64,

    /// Period between prune sweeps in seconds
    #[serde(default = "default_prune_period")]
    pub prune_period_secs: u64,

    /// Fail pool initialization when no connection can be established
    #[serde(default = "default_true")]
    pub fail_fast: bool,

    /// NONE or BIND
    #[serde(default = "default_pool_passivator")]
    pub pool_passivator: String,

    #[serde(default)]
    pub validator: LdapValidatorProperties,
}

fn default_timeout() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_hostname_verifier() -> String {
    "DEFAULT".to_string()
}

fn default_min_pool_size() -> usize {
    3
}

fn default_max_pool_size() -> usize {
    10
}

fn default_validate_period() -> u64 {
    300 // 5 minutes
}

fn default_block_wait_time() -> u64 {
    3
}

fn default_idle_time() -> u64 {
    600 // 10 minutes
}

fn default_prune_period() -> u64 {
    300 // 5 minutes
}

fn default_pool_passivator() -> String {
    "NONE".to_string()
}

impl Default for LdapProperties {
    fn default() -> Self {
        Self {
            name: None,
            ldap_url: String::new(),
            bind_dn: None,
            bind_credential: None,
            use_start_tls: false,
            connect_timeout_secs: default_timeout(),
            response_timeout_secs: default_timeout(),
            connection_strategy: None,
            trust_certificates: None,
            trust_store: None,
            keystore: None,
            hostname_verifier: default_hostname_verifier(),
            trust_manager: None,
            sasl_mechanism: None,
            sasl_realm: None,
            sasl_authorization_id: None,
            sasl_mutual_auth: None,
            sasl_quality_of_protection: None,
            sasl_security_strength: None,
            disable_pooling: false,
            min_pool_size: default_min_pool_size(),
            max_pool_size: default_max_pool_size(),
            validate_on_checkout: true,
            validate_periodically: true,
            validate_period_secs: default_validate_period(),
            validate_timeout_secs: default_timeout(),
            block_wait_time_secs: default_block_wait_time(),
            idle_time_secs: default_idle_time(),
            prune_period_secs: default_prune_period(),
            fail_fast: true,
            pool_passivator: default_pool_passivator(),
            validator: LdapValidatorProperties::default(),
        }
    }
}

impl LdapProperties {
    /// Validate settings that can be checked without building anything
    pub fn validate(&self) -> Result<()> {
        if self.ldap_url.trim().is_empty() {
            return Err(Error::configuration("LDAP url cannot be empty/blank"));
        }

        if self.max_pool_size == 0 {
            return Err(Error::configuration("Maximum pool size must be at least 1"));
        }

        if self.min_pool_size > self.max_pool_size {
            return Err(Error::configuration(format!(
                "Minimum pool size {} exceeds maximum pool size {}",
                self.min_pool_size, self.max_pool_size
            )));
        }

        Ok(())
    }

    /// Concrete bind DN and credential, if both are set and not the fast-bind marker
    pub fn bind_credentials(&self) -> Option<(&str, &str)> {
        match (self.bind_dn.as_deref(), self.bind_credential.as_deref()) {
            (Some(dn), Some(credential))
                if !dn.trim().is_empty() && !credential.trim().is_empty() =>
            {
                Some((dn, credential))
            }
            _ => None,
        }
    }

    /// Whether bind DN and credential are both the `*` fast-bind marker
    pub fn is_fast_bind(&self) -> bool {
        self.bind_dn.as_deref() == Some("*") && self.bind_credential.as_deref() == Some("*")
    }

    /// Display name for logs
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.ldap_url)
    }
}

/// Pool connection validator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LdapValidatorProperties {
    /// none, compare or search
    #[serde(default = "default_validator_type", rename = "type")]
    pub validator_type: String,

    /// Search validator base DN (root DSE by default)
    #[serde(default)]
    pub base_dn: String,

    #[serde(default = "default_validator_filter")]
    pub search_filter: String,

    /// OBJECT, ONELEVEL or SUBTREE
    #[serde(default = "default_validator_scope")]
    pub scope: String,

    /// Compare validator DN
    #[serde(default)]
    pub dn: String,

    #[serde(default = "default_validator_attribute_name")]
    pub attribute_name: String,

    #[serde(default = "default_validator_attribute_value")]
    pub attribute_value: String,
}

fn default_validator_type() -> String {
    "search".to_string()
}

fn default_validator_filter() -> String {
    "(objectClass=*)".to_string()
}

fn default_validator_scope() -> String {
    "OBJECT".to_string()
}

fn default_validator_attribute_name() -> String {
    "objectClass".to_string()
}

fn default_validator_attribute_value() -> String {
    "top".to_string()
}

impl Default for LdapValidatorProperties {
    fn default() -> Self {
        Self {
            validator_type: default_validator_type(),
            base_dn: String::new(),
            search_filter: default_validator_filter(),
            scope: default_validator_scope(),
            dn: String::new(),
            attribute_name: default_validator_attribute_name(),
            attribute_value: default_validator_attribute_value(),
        }
    }
}

// ============================================================================
// Authentication settings
// ============================================================================

/// How the authenticator locates and verifies the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticationType {
    /// Active Directory: bind with a formatted DN (e.g. `%s@example.com`)
    Ad,
    /// Search with a service account, then verify
    #[default]
    Authenticated,
    /// Bind with a formatted DN
    Direct,
    /// Anonymous search, then verify
    Anonymous,
}

/// Directory flavor used for password policy and password modification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LdapType {
    #[default]
    #[serde(rename = "GENERIC", alias = "generic")]
    Generic,
    #[serde(rename = "AD", alias = "ad")]
    Ad,
    #[serde(rename = "FreeIPA", alias = "FREEIPA", alias = "freeipa")]
    FreeIpa,
    #[serde(rename = "EDirectory", alias = "EDIRECTORY", alias = "edirectory")]
    EDirectory,
}

/// LDAP authentication settings for one directory target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LdapAuthenticationProperties {
    #[serde(flatten)]
    pub connection: LdapProperties,

    #[serde(default, rename = "type")]
    pub auth_type: AuthenticationType,

    /// Base DN(s) for searches, `|` separated.
    /// Example: "ou=people,dc=example,dc=com | ou=staff,dc=example,dc=com"
    #[serde(default)]
    pub base_dn: Option<String>,

    /// User search filter, e.g. "(uid={user})"
    #[serde(default)]
    pub search_filter: Option<String>,

    /// DN template for direct/AD binds, e.g. "uid=%s,ou=people,dc=example,dc=com"
    #[serde(default)]
    pub dn_format: Option<String>,

    #[serde(default = "default_true")]
    pub subtree_search: bool,

    #[serde(default)]
    pub allow_multiple_dns: bool,

    #[serde(default)]
    pub allow_multiple_entries: bool,

    #[serde(default = "default_true")]
    pub follow_referrals: bool,

    /// NEVER, SEARCHING, FINDING or ALWAYS
    #[serde(default)]
    pub deref_aliases: Option<String>,

    /// Take the DN from this attribute of the found entry instead of its DN
    #[serde(default)]
    pub resolve_from_attribute: Option<String>,

    #[serde(default)]
    pub binary_attributes: Vec<String>,

    #[serde(default)]
    pub search_entry_handlers: Vec<SearchEntryHandlerProperties>,

    /// Verify by comparing this attribute instead of binding
    #[serde(default)]
    pub principal_attribute_password: Option<String>,

    /// Resolve the full entry with a separate search after verification
    #[serde(default = "default_true")]
    pub enhance_with_entry_resolver: bool,

    /// Attribute whose value becomes the principal id
    #[serde(default)]
    pub principal_attribute_id: Option<String>,

    /// Principal attributes, `directoryName` or `directoryName:principalName`
    #[serde(default)]
    pub principal_attribute_list: Vec<String>,

    #[serde(default)]
    pub additional_attributes: Vec<String>,

    #[serde(default = "default_principal_dn_attribute_name")]
    pub principal_dn_attribute_name: String,

    #[serde(default = "default_true")]
    pub collect_dn_attribute: bool,

    #[serde(default)]
    pub allow_multiple_principal_attribute_values: bool,

    #[serde(default = "default_true")]
    pub allow_missing_principal_attribute_value: bool,

    /// Regex a username must match for this handler to accept the credential
    #[serde(default)]
    pub credential_criteria: Option<String>,

    #[serde(default)]
    pub password_encoder: PasswordEncoderProperties,

    #[serde(default)]
    pub principal_transformation: PrincipalTransformationProperties,

    #[serde(default)]
    pub password_policy: LdapPasswordPolicyProperties,

    #[serde(default)]
    pub order: Option<i32>,
}

fn default_principal_dn_attribute_name() -> String {
    "principalLdapDn".to_string()
}

impl Default for LdapAuthenticationProperties {
    fn default() -> Self {
        Self {
            connection: LdapProperties::default(),
            auth_type: AuthenticationType::default(),
            base_dn: None,
            search_filter: None,
            dn_format: None,
            subtree_search: true,
            allow_multiple_dns: false,
            allow_multiple_entries: false,
            follow_referrals: true,
            deref_aliases: None,
            resolve_from_attribute: None,
            binary_attributes: Vec::new(),
            search_entry_handlers: Vec::new(),
            principal_attribute_password: None,
            enhance_with_entry_resolver: true,
            principal_attribute_id: None,
            principal_attribute_list: Vec::new(),
            additional_attributes: Vec::new(),
            principal_dn_attribute_name: default_principal_dn_attribute_name(),
            collect_dn_attribute: true,
            allow_multiple_principal_attribute_values: false,
            allow_missing_principal_attribute_value: true,
            credential_criteria: None,
            password_encoder: PasswordEncoderProperties::default(),
            principal_transformation: PrincipalTransformationProperties::default(),
            password_policy: LdapPasswordPolicyProperties::default(),
            order: None,
        }
    }
}

impl LdapAuthenticationProperties {
    /// Non-blank base DN segments in declared order
    pub fn base_dns(&self) -> Vec<String> {
        self.base_dn
            .as_deref()
            .unwrap_or_default()
            .split(crate::BASE_DN_DELIMITER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

// ============================================================================
// Search entry handlers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchEntryHandlerType {
    ActiveDirectory,
    CaseChange,
    DnAttributeEntry,
    Merge,
    ObjectGuid,
    ObjectSid,
    PrimaryGroup,
    RangeEntry,
    RecursiveEntry,
    MergeEntries,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseChange {
    #[default]
    None,
    Lower,
    Upper,
}

impl CaseChange {
    pub fn apply(&self, value: &str) -> String {
        match self {
            CaseChange::None => value.to_string(),
            CaseChange::Lower => value.to_lowercase(),
            CaseChange::Upper => value.to_uppercase(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SearchEntryHandlerProperties {
    #[serde(rename = "type")]
    pub handler_type: SearchEntryHandlerType,

    #[serde(default)]
    pub case_change: CaseChangeHandlerProperties,

    #[serde(default)]
    pub dn_attribute: DnAttributeHandlerProperties,

    #[serde(default)]
    pub merge_attribute: MergeAttributeHandlerProperties,

    #[serde(default)]
    pub primary_group_id: PrimaryGroupIdHandlerProperties,

    #[serde(default)]
    pub recursive: RecursiveHandlerProperties,
}

impl SearchEntryHandlerProperties {
    pub fn of(handler_type: SearchEntryHandlerType) -> Self {
        Self {
            handler_type,
            case_change: CaseChangeHandlerProperties::default(),
            dn_attribute: DnAttributeHandlerProperties::default(),
            merge_attribute: MergeAttributeHandlerProperties::default(),
            primary_group_id: PrimaryGroupIdHandlerProperties::default(),
            recursive: RecursiveHandlerProperties::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CaseChangeHandlerProperties {
    #[serde(default)]
    pub dn_case_change: CaseChange,
    #[serde(default)]
    pub attribute_name_case_change: CaseChange,
    #[serde(default)]
    pub attribute_value_case_change: CaseChange,
    /// Restrict value changes to these attributes; empty means all
    #[serde(default)]
    pub attribute_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DnAttributeHandlerProperties {
    #[serde(default = "default_dn_attribute_name")]
    pub dn_attribute_name: String,
    #[serde(default)]
    pub add_if_exists: bool,
}

fn default_dn_attribute_name() -> String {
    "entryDN".to_string()
}

impl Default for DnAttributeHandlerProperties {
    fn default() -> Self {
        Self {
            dn_attribute_name: default_dn_attribute_name(),
            add_if_exists: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MergeAttributeHandlerProperties {
    #[serde(default)]
    pub merge_attribute_name: String,
    #[serde(default)]
    pub attribute_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PrimaryGroupIdHandlerProperties {
    #[serde(default)]
    pub base_dn: String,
    #[serde(default = "default_primary_group_filter")]
    pub group_filter: String,
}

fn default_primary_group_filter() -> String {
    "(&(objectClass=group)(objectSid={0}))".to_string()
}

impl Default for PrimaryGroupIdHandlerProperties {
    fn default() -> Self {
        Self {
            base_dn: String::new(),
            group_filter: default_primary_group_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecursiveHandlerProperties {
    #[serde(default = "default_recursive_search_attribute")]
    pub search_attribute: String,
    #[serde(default = "default_recursive_merge_attributes")]
    pub merge_attributes: Vec<String>,
}

fn default_recursive_search_attribute() -> String {
    "memberOf".to_string()
}

fn default_recursive_merge_attributes() -> Vec<String> {
    vec!["memberOf".to_string()]
}

impl Default for RecursiveHandlerProperties {
    fn default() -> Self {
        Self {
            search_attribute: default_recursive_search_attribute(),
            merge_attributes: default_recursive_merge_attributes(),
        }
    }
}

// ============================================================================
// Password policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PasswordPolicyHandlingOption {
    #[default]
    Default,
    RejectResultCode,
    Script,
}

/// Password policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LdapPasswordPolicyProperties {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, rename = "type")]
    pub policy_type: LdapType,

    /// Warn when the password expires within this many days
    #[serde(default = "default_warning_days")]
    pub password_warning_number_of_days: u32,

    /// Maximum failed logins before lockout (FreeIPA)
    #[serde(default = "default_login_failures")]
    pub login_failures: u32,

    #[serde(default)]
    pub warning_attribute_name: Option<String>,

    #[serde(default)]
    pub warning_attribute_value: Option<String>,

    #[serde(default = "default_true")]
    pub display_warning_on_match: bool,

    #[serde(default = "default_true")]
    pub account_state_handling_enabled: bool,

    /// Entry attribute → violation raised when the attribute value is "true"
    #[serde(default)]
    pub policy_attributes: HashMap<String, PolicyViolationKind>,

    #[serde(default)]
    pub strategy: PasswordPolicyHandlingOption,

    /// Result codes excluded from policy handling by REJECT_RESULT_CODE
    #[serde(default = "default_rejected_result_codes")]
    pub rejected_result_codes: Vec<String>,

    /// Location of the policy script used by the SCRIPT strategy
    #[serde(default)]
    pub script_location: Option<String>,

    /// Registered name of a custom response handler run before the flavor defaults
    #[serde(default)]
    pub custom_policy_handler: Option<String>,
}

fn default_warning_days() -> u32 {
    30
}

fn default_login_failures() -> u32 {
    5
}

fn default_rejected_result_codes() -> Vec<String> {
    vec!["INVALID_CREDENTIALS".to_string()]
}

impl Default for LdapPasswordPolicyProperties {
    fn default() -> Self {
        Self {
            enabled: true,
            policy_type: LdapType::default(),
            password_warning_number_of_days: default_warning_days(),
            login_failures: default_login_failures(),
            warning_attribute_name: None,
            warning_attribute_value: None,
            display_warning_on_match: true,
            account_state_handling_enabled: true,
            policy_attributes: HashMap::new(),
            strategy: PasswordPolicyHandlingOption::default(),
            rejected_result_codes: default_rejected_result_codes(),
            script_location: None,
            custom_policy_handler: None,
        }
    }
}

// ============================================================================
// Credential pre-processing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PasswordEncoderType {
    #[default]
    None,
    /// Message digest
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PasswordEncoderProperties {
    #[serde(default, rename = "type")]
    pub encoder_type: PasswordEncoderType,

    /// MD5, SHA-1, SHA-256 or SHA-512
    #[serde(default = "default_encoding_algorithm")]
    pub encoding_algorithm: String,

    #[serde(default)]
    pub output_encoding: DigestEncoding,
}

/// How a password digest is rendered before it is sent to the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DigestEncoding {
    #[default]
    Hex,
    Base64,
}

fn default_encoding_algorithm() -> String {
    "SHA-256".to_string()
}

impl Default for PasswordEncoderProperties {
    fn default() -> Self {
        Self {
            encoder_type: PasswordEncoderType::None,
            encoding_algorithm: default_encoding_algorithm(),
            output_encoding: DigestEncoding::Hex,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseConversion {
    #[default]
    None,
    Uppercase,
    Lowercase,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PrincipalTransformationProperties {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub case_conversion: CaseConversion,
}

// ============================================================================
// Keyword settings
// ============================================================================

fn keyword(value: &str) -> String {
    value.trim().to_uppercase().replace('-', "_")
}

/// Multi-URL failover order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStrategy {
    #[default]
    ActivePassive,
    RoundRobin,
    Random,
    DnsSrv,
}

impl FromStr for ConnectionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match keyword(s).as_str() {
            "ACTIVE_PASSIVE" => Ok(Self::ActivePassive),
            "ROUND_ROBIN" => Ok(Self::RoundRobin),
            "RANDOM" => Ok(Self::Random),
            "DNS_SRV" => Ok(Self::DnsSrv),
            _ => Err(Error::invalid_value("connection strategy", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostnameVerifier {
    #[default]
    Default,
    Any,
}

impl FromStr for HostnameVerifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match keyword(s).as_str() {
            "DEFAULT" => Ok(Self::Default),
            "ANY" => Ok(Self::Any),
            _ => Err(Error::invalid_value("hostname verifier", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustManager {
    #[default]
    Default,
    Any,
}

impl FromStr for TrustManager {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match keyword(s).as_str() {
            "DEFAULT" => Ok(Self::Default),
            "ANY" => Ok(Self::Any),
            _ => Err(Error::invalid_value("trust manager", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    DigestMd5,
    CramMd5,
    External,
    Gssapi,
}

impl SaslMechanism {
    /// Whether the mechanism carries a realm
    pub fn supports_realm(&self) -> bool {
        matches!(self, SaslMechanism::DigestMd5 | SaslMechanism::Gssapi)
    }
}

impl FromStr for SaslMechanism {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match keyword(s).as_str() {
            "DIGEST_MD5" => Ok(Self::DigestMd5),
            "CRAM_MD5" => Ok(Self::CramMd5),
            "EXTERNAL" => Ok(Self::External),
            "GSSAPI" => Ok(Self::Gssapi),
            _ => Err(Error::invalid_value("SASL mechanism", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityOfProtection {
    Auth,
    AuthInt,
    AuthConf,
}

impl FromStr for QualityOfProtection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match keyword(s).as_str() {
            "AUTH" => Ok(Self::Auth),
            "AUTH_INT" => Ok(Self::AuthInt),
            "AUTH_CONF" => Ok(Self::AuthConf),
            _ => Err(Error::invalid_value("SASL quality of protection", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityStrength {
    Low,
    Medium,
    High,
}

impl FromStr for SecurityStrength {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match keyword(s).as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            _ => Err(Error::invalid_value("SASL security strength", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolPassivator {
    #[default]
    None,
    Bind,
}

impl FromStr for PoolPassivator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match keyword(s).as_str() {
            "" | "NONE" => Ok(Self::None),
            "BIND" => Ok(Self::Bind),
            _ => Err(Error::invalid_value("pool passivator", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    Object,
    OneLevel,
    #[default]
    Subtree,
}

impl FromStr for SearchScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match keyword(s).as_str() {
            "OBJECT" | "BASE" => Ok(Self::Object),
            "ONELEVEL" | "ONE_LEVEL" => Ok(Self::OneLevel),
            "SUBTREE" => Ok(Self::Subtree),
            _ => Err(Error::invalid_value("search scope", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DerefAliases {
    #[default]
    Never,
    Searching,
    Finding,
    Always,
}

impl FromStr for DerefAliases {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match keyword(s).as_str() {
            "NEVER" => Ok(Self::Never),
            "SEARCHING" => Ok(Self::Searching),
            "FINDING" => Ok(Self::Finding),
            "ALWAYS" => Ok(Self::Always),
            _ => Err(Error::invalid_value("alias dereferencing", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let props = LdapAuthenticationProperties::default();
        assert_eq!(props.connection.min_pool_size, 3);
        assert_eq!(props.connection.max_pool_size, 10);
        assert_eq!(props.connection.validator.validator_type, "search");
        assert_eq!(props.auth_type, AuthenticationType::Authenticated);
        assert_eq!(props.password_policy.password_warning_number_of_days, 30);
        assert!(props.enhance_with_entry_resolver);
    }

    #[test]
    fn test_blank_url_is_rejected() {
        let props = LdapProperties {
            ldap_url: "   ".to_string(),
            ..Default::default()
        };
        assert!(matches!(props.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_base_dn_segments() {
        let props = LdapAuthenticationProperties {
            base_dn: Some("ou=a,dc=x | ou=b,dc=x||".to_string()),
            ..Default::default()
        };
        assert_eq!(props.base_dns(), vec!["ou=a,dc=x", "ou=b,dc=x"]);
    }

    #[test]
    fn test_fast_bind_marker() {
        let props = LdapProperties {
            bind_dn: Some("*".to_string()),
            bind_credential: Some("*".to_string()),
            ..Default::default()
        };
        assert!(props.is_fast_bind());
        assert!(props.bind_credentials().is_some());
    }

    #[test]
    fn test_keyword_parsing() {
        assert_eq!(
            "dns-srv".parse::<ConnectionStrategy>().unwrap(),
            ConnectionStrategy::DnsSrv
        );
        assert_eq!("DIGEST-MD5".parse::<SaslMechanism>().unwrap(), SaslMechanism::DigestMd5);
        assert!("KERBEROS".parse::<SaslMechanism>().is_err());
        assert_eq!("object".parse::<SearchScope>().unwrap(), SearchScope::Object);
    }

    #[test]
    fn test_deserialize_flattened_properties() {
        let props: LdapAuthenticationProperties = serde_json::from_str(
            r#"{
                "ldap_url": "ldap://localhost:389",
                "type": "DIRECT",
                "dn_format": "uid=%s,ou=people,dc=example,dc=com",
                "password_policy": { "type": "FreeIPA", "login_failures": 3 }
            }"#,
        )
        .unwrap();

        assert_eq!(props.connection.ldap_url, "ldap://localhost:389");
        assert_eq!(props.auth_type, AuthenticationType::Direct);
        assert_eq!(props.password_policy.policy_type, LdapType::FreeIpa);
        assert_eq!(props.password_policy.login_failures, 3);
    }
}
