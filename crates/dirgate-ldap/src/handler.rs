//! LDAP authentication handler
//!
//! Wires an [`Authenticator`] to the password policy engine and turns an
//! authenticated entry into a [`Principal`].

use dirgate_core::LdapAuthenticationProperties;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::authenticator::{new_authenticator, AuthenticationRequest, AuthenticationResponse, Authenticator};
use crate::client::{Connector, Ldap3Connector};
use crate::error::{AuthenticationFailure, DirectoryError, DirectoryResult};
use crate::policy::{
    MessageDescriptor, PasswordPolicyConfiguration, PasswordPolicyContext, PasswordPolicyStrategy,
    ResponseHandlerRegistry,
};
use crate::principal::{
    DefaultPrincipalFactory, PasswordEncoder, Principal, PrincipalFactory, PrincipalNameTransformer,
};
use crate::script::ScriptCache;

const DEFAULT_HANDLER_NAME: &str = "LdapAuthenticationHandler";

/// Return-all marker for user attributes
const ALL_USER_ATTRIBUTES: &str = "*";

/// User name and password presented by a client
#[derive(Clone)]
pub struct UsernamePasswordCredential {
    pub username: String,
    pub password: String,
}

impl UsernamePasswordCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for UsernamePasswordCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsernamePasswordCredential")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Successful authentication: the principal plus any policy warnings
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticationHandlerExecutionResult {
    pub handler_name: String,
    pub principal: Principal,
    #[serde(skip)]
    pub warnings: Vec<MessageDescriptor>,
}

impl AuthenticationHandlerExecutionResult {
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(MessageDescriptor::render).collect()
    }
}

/// Directory attribute name → principal attribute names
pub type AttributeMap = BTreeMap<String, Vec<String>>;

/// Parse `name` or `name:alias` definitions into an attribute map
pub fn parse_attribute_map<'a>(definitions: impl IntoIterator<Item = &'a String>) -> AttributeMap {
    let mut map = AttributeMap::new();
    for definition in definitions {
        let definition = definition.trim();
        if definition.is_empty() {
            continue;
        }
        let (name, alias) = match definition.split_once(':') {
            Some((name, alias)) if !alias.trim().is_empty() => (name.trim(), alias.trim()),
            Some((name, _)) => (name.trim(), name.trim()),
            None => (definition, definition),
        };
        let aliases = map.entry(name.to_string()).or_default();
        if !aliases.iter().any(|a| a == alias) {
            aliases.push(alias.to_string());
        }
    }
    map
}

/// Collaborators supplied by the host
#[derive(Clone, Default)]
pub struct HandlerCollaborators {
    /// Wire client; `ldap3` when absent
    pub connector: Option<Arc<dyn Connector>>,
    pub script_cache: Option<Arc<dyn ScriptCache>>,
    pub principal_factory: Option<Arc<dyn PrincipalFactory>>,
    pub response_handlers: Option<Arc<ResponseHandlerRegistry>>,
}

pub struct LdapAuthenticationHandler {
    name: String,
    order: Option<i32>,
    authenticator: Authenticator,
    policy: Option<PasswordPolicyContext>,
    strategy: PasswordPolicyStrategy,
    principal_factory: Arc<dyn PrincipalFactory>,
    transformer: PrincipalNameTransformer,
    encoder: PasswordEncoder,
    credential_criteria: Option<Regex>,
    attribute_map: AttributeMap,
    return_attributes: Vec<String>,
    principal_id_attribute: Option<String>,
    principal_dn_attribute_name: String,
    collect_dn_attribute: bool,
    allow_multiple_principal_attribute_values: bool,
    allow_missing_principal_attribute_value: bool,
}

impl LdapAuthenticationHandler {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> Option<i32> {
        self.order
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn attribute_map(&self) -> &AttributeMap {
        &self.attribute_map
    }

    pub fn return_attributes(&self) -> &[String] {
        &self.return_attributes
    }

    pub fn password_policy(&self) -> Option<&PasswordPolicyContext> {
        self.policy.as_ref()
    }

    pub fn set_collect_dn_attribute(&mut self, collect: bool) {
        self.collect_dn_attribute = collect;
    }

    pub fn set_principal_dn_attribute_name(&mut self, name: impl Into<String>) {
        self.principal_dn_attribute_name = name.into();
    }

    pub fn set_allow_multiple_principal_attribute_values(&mut self, allow: bool) {
        self.allow_multiple_principal_attribute_values = allow;
    }

    pub fn set_allow_missing_principal_attribute_value(&mut self, allow: bool) {
        self.allow_missing_principal_attribute_value = allow;
    }

    /// Whether this handler accepts the credential
    pub fn supports(&self, credential: &UsernamePasswordCredential) -> bool {
        match &self.credential_criteria {
            Some(criteria) => criteria.is_match(&credential.username),
            None => true,
        }
    }

    pub async fn authenticate(
        &self,
        credential: &UsernamePasswordCredential,
    ) -> Result<AuthenticationHandlerExecutionResult, AuthenticationFailure> {
        if credential.username.trim().is_empty() {
            return Err(AuthenticationFailure::AccountNotFound("Username is blank".to_string()));
        }
        if credential.password.is_empty() {
            return Err(AuthenticationFailure::InvalidCredentials(credential.username.clone()));
        }

        let username = self.transformer.transform(&credential.username);
        debug!("Attempting LDAP authentication for {}", username);

        let request = AuthenticationRequest::new(username.clone(), self.encoder.encode(&credential.password))
            .with_return_attributes(self.return_attributes.clone());
        let response = self.authenticator.authenticate(&request).await?;
        debug!("LDAP response for {}: {}", username, response.result.code);

        let warnings = self.strategy.apply(&response, self.policy.as_ref())?;

        if !response.is_authenticated() {
            info!("LDAP authentication failed for {}", username);
            return Err(AuthenticationFailure::InvalidCredentials(username));
        }

        let principal = self.create_principal(&username, &response)?;
        info!("Authenticated {} as {}", username, principal.id);
        Ok(AuthenticationHandlerExecutionResult {
            handler_name: self.name.clone(),
            principal,
            warnings,
        })
    }

    fn principal_id(&self, username: &str, response: &AuthenticationResponse) -> Result<String, AuthenticationFailure> {
        let Some(attribute) = self.principal_id_attribute.as_deref() else {
            return Ok(username.to_string());
        };
        let values = response
            .entry
            .as_ref()
            .and_then(|e| e.attribute(attribute))
            .map(|a| a.string_values())
            .unwrap_or_default();

        match values.len() {
            0 if self.allow_missing_principal_attribute_value => {
                warn!(
                    "Principal id attribute {} is missing for {}; using the user name",
                    attribute, username
                );
                Ok(username.to_string())
            }
            0 => Err(AuthenticationFailure::Principal(format!(
                "Principal id attribute {} is missing for {}",
                attribute, username
            ))),
            1 => Ok(values[0].clone()),
            n if self.allow_multiple_principal_attribute_values => {
                debug!("Principal id attribute {} has {} values; using the first", attribute, n);
                Ok(values[0].clone())
            }
            n => Err(AuthenticationFailure::Principal(format!(
                "Principal id attribute {} has {} values for {}",
                attribute, n, username
            ))),
        }
    }

    fn create_principal(
        &self,
        username: &str,
        response: &AuthenticationResponse,
    ) -> Result<Principal, AuthenticationFailure> {
        let id = self.principal_id(username, response)?;

        let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(entry) = response.entry.as_ref() {
            for (name, aliases) in &self.attribute_map {
                let Some(attribute) = entry.attribute(name) else {
                    continue;
                };
                let values = attribute.display_values();
                for alias in aliases {
                    attributes.entry(alias.clone()).or_default().extend(values.iter().cloned());
                }
            }
            if self.collect_dn_attribute {
                attributes.insert(self.principal_dn_attribute_name.clone(), vec![entry.dn.clone()]);
            }
        }
        debug!("Creating principal {} with attributes {:?}", id, attributes.keys());
        Ok(self.principal_factory.create_principal(&id, attributes))
    }

    /// Shut down every connection factory
    pub async fn close(&self) {
        self.authenticator.close().await;
        debug!("Closed {}", self.name);
    }
}

/// Build the handler for one directory target
pub async fn create_ldap_authentication_handler(
    props: &LdapAuthenticationProperties,
    collaborators: HandlerCollaborators,
) -> DirectoryResult<LdapAuthenticationHandler> {
    props.connection.validate()?;

    let connector = collaborators
        .connector
        .unwrap_or_else(|| Arc::new(Ldap3Connector::new()));
    let script_cache = collaborators.script_cache;

    let mut attribute_map = parse_attribute_map(props.principal_attribute_list.iter().chain(&props.additional_attributes));

    let mut authenticator = new_authenticator(props, connector, script_cache.clone()).await?;

    let policy = if props.password_policy.enabled {
        let config = PasswordPolicyConfiguration::from_properties(
            &props.password_policy,
            collaborators.response_handlers.as_deref(),
        );
        for attribute in &config.handlers.attributes {
            attribute_map
                .entry(attribute.to_string())
                .or_insert_with(|| vec![attribute.to_string()]);
        }
        authenticator.set_request_handlers(config.handlers.request_handlers);
        authenticator.set_response_handlers(config.handlers.response_handlers);
        Some(config.context)
    } else {
        debug!("Password policy is disabled for [{}]", props.connection.display_name());
        None
    };
    let strategy = PasswordPolicyStrategy::from_properties(&props.password_policy, script_cache.as_deref())?;

    let principal_id_attribute = props
        .principal_attribute_id
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    let mut return_attributes: Vec<String> = attribute_map.keys().cloned().collect();
    if let Some(id) = &principal_id_attribute {
        return_attributes.push(id.clone());
    }
    if props.password_policy.enabled {
        return_attributes.extend(props.password_policy.policy_attributes.keys().cloned());
        if let Some(name) = props.password_policy.warning_attribute_name.as_deref().map(str::trim) {
            if !name.is_empty() {
                return_attributes.push(name.to_string());
            }
        }
    }
    let mut seen = std::collections::HashSet::new();
    return_attributes.retain(|a| seen.insert(a.to_lowercase()));
    if return_attributes.is_empty() {
        return_attributes.push(ALL_USER_ATTRIBUTES.to_string());
    }

    let credential_criteria = match props.credential_criteria.as_deref().map(str::trim) {
        Some(pattern) if !pattern.is_empty() => Some(Regex::new(pattern).map_err(|e| {
            DirectoryError::configuration(format!("Invalid credential criteria {}: {}", pattern, e))
        })?),
        _ => None,
    };

    let name = props
        .connection
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HANDLER_NAME.to_string());
    info!(
        "Created LDAP authentication handler {} for [{}] returning attributes {:?}",
        name, props.connection.ldap_url, return_attributes
    );

    Ok(LdapAuthenticationHandler {
        name,
        order: props.order,
        authenticator,
        policy,
        strategy,
        principal_factory: collaborators
            .principal_factory
            .unwrap_or_else(|| Arc::new(DefaultPrincipalFactory)),
        transformer: PrincipalNameTransformer::from_properties(&props.principal_transformation),
        encoder: PasswordEncoder::from_properties(&props.password_encoder)?,
        credential_criteria,
        attribute_map,
        return_attributes,
        principal_id_attribute,
        principal_dn_attribute_name: props.principal_dn_attribute_name.clone(),
        collect_dn_attribute: props.collect_dn_attribute,
        allow_multiple_principal_attribute_values: props.allow_multiple_principal_attribute_values,
        allow_missing_principal_attribute_value: props.allow_missing_principal_attribute_value,
    })
}
