//! Authenticator strategies
//!
//! An [`Authenticator`] resolves the DN for a user name, verifies the
//! credential against it (simple bind or attribute compare), reads the user
//! entry and runs the password policy response handlers over the outcome.
//!
//! | type            | DN resolution                   | search identity   |
//! |-----------------|---------------------------------|-------------------|
//! | `AD`, `DIRECT`  | DN template                     | none              |
//! | `AUTHENTICATED` | search chain over the base DNs  | service bind      |
//! | `ANONYMOUS`     | search chain over the base DNs  | anonymous         |

use dirgate_core::config::AuthenticationType;
use dirgate_core::types::{LdapEntry, ResultCode};
use dirgate_core::LdapAuthenticationProperties;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::client::{BindRequest, CompareRequest, Connector, OperationResult, SearchRequest};
use crate::error::{AuthenticationFailure, DirectoryError, DirectoryResult};
use crate::factory::{new_connection_factory, ConnectionFactory};
use crate::policy::{AccountState, RequestHandler, ResponseHandler};
use crate::resolver::{
    new_search_dn_resolver, new_search_entry_resolver, ChainingDnResolver, ChainingEntryResolver,
    EntryCriteria, EntryResolver, FormatDnResolver,
};
use crate::script::ScriptCache;

/// Credential presented for verification
#[derive(Clone)]
pub struct AuthenticationRequest {
    pub user: String,
    pub credential: String,
    /// Attributes to read from the user entry; empty means all user attributes
    pub return_attributes: Vec<String>,
}

impl AuthenticationRequest {
    pub fn new(user: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            credential: credential.into(),
            return_attributes: Vec::new(),
        }
    }

    pub fn with_return_attributes(mut self, return_attributes: Vec<String>) -> Self {
        self.return_attributes = return_attributes;
        self
    }
}

impl std::fmt::Debug for AuthenticationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationRequest")
            .field("user", &self.user)
            .field("return_attributes", &self.return_attributes)
            .finish_non_exhaustive()
    }
}

/// Outcome of verifying a credential
#[derive(Debug, Clone)]
pub struct AuthenticationResponse {
    pub user: String,
    /// DN the credential was verified against
    pub dn: Option<String>,
    /// Result of the verifying bind or compare
    pub result: OperationResult,
    pub entry: Option<LdapEntry>,
    /// Account state recorded by the response handlers
    pub account_state: Option<AccountState>,
}

impl Default for AuthenticationResponse {
    fn default() -> Self {
        Self {
            user: String::new(),
            dn: None,
            result: OperationResult::new(ResultCode::Other, ""),
            entry: None,
            account_state: None,
        }
    }
}

impl AuthenticationResponse {
    pub fn is_authenticated(&self) -> bool {
        self.result.is_success()
    }

    pub fn result_code(&self) -> ResultCode {
        self.result.code
    }
}

/// How the DN of a user is found
pub enum DnStrategy {
    Format(FormatDnResolver),
    Search(ChainingDnResolver),
}

impl DnStrategy {
    async fn resolve(&self, user: &str) -> DirectoryResult<String> {
        match self {
            DnStrategy::Format(resolver) => Ok(resolver.format_dn(user)),
            DnStrategy::Search(chain) => chain.resolve_dn(user).await,
        }
    }
}

/// How a credential is verified once the DN is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyMode {
    Bind,
    /// Compare the credential with an attribute of the entry
    Compare { attribute: String },
}

pub struct Authenticator {
    auth_type: AuthenticationType,
    dn_strategy: DnStrategy,
    verify: VerifyMode,
    /// Factory for verifying connections
    factory: Arc<dyn ConnectionFactory>,
    entry_resolver: Option<ChainingEntryResolver>,
    binary_attributes: Vec<String>,
    request_handlers: Vec<RequestHandler>,
    response_handlers: Vec<ResponseHandler>,
    /// Every factory this authenticator owns, closed together
    factories: Vec<Arc<dyn ConnectionFactory>>,
}

impl Authenticator {
    pub fn new(
        auth_type: AuthenticationType,
        dn_strategy: DnStrategy,
        verify: VerifyMode,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            auth_type,
            dn_strategy,
            verify,
            factories: vec![factory.clone()],
            factory,
            entry_resolver: None,
            binary_attributes: Vec::new(),
            request_handlers: Vec::new(),
            response_handlers: Vec::new(),
        }
    }

    pub fn auth_type(&self) -> AuthenticationType {
        self.auth_type
    }

    pub fn verify_mode(&self) -> &VerifyMode {
        &self.verify
    }

    pub fn factory(&self) -> &Arc<dyn ConnectionFactory> {
        &self.factory
    }

    pub fn has_entry_resolver(&self) -> bool {
        self.entry_resolver.is_some()
    }

    pub fn set_entry_resolver(&mut self, resolver: ChainingEntryResolver, factory: Arc<dyn ConnectionFactory>) {
        self.entry_resolver = Some(resolver);
        self.own(factory);
    }

    pub fn set_binary_attributes(&mut self, binary_attributes: Vec<String>) {
        self.binary_attributes = binary_attributes;
    }

    pub fn set_request_handlers(&mut self, handlers: Vec<RequestHandler>) {
        self.request_handlers = handlers;
    }

    pub fn set_response_handlers(&mut self, handlers: Vec<ResponseHandler>) {
        self.response_handlers = handlers;
    }

    /// Take ownership of an extra factory so [`Authenticator::close`] releases it
    pub(crate) fn own(&mut self, factory: Arc<dyn ConnectionFactory>) {
        if !self.factories.iter().any(|f| Arc::ptr_eq(f, &factory)) {
            self.factories.push(factory);
        }
    }

    /// Resolve, verify, read the entry and run the response handlers.
    ///
    /// A rejected credential is a successful call whose response is not
    /// authenticated; `Err` means the account could not be resolved or the
    /// directory failed.
    pub async fn authenticate(
        &self,
        request: &AuthenticationRequest,
    ) -> Result<AuthenticationResponse, AuthenticationFailure> {
        let dn = match self.dn_strategy.resolve(&request.user).await {
            Ok(dn) => dn,
            Err(DirectoryError::AccountNotFound(user)) => {
                info!("No DN found for {}", user);
                return Err(AuthenticationFailure::AccountNotFound(user));
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Authenticating {} as {}", request.user, dn);

        let mut connection = self.factory.get_connection().await?;
        let result = match &self.verify {
            VerifyMode::Bind => {
                let mut bind = BindRequest::new(dn.clone(), request.credential.clone());
                for handler in &self.request_handlers {
                    handler.handle(&mut bind);
                }
                let result = connection.bind(&bind).await;
                let result = connection.check(result)?;
                // the connection is now bound as the user
                connection.invalidate();
                result
            }
            VerifyMode::Compare { attribute } => {
                let compare = CompareRequest::new(dn.clone(), attribute.clone(), request.credential.as_bytes());
                let result = connection.compare(&compare).await;
                let result = connection.check(result)?;
                match result.code {
                    ResultCode::CompareTrue => OperationResult {
                        code: ResultCode::Success,
                        ..result
                    },
                    ResultCode::CompareFalse => OperationResult {
                        code: ResultCode::InvalidCredentials,
                        ..result
                    },
                    _ => result,
                }
            }
        };
        debug!("Verification of {} returned {}", dn, result.code);

        let mut response = AuthenticationResponse {
            user: request.user.clone(),
            dn: Some(dn.clone()),
            result,
            entry: None,
            account_state: None,
        };

        if response.is_authenticated() {
            let criteria = EntryCriteria {
                user: request.user.clone(),
                dn: dn.clone(),
                return_attributes: request.return_attributes.clone(),
            };
            let entry = match &self.entry_resolver {
                Some(resolver) => {
                    drop(connection);
                    resolver.resolve(&criteria).await?
                }
                None => {
                    let read = SearchRequest::read(dn.clone(), criteria.return_attributes.clone())
                        .with_binary_attributes(self.binary_attributes.clone());
                    let result = connection.search(&read).await;
                    let found = connection.check(result)?;
                    found.entries.into_iter().next()
                }
            };
            if entry.is_none() {
                warn!("Unable to read the entry of {}", dn);
            }
            response.entry = Some(entry.unwrap_or_else(|| LdapEntry::new(dn.clone())));
        }

        for handler in &self.response_handlers {
            trace!("Running response handler {:?} for {}", handler, request.user);
            handler.handle(&mut response);
        }
        Ok(response)
    }

    /// Release every connection factory
    pub async fn close(&self) {
        for factory in &self.factories {
            factory.close().await;
        }
    }
}

/// Build the authenticator for a directory target
pub async fn new_authenticator(
    props: &LdapAuthenticationProperties,
    connector: Arc<dyn Connector>,
    script_cache: Option<Arc<dyn ScriptCache>>,
) -> DirectoryResult<Authenticator> {
    let verify = match props.principal_attribute_password.as_deref().map(str::trim) {
        Some(attribute) if !attribute.is_empty() => VerifyMode::Compare {
            attribute: attribute.to_string(),
        },
        _ => VerifyMode::Bind,
    };

    let mut authenticator = match props.auth_type {
        AuthenticationType::Ad | AuthenticationType::Direct => {
            let format = props.dn_format.clone().unwrap_or_default();
            let resolver = FormatDnResolver::new(format).map_err(|_| {
                DirectoryError::configuration(format!(
                    "Dn format cannot be empty/blank for {:?} authentication",
                    props.auth_type
                ))
            })?;
            let factory = new_connection_factory(&props.connection, connector.clone()).await?;
            debug!("Created {:?} authenticator for [{}]", props.auth_type, props.connection.ldap_url);
            Authenticator::new(props.auth_type, DnStrategy::Format(resolver), verify, factory)
        }
        AuthenticationType::Authenticated | AuthenticationType::Anonymous => {
            if props.base_dns().is_empty() {
                return Err(DirectoryError::configuration("Base DN cannot be empty/blank for search authentication"));
            }
            if props.search_filter.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                return Err(DirectoryError::configuration("User filter cannot be empty/blank for search authentication"));
            }

            let mut search_props = props.connection.clone();
            if props.auth_type == AuthenticationType::Anonymous {
                search_props.bind_dn = None;
                search_props.bind_credential = None;
            } else if search_props.bind_credentials().is_none() {
                warn!(
                    "Search authentication for [{}] has no bind credentials; searches will be anonymous",
                    props.connection.display_name()
                );
            }

            let search_factory = new_connection_factory(&search_props, connector.clone()).await?;
            let chain = new_search_dn_resolver(props, search_factory.clone(), script_cache.clone())?;
            let factory = new_connection_factory(&props.connection, connector.clone()).await?;
            debug!(
                "Created {:?} authenticator for [{}] over {} base DN(s)",
                props.auth_type,
                props.connection.ldap_url,
                chain.len()
            );
            let mut authenticator = Authenticator::new(props.auth_type, DnStrategy::Search(chain), verify, factory);
            authenticator.own(search_factory);
            authenticator
        }
    };

    if props.enhance_with_entry_resolver {
        let searchable = !props.base_dns().is_empty()
            && !props.search_filter.as_deref().map(str::trim).unwrap_or_default().is_empty();
        if searchable {
            let entry_factory = new_connection_factory(&props.connection, connector).await?;
            let resolver = new_search_entry_resolver(props, entry_factory.clone(), script_cache)?;
            authenticator.set_entry_resolver(resolver, entry_factory);
        } else {
            debug!("No base DN and filter to resolve entries with; reading the entry from the user DN");
        }
    }
    authenticator.set_binary_attributes(props.binary_attributes.clone());
    Ok(authenticator)
}
