//! Password policy interpretation
//!
//! Response handlers read the bind result and the user entry and record an
//! [`AccountState`] on the authentication response. The account state
//! handler then turns that state into warnings or a [`PolicyViolation`].
//!
//! [`PolicyViolation`]: crate::error::AuthenticationFailure::PolicyViolation

mod account_state;
mod ad;
mod edirectory;
mod freeipa;
mod ppolicy;
mod strategy;

pub use account_state::AccountStateHandler;
pub use ad::{filetime_to_datetime, parse_ad_error, ActiveDirectoryResponseHandler};
pub use edirectory::{parse_edirectory_error, EDirectoryResponseHandler};
pub use freeipa::FreeIpaResponseHandler;
pub use ppolicy::{
    decode_password_policy_control, PasswordPolicyControl, PASSWORD_EXPIRED_OID, PASSWORD_EXPIRING_OID,
    PASSWORD_POLICY_OID,
};
pub use strategy::PasswordPolicyStrategy;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use dirgate_core::config::LdapType;
use dirgate_core::types::PolicyViolationKind;
use dirgate_core::LdapPasswordPolicyProperties;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::authenticator::AuthenticationResponse;
use crate::client::{BindRequest, RequestControl};
use crate::error::DirectoryResult;

/// Non-fatal account condition reported by the directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountWarning {
    /// When the password expires
    pub expiration: Option<DateTime<Utc>>,
    /// Logins left before the account is locked or must change its password
    pub logins_remaining: Option<i64>,
}

/// Fatal account condition reported by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountError {
    /// `None` when the directory code has no policy meaning of its own
    pub kind: Option<PolicyViolationKind>,
    /// Directory specific code (AD `data` code, eDirectory error, ppolicy error)
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountState {
    pub warning: Option<AccountWarning>,
    pub error: Option<AccountError>,
}

impl AccountState {
    pub fn warning(expiration: Option<DateTime<Utc>>, logins_remaining: Option<i64>) -> Self {
        Self {
            warning: Some(AccountWarning {
                expiration,
                logins_remaining,
            }),
            error: None,
        }
    }

    pub fn error(kind: Option<PolicyViolationKind>, code: i64, message: impl Into<String>) -> Self {
        Self {
            warning: None,
            error: Some(AccountError {
                kind,
                code,
                message: message.into(),
            }),
        }
    }
}

/// A warning message carried back with a successful authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub code: String,
    pub default_message: String,
    pub params: Vec<String>,
}

impl MessageDescriptor {
    pub fn new(code: impl Into<String>, default_message: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            code: code.into(),
            default_message: default_message.into(),
            params,
        }
    }

    pub fn password_expiring(days: i64) -> Self {
        Self::new(
            "password.expiration.warning",
            "Password expires in {0} days.",
            vec![days.to_string()],
        )
    }

    pub fn logins_remaining(logins: i64) -> Self {
        Self::new(
            "password.expiration.loginsRemaining",
            "You have {0} logins remaining before you MUST change your password.",
            vec![logins.to_string()],
        )
    }

    pub fn account_state_warning(attribute: &str) -> Self {
        Self::new(
            "account.state.warning",
            "Account state attribute {0} requires your attention.",
            vec![attribute.to_string()],
        )
    }

    /// Default message with its `{N}` parameters filled in
    pub fn render(&self) -> String {
        self.params
            .iter()
            .enumerate()
            .fold(self.default_message.clone(), |message, (i, param)| {
                message.replace(&format!("{{{}}}", i), param)
            })
    }
}

impl fmt::Display for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

// ============================================================================
// Request and response handlers
// ============================================================================

/// Decorates the bind request before verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestHandler {
    /// Ask for the password policy response control
    PasswordPolicyControl,
}

impl RequestHandler {
    pub fn handle(&self, request: &mut BindRequest) {
        match self {
            RequestHandler::PasswordPolicyControl => request.controls.push(RequestControl {
                oid: PASSWORD_POLICY_OID.to_string(),
                critical: false,
                value: None,
            }),
        }
    }
}

/// Host supplied response handler
pub trait AuthenticationResponseHandler: Send + Sync {
    fn handle(&self, response: &mut AuthenticationResponse);
}

/// Reads directory specific policy state into the authentication response
#[derive(Clone)]
pub enum ResponseHandler {
    ActiveDirectory(ActiveDirectoryResponseHandler),
    FreeIpa(FreeIpaResponseHandler),
    EDirectory(EDirectoryResponseHandler),
    /// Draft behera password policy response control
    PasswordPolicyControl,
    /// Netscape password expired / expiring controls
    PasswordExpirationControl,
    Custom(Arc<dyn AuthenticationResponseHandler>),
}

impl fmt::Debug for ResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseHandler::ActiveDirectory(h) => f.debug_tuple("ActiveDirectory").field(h).finish(),
            ResponseHandler::FreeIpa(h) => f.debug_tuple("FreeIpa").field(h).finish(),
            ResponseHandler::EDirectory(h) => f.debug_tuple("EDirectory").field(h).finish(),
            ResponseHandler::PasswordPolicyControl => f.write_str("PasswordPolicyControl"),
            ResponseHandler::PasswordExpirationControl => f.write_str("PasswordExpirationControl"),
            ResponseHandler::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl ResponseHandler {
    pub fn handle(&self, response: &mut AuthenticationResponse) {
        match self {
            ResponseHandler::ActiveDirectory(h) => h.handle(response),
            ResponseHandler::FreeIpa(h) => h.handle(response),
            ResponseHandler::EDirectory(h) => h.handle(response),
            ResponseHandler::PasswordPolicyControl => ppolicy::handle_password_policy(response),
            ResponseHandler::PasswordExpirationControl => ppolicy::handle_password_expiration(response),
            ResponseHandler::Custom(h) => h.handle(response),
        }
    }
}

type HandlerFactory = dyn Fn() -> DirectoryResult<Arc<dyn AuthenticationResponseHandler>> + Send + Sync;

/// Named factories for custom response handlers
#[derive(Default)]
pub struct ResponseHandlerRegistry {
    factories: RwLock<HashMap<String, Arc<HandlerFactory>>>,
}

impl ResponseHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> DirectoryResult<Arc<dyn AuthenticationResponseHandler>> + Send + Sync + 'static,
    {
        self.factories.write().insert(name.into(), Arc::new(factory));
    }

    /// Build the named handler; unknown names and factory failures are logged
    pub fn create(&self, name: &str) -> Option<Arc<dyn AuthenticationResponseHandler>> {
        let factory = self.factories.read().get(name).cloned();
        match factory {
            Some(factory) => match factory() {
                Ok(handler) => Some(handler),
                Err(e) => {
                    warn!("Unable to construct password policy handler {}: {}", name, e);
                    None
                }
            },
            None => {
                warn!("No password policy handler registered as {}", name);
                None
            }
        }
    }
}

// ============================================================================
// Policy context
// ============================================================================

/// Settings the account state handler and policy scripts work from
#[derive(Debug, Clone)]
pub struct PasswordPolicyContext {
    pub flavor: LdapType,
    pub warning_days: u32,
    pub login_failures: u32,
    pub account_state_handler: AccountStateHandler,
}

impl Default for PasswordPolicyContext {
    fn default() -> Self {
        Self::from_properties(&LdapPasswordPolicyProperties::default())
    }
}

impl PasswordPolicyContext {
    pub fn from_properties(props: &LdapPasswordPolicyProperties) -> Self {
        Self {
            flavor: props.policy_type,
            warning_days: props.password_warning_number_of_days,
            login_failures: props.login_failures,
            account_state_handler: AccountStateHandler::from_properties(props),
        }
    }

    pub fn warning_period(&self) -> Duration {
        Duration::days(i64::from(self.warning_days))
    }
}

/// Handlers and extra entry attributes implied by a directory flavor
#[derive(Debug, Clone, Default)]
pub struct FlavorHandlers {
    pub request_handlers: Vec<RequestHandler>,
    pub response_handlers: Vec<ResponseHandler>,
    pub attributes: Vec<&'static str>,
}

/// Map a directory flavor to its policy handlers
pub fn flavor_handlers(flavor: LdapType, ctx: &PasswordPolicyContext) -> FlavorHandlers {
    let warning_period = ctx.warning_period();
    match flavor {
        LdapType::Ad => FlavorHandlers {
            request_handlers: Vec::new(),
            response_handlers: vec![ResponseHandler::ActiveDirectory(
                ActiveDirectoryResponseHandler::new(warning_period),
            )],
            attributes: ad::ATTRIBUTES.to_vec(),
        },
        LdapType::FreeIpa => FlavorHandlers {
            request_handlers: Vec::new(),
            response_handlers: vec![ResponseHandler::FreeIpa(FreeIpaResponseHandler::new(
                warning_period,
                ctx.login_failures,
            ))],
            attributes: freeipa::ATTRIBUTES.to_vec(),
        },
        LdapType::EDirectory => FlavorHandlers {
            request_handlers: Vec::new(),
            response_handlers: vec![ResponseHandler::EDirectory(EDirectoryResponseHandler::new(
                warning_period,
            ))],
            attributes: edirectory::ATTRIBUTES.to_vec(),
        },
        LdapType::Generic => FlavorHandlers {
            request_handlers: vec![RequestHandler::PasswordPolicyControl],
            response_handlers: vec![
                ResponseHandler::PasswordPolicyControl,
                ResponseHandler::PasswordExpirationControl,
            ],
            attributes: Vec::new(),
        },
    }
}

/// Everything the authentication handler needs to enforce password policy
#[derive(Debug, Clone)]
pub struct PasswordPolicyConfiguration {
    pub context: PasswordPolicyContext,
    pub handlers: FlavorHandlers,
}

impl PasswordPolicyConfiguration {
    /// Flavor handlers, preceded by the custom handler when one is configured
    pub fn from_properties(
        props: &LdapPasswordPolicyProperties,
        registry: Option<&ResponseHandlerRegistry>,
    ) -> Self {
        let context = PasswordPolicyContext::from_properties(props);
        let mut handlers = flavor_handlers(props.policy_type, &context);

        if let Some(name) = props.custom_policy_handler.as_deref().filter(|n| !n.trim().is_empty()) {
            debug!("Using custom password policy handler {}", name);
            match registry.and_then(|r| r.create(name)) {
                Some(custom) => handlers.response_handlers.insert(0, ResponseHandler::Custom(custom)),
                None => warn!("Continuing without custom password policy handler {}", name),
            }
        }

        debug!(
            "Password policy for {:?} uses response handlers {:?}",
            props.policy_type, handlers.response_handlers
        );
        Self { context, handlers }
    }
}

/// Parse an LDAP generalized time value (`20240131120000Z`, optionally with fractions)
pub fn parse_generalized_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let body = value.strip_suffix('Z').unwrap_or(value);
    let body = body.split(['.', ',']).next().unwrap_or(body);

    let parsed = match body.len() {
        14 => NaiveDateTime::parse_from_str(body, "%Y%m%d%H%M%S").ok(),
        12 => NaiveDateTime::parse_from_str(&format!("{}00", body), "%Y%m%d%H%M%S").ok(),
        _ => None,
    }?;
    Some(parsed.and_utc())
}

/// Whole days until `instant`, never negative
pub(crate) fn days_until(instant: DateTime<Utc>) -> i64 {
    (instant - Utc::now()).num_days().max(0)
}
