//! Error types for the directory engine

use dirgate_core::types::{PolicyViolationKind, ResultCode};
use std::time::Duration;
use thiserror::Error;

pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// Failures raised while building components or talking to a directory
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("No connection available after waiting {0:?}")]
    PoolExhausted(Duration),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("{operation} failed with {code}: {message}")]
    Operation {
        operation: &'static str,
        code: ResultCode,
        message: String,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Found more than one entry for {0}")]
    MultipleEntries(String),

    #[error("Unsupported SASL mechanism: {0}")]
    UnsupportedMechanism(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("LDAP client error: {0}")]
    Client(#[source] ldap3::LdapError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DirectoryError {
    pub fn configuration(message: impl Into<String>) -> Self {
        DirectoryError::Configuration(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        DirectoryError::Connection(message.into())
    }

    pub fn operation(operation: &'static str, code: ResultCode, message: impl Into<String>) -> Self {
        DirectoryError::Operation {
            operation,
            code,
            message: message.into(),
        }
    }

    /// Whether this error leaves the connection unusable
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            DirectoryError::Connection(_)
                | DirectoryError::Timeout(_)
                | DirectoryError::Client(_)
                | DirectoryError::Io(_)
        )
    }
}

impl From<ldap3::LdapError> for DirectoryError {
    fn from(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::Timeout { elapsed } => DirectoryError::Timeout(elapsed.to_string()),
            other => DirectoryError::Client(other),
        }
    }
}

impl From<dirgate_core::Error> for DirectoryError {
    fn from(err: dirgate_core::Error) -> Self {
        match err {
            dirgate_core::Error::Configuration(message) => DirectoryError::Configuration(message),
            dirgate_core::Error::Io(e) => DirectoryError::Io(e),
            other => DirectoryError::Configuration(other.to_string()),
        }
    }
}

/// Outcome of a failed authentication attempt.
///
/// Downstream consumers render a different message for each of
/// "could not resolve account", "secret rejected" and "policy blocked login".
#[derive(Error, Debug)]
pub enum AuthenticationFailure {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid credentials for {0}")]
    InvalidCredentials(String),

    #[error("Login blocked by account policy ({kind}): {message}")]
    PolicyViolation {
        kind: PolicyViolationKind,
        message: String,
    },

    #[error("Login rejected by result code {result_code}: {message}")]
    PolicyRejected {
        result_code: ResultCode,
        message: String,
    },

    #[error("Unable to build principal: {0}")]
    Principal(String),

    #[error("Directory failure: {0}")]
    Directory(#[from] DirectoryError),
}

impl AuthenticationFailure {
    pub fn policy(kind: PolicyViolationKind, message: impl Into<String>) -> Self {
        AuthenticationFailure::PolicyViolation {
            kind,
            message: message.into(),
        }
    }

    /// Message key rendered by downstream consumers
    pub fn message_code(&self) -> &'static str {
        match self {
            AuthenticationFailure::AccountNotFound(_) => "authenticationFailure.AccountNotFoundException",
            AuthenticationFailure::InvalidCredentials(_) | AuthenticationFailure::PolicyRejected { .. } => {
                "authenticationFailure.FailedLoginException"
            }
            AuthenticationFailure::PolicyViolation { kind, .. } => kind.message_code(),
            AuthenticationFailure::Principal(_) => "authenticationFailure.LoginException",
            AuthenticationFailure::Directory(_) => "authenticationFailure.PreventedException",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_timeout_maps_to_timeout() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        let err = DirectoryError::from(ldap3::LdapError::from(elapsed));
        assert!(matches!(err, DirectoryError::Timeout(_)));
        assert!(err.is_connection_failure());
    }

    #[test]
    fn test_other_client_errors_stay_client_errors() {
        let err = DirectoryError::from(ldap3::LdapError::EndOfStream);
        assert!(matches!(err, DirectoryError::Client(_)));
    }

    #[test]
    fn test_message_codes() {
        assert_eq!(
            AuthenticationFailure::AccountNotFound("jdoe".to_string()).message_code(),
            "authenticationFailure.AccountNotFoundException"
        );
        assert_eq!(
            AuthenticationFailure::from(DirectoryError::Timeout("1ms".to_string())).message_code(),
            "authenticationFailure.PreventedException"
        );
    }
}
