//! Account policy outcomes shared between configuration and the engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of hard policy failure raised while authenticating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyViolationKind {
    AccountDisabled,
    AccountLocked,
    AccountExpired,
    InvalidLoginTime,
    InvalidLoginLocation,
    PasswordMustChange,
    CredentialExpired,
}

impl PolicyViolationKind {
    /// Message key rendered by downstream consumers
    pub fn message_code(&self) -> &'static str {
        match self {
            PolicyViolationKind::AccountDisabled => "authenticationFailure.AccountDisabledException",
            PolicyViolationKind::AccountLocked => "authenticationFailure.AccountLockedException",
            PolicyViolationKind::AccountExpired => "authenticationFailure.AccountExpiredException",
            PolicyViolationKind::InvalidLoginTime => "authenticationFailure.InvalidLoginTimeException",
            PolicyViolationKind::InvalidLoginLocation => {
                "authenticationFailure.InvalidLoginLocationException"
            }
            PolicyViolationKind::PasswordMustChange => {
                "authenticationFailure.AccountPasswordMustChangeException"
            }
            PolicyViolationKind::CredentialExpired => "authenticationFailure.CredentialExpiredException",
        }
    }
}

impl fmt::Display for PolicyViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PolicyViolationKind::AccountDisabled => "account disabled",
            PolicyViolationKind::AccountLocked => "account locked",
            PolicyViolationKind::AccountExpired => "account expired",
            PolicyViolationKind::InvalidLoginTime => "login not allowed at this time",
            PolicyViolationKind::InvalidLoginLocation => "login not allowed from this location",
            PolicyViolationKind::PasswordMustChange => "password must be changed",
            PolicyViolationKind::CredentialExpired => "password expired",
        };
        f.write_str(text)
    }
}
