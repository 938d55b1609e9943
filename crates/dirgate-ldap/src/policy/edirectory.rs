//! NetIQ eDirectory account state

use chrono::{Duration, Utc};
use dirgate_core::types::PolicyViolationKind;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{parse_generalized_time, AccountState};
use crate::authenticator::AuthenticationResponse;

pub const PASSWORD_EXPIRATION_ATTRIBUTE: &str = "passwordExpirationTime";
pub const LOGIN_GRACE_REMAINING_ATTRIBUTE: &str = "loginGraceRemaining";

pub(super) const ATTRIBUTES: [&str; 2] = [PASSWORD_EXPIRATION_ATTRIBUTE, LOGIN_GRACE_REMAINING_ATTRIBUTE];

static NDS_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((-\d+)\)").expect("valid NDS error pattern"));

/// Map the `(-NNN)` NDS error code of a bind diagnostic message
pub fn parse_edirectory_error(message: &str) -> Option<(i64, Option<PolicyViolationKind>)> {
    let code: i64 = NDS_CODE.captures(message)?.get(1)?.as_str().parse().ok()?;
    let kind = match code {
        -197 => Some(PolicyViolationKind::AccountLocked),
        -218 => Some(PolicyViolationKind::InvalidLoginTime),
        -220 => Some(PolicyViolationKind::AccountExpired),
        -222 => Some(PolicyViolationKind::CredentialExpired),
        _ => None,
    };
    Some((code, kind))
}

#[derive(Debug, Clone)]
pub struct EDirectoryResponseHandler {
    warning_period: Duration,
}

impl EDirectoryResponseHandler {
    pub fn new(warning_period: Duration) -> Self {
        Self { warning_period }
    }

    pub fn handle(&self, response: &mut AuthenticationResponse) {
        if !response.result.is_success() {
            if let Some((code, kind)) = parse_edirectory_error(&response.result.message) {
                debug!("eDirectory reported error {} for {}", code, response.user);
                response.account_state = Some(AccountState::error(kind, code, response.result.message.clone()));
            }
            return;
        }

        let Some(entry) = response.entry.as_ref() else {
            return;
        };

        let expiration = entry
            .attribute(PASSWORD_EXPIRATION_ATTRIBUTE)
            .and_then(|a| a.string_value())
            .and_then(|v| parse_generalized_time(&v))
            .filter(|exp| Utc::now() > *exp - self.warning_period);
        let grace = entry
            .attribute(LOGIN_GRACE_REMAINING_ATTRIBUTE)
            .and_then(|a| a.string_value())
            .and_then(|v| v.trim().parse::<i64>().ok());

        if expiration.is_some() || grace.is_some() {
            response.account_state = Some(AccountState::warning(expiration, grace));
        }
    }
}
