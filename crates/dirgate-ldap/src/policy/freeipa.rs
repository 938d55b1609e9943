//! FreeIPA account state

use chrono::{Duration, Utc};
use dirgate_core::types::PolicyViolationKind;
use tracing::debug;

use super::{parse_generalized_time, AccountState};
use crate::authenticator::AuthenticationResponse;

pub const PASSWORD_EXPIRATION_ATTRIBUTE: &str = "krbPasswordExpiration";
pub const LOGIN_FAILED_COUNT_ATTRIBUTE: &str = "krbLoginFailedCount";

pub(super) const ATTRIBUTES: [&str; 3] = [
    PASSWORD_EXPIRATION_ATTRIBUTE,
    LOGIN_FAILED_COUNT_ATTRIBUTE,
    "krbLastPwdChange",
];

#[derive(Debug, Clone)]
pub struct FreeIpaResponseHandler {
    warning_period: Duration,
    max_login_failures: u32,
}

impl FreeIpaResponseHandler {
    pub fn new(warning_period: Duration, max_login_failures: u32) -> Self {
        Self {
            warning_period,
            max_login_failures,
        }
    }

    pub fn handle(&self, response: &mut AuthenticationResponse) {
        if !response.result.is_success() {
            if let Some(kind) = classify(&response.result.message) {
                debug!("FreeIPA reported {} for {}", kind, response.user);
                response.account_state = Some(AccountState::error(
                    Some(kind),
                    i64::from(response.result.code.code()),
                    response.result.message.clone(),
                ));
            }
            return;
        }

        let Some(entry) = response.entry.as_ref() else {
            return;
        };

        let expiration = entry
            .attribute(PASSWORD_EXPIRATION_ATTRIBUTE)
            .and_then(|a| a.string_value())
            .and_then(|v| parse_generalized_time(&v));

        let logins_remaining = entry
            .attribute(LOGIN_FAILED_COUNT_ATTRIBUTE)
            .and_then(|a| a.string_value())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|_| self.max_login_failures > 0)
            .map(|failed| i64::from(self.max_login_failures) - failed)
            .filter(|remaining| *remaining < i64::from(self.max_login_failures));

        let expiring = expiration.filter(|exp| Utc::now() > *exp - self.warning_period);
        if expiring.is_some() || logins_remaining.is_some() {
            response.account_state = Some(AccountState::warning(expiring, logins_remaining));
        }
    }
}

fn classify(message: &str) -> Option<PolicyViolationKind> {
    let message = message.to_lowercase();
    if message.contains("locked") || message.contains("too many failed") {
        Some(PolicyViolationKind::AccountLocked)
    } else if message.contains("password has expired") || message.contains("password expired") {
        Some(PolicyViolationKind::CredentialExpired)
    } else if message.contains("expired") {
        Some(PolicyViolationKind::AccountExpired)
    } else if message.contains("disabled") {
        Some(PolicyViolationKind::AccountDisabled)
    } else {
        None
    }
}
