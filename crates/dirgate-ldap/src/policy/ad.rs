//! Active Directory account state

use chrono::{DateTime, Duration, Utc};
use dirgate_core::types::PolicyViolationKind;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use super::AccountState;
use crate::authenticator::AuthenticationResponse;

pub const PASSWORD_EXPIRY_ATTRIBUTE: &str = "msDS-UserPasswordExpiryTimeComputed";

pub(super) const ATTRIBUTES: [&str; 5] = [
    PASSWORD_EXPIRY_ATTRIBUTE,
    "pwdLastSet",
    "userAccountControl",
    "lockoutTime",
    "accountExpires",
];

static DATA_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bdata ([0-9a-fA-F]+)\b").expect("valid AD data pattern"));

/// Seconds between 1601-01-01 and the Unix epoch
const FILETIME_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// Map the `data NNN` code of an AD bind diagnostic message
pub fn parse_ad_error(message: &str) -> Option<(i64, Option<PolicyViolationKind>)> {
    let hex = DATA_CODE.captures(message)?.get(1)?.as_str().to_string();
    let code = i64::from_str_radix(&hex, 16).ok()?;
    let kind = match code {
        0x530 => Some(PolicyViolationKind::InvalidLoginTime),
        0x531 => Some(PolicyViolationKind::InvalidLoginLocation),
        0x532 => Some(PolicyViolationKind::CredentialExpired),
        0x533 => Some(PolicyViolationKind::AccountDisabled),
        0x701 => Some(PolicyViolationKind::AccountExpired),
        0x773 => Some(PolicyViolationKind::PasswordMustChange),
        0x775 => Some(PolicyViolationKind::AccountLocked),
        // 525 no such user, 52e logon failure, 52f account restriction
        _ => None,
    };
    Some((code, kind))
}

/// Convert a Windows FILETIME (100ns ticks since 1601). `0` and `i64::MAX` mean never.
pub fn filetime_to_datetime(ticks: i64) -> Option<DateTime<Utc>> {
    if ticks <= 0 || ticks == i64::MAX {
        return None;
    }
    let secs = ticks / 10_000_000 - FILETIME_EPOCH_OFFSET_SECS;
    let nanos = (ticks % 10_000_000) * 100;
    DateTime::from_timestamp(secs, nanos as u32)
}

#[derive(Debug, Clone)]
pub struct ActiveDirectoryResponseHandler {
    warning_period: Duration,
}

impl ActiveDirectoryResponseHandler {
    pub fn new(warning_period: Duration) -> Self {
        Self { warning_period }
    }

    pub fn handle(&self, response: &mut AuthenticationResponse) {
        if !response.result.is_success() {
            if let Some((code, kind)) = parse_ad_error(&response.result.message) {
                debug!("Active Directory reported account error {:x} for {}", code, response.user);
                response.account_state = Some(AccountState::error(kind, code, response.result.message.clone()));
            }
            return;
        }

        let expiration = response
            .entry
            .as_ref()
            .and_then(|e| e.attribute(PASSWORD_EXPIRY_ATTRIBUTE))
            .and_then(|a| a.string_value())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(filetime_to_datetime);

        let Some(expiration) = expiration else {
            trace!("No password expiration for {}", response.user);
            return;
        };
        if Utc::now() > expiration - self.warning_period {
            response.account_state = Some(AccountState::warning(Some(expiration), None));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::OperationResult;
    use dirgate_core::types::{LdapAttribute, LdapEntry, ResultCode};

    fn to_filetime(instant: DateTime<Utc>) -> i64 {
        (instant.timestamp() + FILETIME_EPOCH_OFFSET_SECS) * 10_000_000
    }

    #[test]
    fn test_parse_ad_error() {
        let message = "80090308: LdapErr: DSID-0C09030B, comment: AcceptSecurityContext error, data 775, v893";
        assert_eq!(parse_ad_error(message), Some((0x775, Some(PolicyViolationKind::AccountLocked))));
        assert_eq!(
            parse_ad_error("... data 773, v4563"),
            Some((0x773, Some(PolicyViolationKind::PasswordMustChange)))
        );
        assert_eq!(parse_ad_error("... data 52e, v893"), Some((0x52e, None)));
        assert_eq!(parse_ad_error("no code here"), None);
    }

    #[test]
    fn test_filetime() {
        assert!(filetime_to_datetime(0).is_none());
        assert!(filetime_to_datetime(i64::MAX).is_none());
        let epoch = filetime_to_datetime(FILETIME_EPOCH_OFFSET_SECS * 10_000_000).unwrap();
        assert_eq!(epoch.timestamp(), 0);
    }

    #[test]
    fn test_bind_failure_sets_error() {
        let mut response = AuthenticationResponse {
            result: OperationResult::new(ResultCode::InvalidCredentials, "AcceptSecurityContext error, data 533, v893"),
            ..Default::default()
        };
        ActiveDirectoryResponseHandler::new(Duration::days(30)).handle(&mut response);

        let error = response.account_state.unwrap().error.unwrap();
        assert_eq!(error.kind, Some(PolicyViolationKind::AccountDisabled));
        assert_eq!(error.code, 0x533);
    }

    #[test]
    fn test_expiry_warning_only_inside_period() {
        let handler = ActiveDirectoryResponseHandler::new(Duration::days(30));
        let entry = |days: i64| {
            LdapEntry::new("cn=jdoe").with_attribute(LdapAttribute::new(
                PASSWORD_EXPIRY_ATTRIBUTE,
                [to_filetime(Utc::now() + Duration::days(days)).to_string()],
            ))
        };

        let mut soon = AuthenticationResponse {
            result: OperationResult::success(),
            entry: Some(entry(5)),
            ..Default::default()
        };
        handler.handle(&mut soon);
        assert!(soon.account_state.unwrap().warning.unwrap().expiration.is_some());

        let mut later = AuthenticationResponse {
            result: OperationResult::success(),
            entry: Some(entry(90)),
            ..Default::default()
        };
        handler.handle(&mut later);
        assert!(later.account_state.is_none());

        let mut never = AuthenticationResponse {
            result: OperationResult::success(),
            entry: Some(LdapEntry::new("cn=svc").with_attribute(LdapAttribute::new(
                PASSWORD_EXPIRY_ATTRIBUTE,
                [i64::MAX.to_string()],
            ))),
            ..Default::default()
        };
        handler.handle(&mut never);
        assert!(never.account_state.is_none());
    }
}
