//! Password policy response controls
//!
//! Decodes the draft-behera password policy control and the Netscape
//! password expired / expiring controls returned with a bind result.

use chrono::{Duration, Utc};
use dirgate_core::types::PolicyViolationKind;
use tracing::{debug, warn};

use super::AccountState;
use crate::authenticator::AuthenticationResponse;
use crate::error::{DirectoryError, DirectoryResult};

pub const PASSWORD_POLICY_OID: &str = "1.3.6.1.4.1.42.2.27.8.5.1";
pub const PASSWORD_EXPIRED_OID: &str = "2.16.840.1.113730.3.4.4";
pub const PASSWORD_EXPIRING_OID: &str = "2.16.840.1.113730.3.4.5";

const TAG_SEQUENCE: u8 = 0x30;
const TAG_WARNING: u8 = 0xA0;
const TAG_TIME_BEFORE_EXPIRATION: u8 = 0x80;
const TAG_GRACE_REMAINING: u8 = 0x81;
const TAG_ERROR: u8 = 0x81;

/// Decoded password policy response control value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordPolicyControl {
    /// Seconds until the password expires
    pub time_before_expiration: Option<i64>,
    /// Grace binds left after expiry
    pub grace_remaining: Option<i64>,
    pub error: Option<i64>,
}

impl PasswordPolicyControl {
    /// Policy meaning of the error enumeration
    pub fn violation(&self) -> Option<PolicyViolationKind> {
        match self.error? {
            0 => Some(PolicyViolationKind::CredentialExpired),
            1 => Some(PolicyViolationKind::AccountLocked),
            2 => Some(PolicyViolationKind::PasswordMustChange),
            _ => None,
        }
    }
}

struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn byte(&mut self) -> DirectoryResult<u8> {
        let b = *self.data.get(self.pos).ok_or_else(truncated)?;
        self.pos += 1;
        Ok(b)
    }

    /// Next tag-length-value
    fn element(&mut self) -> DirectoryResult<(u8, &'a [u8])> {
        let tag = self.byte()?;
        let first = self.byte()?;
        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let octets = usize::from(first & 0x7f);
            if octets == 0 || octets > 4 {
                return Err(malformed("unsupported length encoding"));
            }
            let mut len = 0usize;
            for _ in 0..octets {
                len = (len << 8) | usize::from(self.byte()?);
            }
            len
        };
        let end = self.pos.checked_add(len).filter(|end| *end <= self.data.len()).ok_or_else(truncated)?;
        let data = self.data;
        let value = &data[self.pos..end];
        self.pos = end;
        Ok((tag, value))
    }
}

fn truncated() -> DirectoryError {
    malformed("truncated value")
}

fn malformed(reason: &str) -> DirectoryError {
    DirectoryError::operation(
        "decode password policy control",
        dirgate_core::types::ResultCode::ProtocolError,
        reason,
    )
}

fn integer(bytes: &[u8]) -> DirectoryResult<i64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(malformed("bad integer length"));
    }
    // two's complement, sign extended from the first octet
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for b in bytes {
        value = (value << 8) | i64::from(*b);
    }
    Ok(value)
}

/// Decode the BER value of a password policy response control
pub fn decode_password_policy_control(value: &[u8]) -> DirectoryResult<PasswordPolicyControl> {
    let mut outer = BerReader::new(value);
    let (tag, body) = outer.element()?;
    if tag != TAG_SEQUENCE {
        return Err(malformed("expected a sequence"));
    }

    let mut control = PasswordPolicyControl::default();
    let mut reader = BerReader::new(body);
    while !reader.is_empty() {
        match reader.element()? {
            (TAG_WARNING, warning) => {
                let (tag, value) = BerReader::new(warning).element()?;
                match tag {
                    TAG_TIME_BEFORE_EXPIRATION => control.time_before_expiration = Some(integer(value)?),
                    TAG_GRACE_REMAINING => control.grace_remaining = Some(integer(value)?),
                    other => return Err(malformed(&format!("unknown warning tag {:#x}", other))),
                }
            }
            (TAG_ERROR, error) => control.error = Some(integer(error)?),
            (other, _) => debug!("Ignoring password policy element with tag {:#x}", other),
        }
    }
    Ok(control)
}

pub(super) fn handle_password_policy(response: &mut AuthenticationResponse) {
    let Some(value) = response
        .result
        .control(PASSWORD_POLICY_OID)
        .and_then(|c| c.value.clone())
    else {
        return;
    };

    let control = match decode_password_policy_control(&value) {
        Ok(control) => control,
        Err(e) => {
            warn!("Unable to decode password policy control for {}: {}", response.user, e);
            return;
        }
    };
    debug!("Password policy control for {}: {:?}", response.user, control);

    if let Some(code) = control.error {
        response.account_state = Some(AccountState::error(
            control.violation(),
            code,
            response.result.message.clone(),
        ));
    } else if control.time_before_expiration.is_some() || control.grace_remaining.is_some() {
        let expiration = control
            .time_before_expiration
            .map(|secs| Utc::now() + Duration::seconds(secs));
        response.account_state = Some(AccountState::warning(expiration, control.grace_remaining));
    }
}

pub(super) fn handle_password_expiration(response: &mut AuthenticationResponse) {
    if response.result.control(PASSWORD_EXPIRED_OID).is_some() {
        debug!("Password expired control returned for {}", response.user);
        response.account_state = Some(AccountState::error(
            Some(PolicyViolationKind::CredentialExpired),
            0,
            response.result.message.clone(),
        ));
        return;
    }

    let seconds = response
        .result
        .control(PASSWORD_EXPIRING_OID)
        .and_then(|c| c.value.as_deref())
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|secs| *secs > 0);
    if let Some(secs) = seconds {
        response.account_state = Some(AccountState::warning(
            Some(Utc::now() + Duration::seconds(secs)),
            None,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{OperationResult, ResponseControl};

    fn with_control(oid: &str, value: Option<Vec<u8>>) -> AuthenticationResponse {
        let mut result = OperationResult::success();
        result.controls.push(ResponseControl {
            oid: oid.to_string(),
            critical: false,
            value,
        });
        AuthenticationResponse {
            user: "jdoe".to_string(),
            result,
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_time_before_expiration() {
        // SEQ { [0] { [0] 3600 } }
        let value = [0x30, 0x06, 0xA0, 0x04, 0x80, 0x02, 0x0E, 0x10];
        let control = decode_password_policy_control(&value).unwrap();
        assert_eq!(control.time_before_expiration, Some(3600));
        assert_eq!(control.grace_remaining, None);
        assert_eq!(control.error, None);
    }

    #[test]
    fn test_decode_grace_and_error() {
        // SEQ { [0] { [1] 2 }, [1] 1 }
        let value = [0x30, 0x08, 0xA0, 0x03, 0x81, 0x01, 0x02, 0x81, 0x01, 0x01];
        let control = decode_password_policy_control(&value).unwrap();
        assert_eq!(control.grace_remaining, Some(2));
        assert_eq!(control.error, Some(1));
        assert_eq!(control.violation(), Some(PolicyViolationKind::AccountLocked));
    }

    #[test]
    fn test_decode_rejects_truncated() {
        assert!(decode_password_policy_control(&[0x30, 0x06, 0xA0, 0x04]).is_err());
        assert!(decode_password_policy_control(&[0x04, 0x00]).is_err());
    }

    #[test]
    fn test_policy_error_sets_state() {
        let mut response = with_control(PASSWORD_POLICY_OID, Some(vec![0x30, 0x03, 0x81, 0x01, 0x00]));
        handle_password_policy(&mut response);
        let error = response.account_state.unwrap().error.unwrap();
        assert_eq!(error.kind, Some(PolicyViolationKind::CredentialExpired));
        assert_eq!(error.code, 0);
    }

    #[test]
    fn test_netscape_controls() {
        let mut expired = with_control(PASSWORD_EXPIRED_OID, Some(b"0".to_vec()));
        handle_password_expiration(&mut expired);
        assert_eq!(
            expired.account_state.unwrap().error.unwrap().kind,
            Some(PolicyViolationKind::CredentialExpired)
        );

        let mut expiring = with_control(PASSWORD_EXPIRING_OID, Some(b"86400".to_vec()));
        handle_password_expiration(&mut expiring);
        let expiration = expiring.account_state.unwrap().warning.unwrap().expiration.unwrap();
        assert!(expiration > Utc::now() + Duration::hours(23));

        let mut none = AuthenticationResponse::default();
        handle_password_expiration(&mut none);
        assert!(none.account_state.is_none());
    }
}
