//! LDAP result codes (RFC 4511 section 4.1.9)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Result code returned by a directory operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    OperationsError,
    ProtocolError,
    TimeLimitExceeded,
    SizeLimitExceeded,
    CompareFalse,
    CompareTrue,
    AuthMethodNotSupported,
    StrongerAuthRequired,
    Referral,
    AdminLimitExceeded,
    UnavailableCriticalExtension,
    ConfidentialityRequired,
    SaslBindInProgress,
    NoSuchAttribute,
    UndefinedAttributeType,
    ConstraintViolation,
    AttributeOrValueExists,
    InvalidAttributeSyntax,
    NoSuchObject,
    AliasProblem,
    InvalidDnSyntax,
    InappropriateAuthentication,
    InvalidCredentials,
    InsufficientAccessRights,
    Busy,
    Unavailable,
    UnwillingToPerform,
    LoopDetect,
    NamingViolation,
    ObjectClassViolation,
    NotAllowedOnNonLeaf,
    NotAllowedOnRdn,
    EntryAlreadyExists,
    Other,
    /// Client-side: the server could not be reached
    ServerDown,
    /// Client-side: no response within the response timeout
    Timeout,
    /// Any code without a dedicated variant
    Unknown(u32),
}

const CODES: &[(ResultCode, u32, &str)] = &[
    (ResultCode::Success, 0, "SUCCESS"),
    (ResultCode::OperationsError, 1, "OPERATIONS_ERROR"),
    (ResultCode::ProtocolError, 2, "PROTOCOL_ERROR"),
    (ResultCode::TimeLimitExceeded, 3, "TIME_LIMIT_EXCEEDED"),
    (ResultCode::SizeLimitExceeded, 4, "SIZE_LIMIT_EXCEEDED"),
    (ResultCode::CompareFalse, 5, "COMPARE_FALSE"),
    (ResultCode::CompareTrue, 6, "COMPARE_TRUE"),
    (ResultCode::AuthMethodNotSupported, 7, "AUTH_METHOD_NOT_SUPPORTED"),
    (ResultCode::StrongerAuthRequired, 8, "STRONGER_AUTH_REQUIRED"),
    (ResultCode::Referral, 10, "REFERRAL"),
    (ResultCode::AdminLimitExceeded, 11, "ADMIN_LIMIT_EXCEEDED"),
    (ResultCode::UnavailableCriticalExtension, 12, "UNAVAILABLE_CRITICAL_EXTENSION"),
    (ResultCode::ConfidentialityRequired, 13, "CONFIDENTIALITY_REQUIRED"),
    (ResultCode::SaslBindInProgress, 14, "SASL_BIND_IN_PROGRESS"),
    (ResultCode::NoSuchAttribute, 16, "NO_SUCH_ATTRIBUTE"),
    (ResultCode::UndefinedAttributeType, 17, "UNDEFINED_ATTRIBUTE_TYPE"),
    (ResultCode::ConstraintViolation, 19, "CONSTRAINT_VIOLATION"),
    (ResultCode::AttributeOrValueExists, 20, "ATTRIBUTE_OR_VALUE_EXISTS"),
    (ResultCode::InvalidAttributeSyntax, 21, "INVALID_ATTRIBUTE_SYNTAX"),
    (ResultCode::NoSuchObject, 32, "NO_SUCH_OBJECT"),
    (ResultCode::AliasProblem, 33, "ALIAS_PROBLEM"),
    (ResultCode::InvalidDnSyntax, 34, "INVALID_DN_SYNTAX"),
    (ResultCode::InappropriateAuthentication, 48, "INAPPROPRIATE_AUTHENTICATION"),
    (ResultCode::InvalidCredentials, 49, "INVALID_CREDENTIALS"),
    (ResultCode::InsufficientAccessRights, 50, "INSUFFICIENT_ACCESS_RIGHTS"),
    (ResultCode::Busy, 51, "BUSY"),
    (ResultCode::Unavailable, 52, "UNAVAILABLE"),
    (ResultCode::UnwillingToPerform, 53, "UNWILLING_TO_PERFORM"),
    (ResultCode::LoopDetect, 54, "LOOP_DETECT"),
    (ResultCode::NamingViolation, 64, "NAMING_VIOLATION"),
    (ResultCode::ObjectClassViolation, 65, "OBJECT_CLASS_VIOLATION"),
    (ResultCode::NotAllowedOnNonLeaf, 66, "NOT_ALLOWED_ON_NONLEAF"),
    (ResultCode::NotAllowedOnRdn, 67, "NOT_ALLOWED_ON_RDN"),
    (ResultCode::EntryAlreadyExists, 68, "ENTRY_ALREADY_EXISTS"),
    (ResultCode::Other, 80, "OTHER"),
    (ResultCode::ServerDown, 81, "SERVER_DOWN"),
    (ResultCode::Timeout, 85, "LDAP_TIMEOUT"),
];

impl ResultCode {
    /// Map a numeric protocol code
    pub fn from_code(code: u32) -> Self {
        CODES
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(rc, _, _)| *rc)
            .unwrap_or(ResultCode::Unknown(code))
    }

    /// Numeric protocol code
    pub fn code(&self) -> u32 {
        match self {
            ResultCode::Unknown(code) => *code,
            other => CODES
                .iter()
                .find(|(rc, _, _)| rc == other)
                .map(|(_, c, _)| *c)
                .unwrap_or(80),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultCode::Success)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Unknown(code) => write!(f, "UNKNOWN({})", code),
            other => {
                let name = CODES
                    .iter()
                    .find(|(rc, _, _)| rc == other)
                    .map(|(_, _, n)| *n)
                    .unwrap_or("OTHER");
                f.write_str(name)
            }
        }
    }
}

impl FromStr for ResultCode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if let Ok(code) = name.parse::<u32>() {
            return Ok(ResultCode::from_code(code));
        }
        CODES
            .iter()
            .find(|(_, _, n)| n.eq_ignore_ascii_case(name))
            .map(|(rc, _, _)| *rc)
            .ok_or_else(|| crate::Error::invalid_value("result code", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(ResultCode::from_code(49), ResultCode::InvalidCredentials);
        assert_eq!(ResultCode::InvalidCredentials.code(), 49);
        assert_eq!(ResultCode::from_code(4711), ResultCode::Unknown(4711));
        assert_eq!(ResultCode::Unknown(4711).code(), 4711);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            "invalid_credentials".parse::<ResultCode>().unwrap(),
            ResultCode::InvalidCredentials
        );
        assert_eq!("53".parse::<ResultCode>().unwrap(), ResultCode::UnwillingToPerform);
        assert!("NOT_A_CODE".parse::<ResultCode>().is_err());
        assert_eq!(ResultCode::CompareTrue.to_string(), "COMPARE_TRUE");
    }
}
