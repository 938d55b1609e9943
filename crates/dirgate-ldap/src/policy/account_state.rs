//! Account state interpretation
//!
//! Turns the [`AccountState`] recorded by the response handlers, plus any
//! configured policy attributes on the user entry, into warning messages or
//! a hard [`AuthenticationFailure::PolicyViolation`].

use dirgate_core::types::PolicyViolationKind;
use dirgate_core::LdapPasswordPolicyProperties;
use tracing::{debug, warn};

use super::{days_until, AccountWarning, MessageDescriptor, PasswordPolicyContext};
use crate::authenticator::AuthenticationResponse;
use crate::error::AuthenticationFailure;

#[derive(Debug, Clone)]
pub enum AccountStateHandler {
    /// Ignore account state entirely
    Disabled,
    Default {
        policy_attributes: Vec<(String, PolicyViolationKind)>,
    },
    /// Only warn when an entry attribute matches a configured value
    WarningOnAttributeMatch {
        attribute: String,
        value: String,
        display_on_match: bool,
        policy_attributes: Vec<(String, PolicyViolationKind)>,
    },
}

impl AccountStateHandler {
    pub fn from_properties(props: &LdapPasswordPolicyProperties) -> Self {
        if !props.account_state_handling_enabled {
            debug!("Account state handling is disabled");
            return AccountStateHandler::Disabled;
        }

        let mut policy_attributes: Vec<(String, PolicyViolationKind)> = props
            .policy_attributes
            .iter()
            .map(|(name, kind)| (name.clone(), *kind))
            .collect();
        policy_attributes.sort_by(|a, b| a.0.cmp(&b.0));

        let attribute = props.warning_attribute_name.as_deref().map(str::trim).unwrap_or_default();
        let value = props.warning_attribute_value.as_deref().map(str::trim).unwrap_or_default();
        if !attribute.is_empty() && !value.is_empty() {
            debug!(
                "Warning on account state attribute {}={} (display on match: {})",
                attribute, value, props.display_warning_on_match
            );
            return AccountStateHandler::WarningOnAttributeMatch {
                attribute: attribute.to_string(),
                value: value.to_string(),
                display_on_match: props.display_warning_on_match,
                policy_attributes,
            };
        }

        AccountStateHandler::Default { policy_attributes }
    }

    /// Warnings for a successful authentication, or the policy failure that blocks it
    pub fn handle(
        &self,
        response: &AuthenticationResponse,
        ctx: &PasswordPolicyContext,
    ) -> Result<Vec<MessageDescriptor>, AuthenticationFailure> {
        let policy_attributes = match self {
            AccountStateHandler::Disabled => return Ok(Vec::new()),
            AccountStateHandler::Default { policy_attributes }
            | AccountStateHandler::WarningOnAttributeMatch {
                policy_attributes, ..
            } => policy_attributes,
        };

        check_policy_attributes(response, policy_attributes)?;

        let state = response.account_state.as_ref();
        if let Some(error) = state.and_then(|s| s.error.as_ref()) {
            match error.kind {
                Some(kind) => {
                    debug!("Account state error {} for {}: {}", error.code, response.user, kind);
                    return Err(AuthenticationFailure::policy(kind, error.message.clone()));
                }
                None => warn!("No policy mapping for account state error {} of {}", error.code, response.user),
            }
        }

        let warning = state.and_then(|s| s.warning.as_ref());
        match self {
            AccountStateHandler::WarningOnAttributeMatch {
                attribute,
                value,
                display_on_match,
                ..
            } => {
                let matched = response
                    .entry
                    .as_ref()
                    .and_then(|e| e.attribute(attribute))
                    .and_then(|a| a.string_value())
                    .map(|v| v == value.as_str())
                    .unwrap_or(false);
                if matched != *display_on_match {
                    return Ok(Vec::new());
                }
                let mut messages = warning.map(|w| warning_messages(w, ctx)).unwrap_or_default();
                if messages.is_empty() {
                    messages.push(MessageDescriptor::account_state_warning(attribute));
                }
                Ok(messages)
            }
            _ => Ok(warning.map(|w| warning_messages(w, ctx)).unwrap_or_default()),
        }
    }
}

fn check_policy_attributes(
    response: &AuthenticationResponse,
    policy_attributes: &[(String, PolicyViolationKind)],
) -> Result<(), AuthenticationFailure> {
    let Some(entry) = response.entry.as_ref() else {
        return Ok(());
    };
    for (name, kind) in policy_attributes {
        let set = entry
            .attribute(name)
            .and_then(|a| a.string_value())
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if set {
            debug!("Policy attribute {} is set for {}", name, response.user);
            return Err(AuthenticationFailure::policy(
                *kind,
                format!("{} is set on {}", name, entry.dn),
            ));
        }
    }
    Ok(())
}

fn warning_messages(warning: &AccountWarning, ctx: &PasswordPolicyContext) -> Vec<MessageDescriptor> {
    let mut messages = Vec::new();
    if let Some(expiration) = warning.expiration {
        let days = days_until(expiration);
        if days < i64::from(ctx.warning_days) {
            debug!("Password expires in {} days", days);
            messages.push(MessageDescriptor::password_expiring(days));
        }
    }
    if let Some(logins) = warning.logins_remaining.filter(|n| *n > 0) {
        messages.push(MessageDescriptor::logins_remaining(logins));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::OperationResult;
    use crate::policy::AccountState;
    use chrono::{Duration, Utc};
    use dirgate_core::types::{LdapAttribute, LdapEntry};
    use std::collections::HashMap;

    fn response(entry: LdapEntry, state: Option<AccountState>) -> AuthenticationResponse {
        AuthenticationResponse {
            user: "jdoe".to_string(),
            result: OperationResult::success(),
            entry: Some(entry),
            account_state: state,
            ..Default::default()
        }
    }

    #[test]
    fn test_selection() {
        let disabled = LdapPasswordPolicyProperties {
            account_state_handling_enabled: false,
            warning_attribute_name: Some("pwdAccountLockedTime".to_string()),
            warning_attribute_value: Some("000001010000Z".to_string()),
            ..Default::default()
        };
        assert!(matches!(AccountStateHandler::from_properties(&disabled), AccountStateHandler::Disabled));

        let blank_value = LdapPasswordPolicyProperties {
            warning_attribute_name: Some("pwdAccountLockedTime".to_string()),
            warning_attribute_value: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            AccountStateHandler::from_properties(&blank_value),
            AccountStateHandler::Default { .. }
        ));
    }

    #[test]
    fn test_warning_on_attribute_match() {
        let props = LdapPasswordPolicyProperties {
            warning_attribute_name: Some("pwdAccountLockedTime".to_string()),
            warning_attribute_value: Some("000001010000Z".to_string()),
            ..Default::default()
        };
        let handler = AccountStateHandler::from_properties(&props);
        let ctx = PasswordPolicyContext::from_properties(&props);

        let locked = LdapEntry::new("uid=jdoe,ou=people,dc=example,dc=com")
            .with_attribute(LdapAttribute::new("pwdAccountLockedTime", ["000001010000Z"]));
        let messages = handler.handle(&response(locked, None), &ctx).unwrap();
        assert_eq!(messages, vec![MessageDescriptor::account_state_warning("pwdAccountLockedTime")]);

        let other = LdapEntry::new("uid=jdoe,ou=people,dc=example,dc=com")
            .with_attribute(LdapAttribute::new("pwdAccountLockedTime", ["20240101000000Z"]));
        assert!(handler.handle(&response(other, None), &ctx).unwrap().is_empty());
    }

    #[test]
    fn test_warning_inverted_when_not_displayed_on_match() {
        let props = LdapPasswordPolicyProperties {
            warning_attribute_name: Some("pwdAccountLockedTime".to_string()),
            warning_attribute_value: Some("000001010000Z".to_string()),
            display_warning_on_match: false,
            ..Default::default()
        };
        let handler = AccountStateHandler::from_properties(&props);
        let ctx = PasswordPolicyContext::from_properties(&props);

        let plain = LdapEntry::new("uid=jdoe");
        let state = AccountState::warning(None, Some(3));
        let messages = handler.handle(&response(plain, Some(state)), &ctx).unwrap();
        assert_eq!(messages, vec![MessageDescriptor::logins_remaining(3)]);

        let locked = LdapEntry::new("uid=jdoe")
            .with_attribute(LdapAttribute::new("pwdAccountLockedTime", ["000001010000Z"]));
        assert!(handler.handle(&response(locked, None), &ctx).unwrap().is_empty());
    }

    #[test]
    fn test_default_warnings_respect_threshold() {
        let ctx = PasswordPolicyContext::default();
        let handler = AccountStateHandler::from_properties(&LdapPasswordPolicyProperties::default());

        let soon = AccountState::warning(Some(Utc::now() + Duration::days(5) + Duration::hours(1)), None);
        let messages = handler.handle(&response(LdapEntry::new("uid=a"), Some(soon)), &ctx).unwrap();
        assert_eq!(messages, vec![MessageDescriptor::password_expiring(5)]);

        let later = AccountState::warning(Some(Utc::now() + Duration::days(60)), Some(0));
        assert!(handler.handle(&response(LdapEntry::new("uid=a"), Some(later)), &ctx).unwrap().is_empty());

        assert!(handler.handle(&response(LdapEntry::new("uid=a"), None), &ctx).unwrap().is_empty());
    }

    #[test]
    fn test_errors_raise_policy_violation() {
        let ctx = PasswordPolicyContext::default();
        let handler = AccountStateHandler::from_properties(&LdapPasswordPolicyProperties::default());

        let locked = AccountState::error(Some(PolicyViolationKind::AccountLocked), 0x775, "data 775");
        let err = handler.handle(&response(LdapEntry::new("uid=a"), Some(locked)), &ctx).unwrap_err();
        assert!(matches!(
            err,
            AuthenticationFailure::PolicyViolation {
                kind: PolicyViolationKind::AccountLocked,
                ..
            }
        ));

        let unmapped = AccountState::error(None, 0x52e, "data 52e");
        assert!(handler.handle(&response(LdapEntry::new("uid=a"), Some(unmapped)), &ctx).is_ok());
    }

    #[test]
    fn test_policy_attributes() {
        let props = LdapPasswordPolicyProperties {
            policy_attributes: HashMap::from([("accountLocked".to_string(), PolicyViolationKind::AccountLocked)]),
            ..Default::default()
        };
        let handler = AccountStateHandler::from_properties(&props);
        let ctx = PasswordPolicyContext::from_properties(&props);

        let locked = LdapEntry::new("uid=a").with_attribute(LdapAttribute::new("accountLocked", ["TRUE"]));
        assert!(handler.handle(&response(locked, None), &ctx).is_err());

        let open = LdapEntry::new("uid=a").with_attribute(LdapAttribute::new("accountLocked", ["false"]));
        assert!(handler.handle(&response(open, None), &ctx).is_ok());

        let disabled = AccountStateHandler::Disabled;
        let locked = LdapEntry::new("uid=a").with_attribute(LdapAttribute::new("accountLocked", ["true"]));
        assert!(disabled.handle(&response(locked, None), &ctx).unwrap().is_empty());
    }
}
