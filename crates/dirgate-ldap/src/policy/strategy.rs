use dirgate_core::config::PasswordPolicyHandlingOption;
use dirgate_core::types::ResultCode;
use dirgate_core::LdapPasswordPolicyProperties;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{MessageDescriptor, PasswordPolicyContext};
use crate::authenticator::AuthenticationResponse;
use crate::error::{AuthenticationFailure, DirectoryError, DirectoryResult};
use crate::script::{resolve_script, CompiledScript, ScriptCache};

/// How a bind response is turned into policy warnings or failures
#[derive(Clone)]
pub enum PasswordPolicyStrategy {
    /// Run the account state handler
    Default,
    /// Treat the listed result codes as a policy rejection
    RejectResultCode(Vec<ResultCode>),
    Script(Arc<dyn CompiledScript>),
}

impl fmt::Debug for PasswordPolicyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordPolicyStrategy::Default => f.write_str("Default"),
            PasswordPolicyStrategy::RejectResultCode(codes) => {
                f.debug_tuple("RejectResultCode").field(codes).finish()
            }
            PasswordPolicyStrategy::Script(_) => f.write_str("Script"),
        }
    }
}

impl PasswordPolicyStrategy {
    pub fn from_properties(
        props: &LdapPasswordPolicyProperties,
        script_cache: Option<&dyn ScriptCache>,
    ) -> DirectoryResult<Self> {
        match props.strategy {
            PasswordPolicyHandlingOption::Default => Ok(PasswordPolicyStrategy::Default),
            PasswordPolicyHandlingOption::RejectResultCode => {
                let codes = props
                    .rejected_result_codes
                    .iter()
                    .map(|c| c.parse::<ResultCode>())
                    .collect::<Result<Vec<_>, _>>()?;
                debug!("Rejecting authentication results {:?} as policy failures", codes);
                Ok(PasswordPolicyStrategy::RejectResultCode(codes))
            }
            PasswordPolicyHandlingOption::Script => {
                let location = props
                    .script_location
                    .as_deref()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .ok_or_else(|| {
                        DirectoryError::configuration("The SCRIPT password policy strategy needs a script location")
                    })?;
                Ok(PasswordPolicyStrategy::Script(resolve_script(script_cache, location)?))
            }
        }
    }

    /// Warnings for the response, or the failure that blocks it.
    ///
    /// `ctx` is `None` when password policy is disabled; only scripts run then.
    pub fn apply(
        &self,
        response: &AuthenticationResponse,
        ctx: Option<&PasswordPolicyContext>,
    ) -> Result<Vec<MessageDescriptor>, AuthenticationFailure> {
        match self {
            PasswordPolicyStrategy::Script(script) => {
                let default_ctx;
                let ctx = match ctx {
                    Some(ctx) => ctx,
                    None => {
                        default_ctx = PasswordPolicyContext::default();
                        &default_ctx
                    }
                };
                Ok(script.handle_policy(response, ctx)?)
            }
            PasswordPolicyStrategy::RejectResultCode(codes) if codes.contains(&response.result.code) => {
                warn!(
                    "Authentication result {} for {} is rejected by password policy",
                    response.result.code, response.user
                );
                Err(AuthenticationFailure::PolicyRejected {
                    result_code: response.result.code,
                    message: response.result.message.clone(),
                })
            }
            _ => match ctx {
                Some(ctx) => ctx.account_state_handler.handle(response, ctx),
                None => Ok(Vec::new()),
            },
        }
    }
}
