//! Shared directory types

mod entry;
mod policy;
mod result_code;

pub use entry::{LdapAttribute, LdapEntry};
pub use policy::PolicyViolationKind;
pub use result_code::ResultCode;
