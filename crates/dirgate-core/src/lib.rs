//! Dirgate Core Library
//!
//! Configuration model and shared directory types for the Dirgate
//! directory authentication engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::{LdapAuthenticationProperties, LdapPasswordPolicyProperties, LdapProperties};
pub use error::{Error, Result};

/// Dirgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default parameter name used in search filters (`{user}`)
pub const SEARCH_FILTER_DEFAULT_PARAM_NAME: &str = "user";

/// Delimiter separating multiple base DNs of the same directory
pub const BASE_DN_DELIMITER: char = '|';

/// The objectClass attribute
pub const OBJECT_CLASS_ATTRIBUTE: &str = "objectClass";
