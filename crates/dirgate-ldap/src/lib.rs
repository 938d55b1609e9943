//! Directory authentication for Dirgate
//!
//! Connection factories and pools, DN and entry resolution, bind or compare
//! verification, password policy handling and the directory mutation helpers.

pub mod authenticator;
pub mod client;
pub mod connection;
pub mod error;
pub mod factory;
pub mod filter;
pub mod handler;
pub mod handlers;
pub mod operations;
pub mod policy;
pub mod pool;
pub mod principal;
pub mod resolver;
pub mod script;

#[cfg(test)]
mod mock;

pub use authenticator::{
    new_authenticator, AuthenticationRequest, AuthenticationResponse, Authenticator, DnStrategy, VerifyMode,
};
pub use client::{Connector, DirectoryConnection, Ldap3Connector, OperationResult, SearchRequest, SearchResponse};
pub use connection::{new_connection_descriptor, ConnectionDescriptor};
pub use error::{AuthenticationFailure, DirectoryError, DirectoryResult};
pub use factory::{new_connection_factory, ConnectionFactory, DefaultConnectionFactory, ManagedConnection};
pub use filter::{new_search_filter, new_user_filter, SearchFilter};
pub use handler::{
    create_ldap_authentication_handler, AuthenticationHandlerExecutionResult, HandlerCollaborators,
    LdapAuthenticationHandler, UsernamePasswordCredential,
};
pub use operations::{
    execute_add_operation, execute_delete_operation, execute_modify_operation, execute_password_modify_operation,
    execute_search_operation, get_boolean, get_long, get_string,
};
pub use policy::{MessageDescriptor, PasswordPolicyConfiguration, PasswordPolicyStrategy};
pub use pool::PooledConnectionFactory;
pub use principal::{DefaultPrincipalFactory, PasswordEncoder, Principal, PrincipalFactory};
pub use resolver::{new_search_dn_resolver, new_search_entry_resolver, FormatDnResolver};
pub use script::{CompiledScript, InMemoryScriptCache, ScriptCache};
