//! Directory client seam
//!
//! The engine talks to directories through [`Connector`] and
//! [`DirectoryConnection`]. The default implementation is backed by
//! `ldap3`; tests substitute an in-memory directory.

mod connector;

pub use connector::Ldap3Connector;

use async_trait::async_trait;
use dirgate_core::config::{DerefAliases, SearchScope};
use dirgate_core::types::{LdapEntry, ResultCode};

use crate::connection::{ConnectionDescriptor, SaslConfig};
use crate::error::DirectoryResult;

/// Requests only the entry DN (RFC 4511 "1.1")
pub const NO_ATTRIBUTES: &str = "1.1";

/// Request control sent alongside an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestControl {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Vec<u8>>,
}

/// Control returned by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseControl {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Vec<u8>>,
}

/// Result of a single directory operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub code: ResultCode,
    /// Diagnostic message supplied by the server
    pub message: String,
    pub matched_dn: String,
    pub referrals: Vec<String>,
    pub controls: Vec<ResponseControl>,
}

impl OperationResult {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            matched_dn: String::new(),
            referrals: Vec::new(),
            controls: Vec::new(),
        }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::Success, "")
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    pub fn control(&self, oid: &str) -> Option<&ResponseControl> {
        self.controls.iter().find(|c| c.oid == oid)
    }
}

#[derive(Debug, Clone)]
pub struct BindRequest {
    pub dn: String,
    pub credential: String,
    pub controls: Vec<RequestControl>,
}

impl BindRequest {
    pub fn new(dn: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            credential: credential.into(),
            controls: Vec::new(),
        }
    }
}

/// Simple paged results (RFC 2696) request state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub size: i32,
    pub cookie: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: SearchScope,
    pub filter: String,
    pub attributes: Vec<String>,
    pub binary_attributes: Vec<String>,
    pub deref_aliases: DerefAliases,
    /// 0 means unlimited
    pub size_limit: i32,
    pub page: Option<PageRequest>,
    pub controls: Vec<RequestControl>,
}

impl SearchRequest {
    pub fn new(base_dn: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope: SearchScope::Subtree,
            filter: filter.into(),
            attributes: Vec::new(),
            binary_attributes: Vec::new(),
            deref_aliases: DerefAliases::Never,
            size_limit: 0,
            page: None,
            controls: Vec::new(),
        }
    }

    /// Read a single entry by DN
    pub fn read(dn: impl Into<String>, attributes: Vec<String>) -> Self {
        Self {
            scope: SearchScope::Object,
            attributes,
            ..Self::new(dn, "(objectClass=*)")
        }
    }

    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_binary_attributes(mut self, binary_attributes: Vec<String>) -> Self {
        self.binary_attributes = binary_attributes;
        self
    }

    pub fn with_size_limit(mut self, size_limit: i32) -> Self {
        self.size_limit = size_limit;
        self
    }

    pub fn with_deref_aliases(mut self, deref_aliases: DerefAliases) -> Self {
        self.deref_aliases = deref_aliases;
        self
    }

    pub fn is_binary(&self, attribute: &str) -> bool {
        self.binary_attributes
            .iter()
            .any(|a| a.eq_ignore_ascii_case(attribute))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub entries: Vec<LdapEntry>,
    /// Continuation references returned with the result
    pub references: Vec<String>,
    pub result: Option<OperationResult>,
    /// Paged results cookie; empty or absent when the server is done
    pub page_cookie: Option<Vec<u8>>,
}

impl SearchResponse {
    pub fn is_success(&self) -> bool {
        self.result.as_ref().map(|r| r.is_success()).unwrap_or(true)
    }

    pub fn entry(&self) -> Option<&LdapEntry> {
        self.entries.first()
    }

    /// Merge another response, keeping entries in arrival order
    pub fn extend(&mut self, other: SearchResponse) {
        self.entries.extend(other.entries);
        self.references.extend(other.references);
        if other.result.is_some() {
            self.result = other.result;
        }
        self.page_cookie = other.page_cookie;
    }
}

#[derive(Debug, Clone)]
pub struct CompareRequest {
    pub dn: String,
    pub attribute: String,
    pub value: Vec<u8>,
}

impl CompareRequest {
    pub fn new(dn: impl Into<String>, attribute: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            dn: dn.into(),
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationType {
    Add,
    Delete,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeModification {
    pub operation: ModificationType,
    pub attribute: String,
    pub values: Vec<Vec<u8>>,
}

impl AttributeModification {
    pub fn new(operation: ModificationType, attribute: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            operation,
            attribute: attribute.into(),
            values,
        }
    }
}

/// RFC 3062 password modify extended request
#[derive(Debug, Clone)]
pub struct PasswordModifyRequest {
    pub user_id: String,
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

/// A live connection to one directory server
#[async_trait]
pub trait DirectoryConnection: Send {
    /// URL this connection was opened against
    fn url(&self) -> &str;

    async fn bind(&mut self, request: &BindRequest) -> DirectoryResult<OperationResult>;

    async fn sasl_bind(&mut self, config: &SaslConfig) -> DirectoryResult<OperationResult>;

    /// Active Directory fast concurrent bind (LDAP_SERVER_FAST_BIND_OID)
    async fn fast_bind(&mut self) -> DirectoryResult<OperationResult>;

    async fn search(&mut self, request: &SearchRequest) -> DirectoryResult<SearchResponse>;

    async fn compare(&mut self, request: &CompareRequest) -> DirectoryResult<OperationResult>;

    async fn add(&mut self, entry: &LdapEntry) -> DirectoryResult<OperationResult>;

    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[AttributeModification],
    ) -> DirectoryResult<OperationResult>;

    async fn delete(&mut self, dn: &str) -> DirectoryResult<OperationResult>;

    async fn password_modify(
        &mut self,
        request: &PasswordModifyRequest,
    ) -> DirectoryResult<OperationResult>;

    async fn close(&mut self) -> DirectoryResult<()>;
}

/// Opens connections to a single URL using the descriptor's transport settings
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        descriptor: &ConnectionDescriptor,
    ) -> DirectoryResult<Box<dyn DirectoryConnection>>;
}
