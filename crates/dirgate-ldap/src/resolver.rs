//! DN and entry resolution
//!
//! A directory target may list several base DNs separated by `|`. Each
//! segment gets its own resolver and a chaining resolver tries them in
//! order, so the first segment that yields a result wins.

use async_trait::async_trait;
use dirgate_core::config::{DerefAliases, SearchScope};
use dirgate_core::types::LdapEntry;
use dirgate_core::{LdapAuthenticationProperties, SEARCH_FILTER_DEFAULT_PARAM_NAME};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::client::{SearchRequest, SearchResponse, NO_ATTRIBUTES};
use crate::error::{DirectoryError, DirectoryResult};
use crate::factory::ConnectionFactory;
use crate::filter::new_search_filter;
use crate::handlers::SearchHandlers;
use crate::script::ScriptCache;

/// Placeholder name for the resolved DN in entry resolver filters
pub const DN_PARAM_NAME: &str = "dn";

/// Maps a user name to a DN. `Ok(None)` means the user was not found.
#[async_trait]
pub trait DnResolver: Send + Sync {
    async fn resolve(&self, user: &str) -> DirectoryResult<Option<String>>;
}

/// What an entry resolver needs to know about the authenticated user
#[derive(Debug, Clone, Default)]
pub struct EntryCriteria {
    pub user: String,
    pub dn: String,
    pub return_attributes: Vec<String>,
}

#[async_trait]
pub trait EntryResolver: Send + Sync {
    async fn resolve(&self, criteria: &EntryCriteria) -> DirectoryResult<Option<LdapEntry>>;
}

// ============================================================================
// DN escaping and templates
// ============================================================================

/// Escape an attribute value for use inside a DN (RFC 4514)
pub fn escape_dn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 4);
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            '"' | '+' | ',' | ';' | '<' | '>' | '\\' | '=' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '#' if i == 0 => escaped.push_str("\\#"),
            ' ' if i == 0 || i == last => escaped.push_str("\\ "),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Builds the DN directly from a template such as `uid=%s,ou=people,dc=example,dc=com`
#[derive(Debug, Clone)]
pub struct FormatDnResolver {
    format: String,
}

impl FormatDnResolver {
    pub fn new(format: impl Into<String>) -> DirectoryResult<Self> {
        let format = format.into();
        if format.trim().is_empty() {
            return Err(DirectoryError::configuration("DN format cannot be blank"));
        }
        Ok(Self { format })
    }

    pub fn format_dn(&self, user: &str) -> String {
        let value = escape_dn_value(user);
        let placeholder = format!("{{{}}}", SEARCH_FILTER_DEFAULT_PARAM_NAME);
        self.format.replace("%s", &value).replace(&placeholder, &value)
    }
}

#[async_trait]
impl DnResolver for FormatDnResolver {
    async fn resolve(&self, user: &str) -> DirectoryResult<Option<String>> {
        Ok(Some(self.format_dn(user)))
    }
}

// ============================================================================
// Search-backed resolvers
// ============================================================================

/// Search settings shared by every resolver of one directory target
#[derive(Clone)]
pub struct SearchSettings {
    pub base_dn: String,
    pub filter: String,
    pub subtree: bool,
    pub allow_multiple: bool,
    pub deref_aliases: DerefAliases,
    pub binary_attributes: Vec<String>,
    pub handlers: SearchHandlers,
    pub script_cache: Option<Arc<dyn ScriptCache>>,
}

impl SearchSettings {
    /// Settings for one base DN segment
    pub fn from_properties(
        props: &LdapAuthenticationProperties,
        base_dn: &str,
        allow_multiple: bool,
        script_cache: Option<Arc<dyn ScriptCache>>,
    ) -> DirectoryResult<Self> {
        let deref_aliases = match props.deref_aliases.as_deref() {
            Some(value) if !value.trim().is_empty() => value.parse::<DerefAliases>()?,
            _ => DerefAliases::Never,
        };
        let handlers = SearchHandlers::new(&props.search_entry_handlers, props.follow_referrals);

        let mut binary_attributes = props.binary_attributes.clone();
        for name in handlers.binary_attributes() {
            if !binary_attributes.iter().any(|b| b.eq_ignore_ascii_case(&name)) {
                binary_attributes.push(name);
            }
        }

        Ok(Self {
            base_dn: base_dn.to_string(),
            filter: props.search_filter.clone().unwrap_or_default(),
            subtree: props.subtree_search,
            allow_multiple,
            deref_aliases,
            binary_attributes,
            handlers,
            script_cache,
        })
    }

    fn scope(&self) -> SearchScope {
        if self.subtree {
            SearchScope::Subtree
        } else {
            SearchScope::OneLevel
        }
    }

    async fn search(
        &self,
        factory: &dyn ConnectionFactory,
        names: &[&str],
        values: &[String],
        attributes: Vec<String>,
    ) -> DirectoryResult<SearchResponse> {
        let filter = new_search_filter(&self.filter, names, values, self.script_cache.as_deref())?;
        let request = SearchRequest::new(self.base_dn.clone(), filter.format())
            .with_scope(self.scope())
            .with_attributes(attributes)
            .with_binary_attributes(self.binary_attributes.clone())
            .with_deref_aliases(self.deref_aliases);

        let mut connection = factory.get_connection().await?;
        let result = connection.search(&request).await;
        let mut response = connection.check(result)?;

        if !response.is_success() {
            if let Some(result) = response.result {
                return Err(DirectoryError::operation("search", result.code, result.message));
            }
        }

        let handled = self
            .handlers
            .apply(&mut *connection, factory, &request, &mut response)
            .await;
        connection.check(handled)?;
        Ok(response)
    }

    fn single(&self, response: SearchResponse, user: &str) -> DirectoryResult<Option<LdapEntry>> {
        let mut entries = response.entries;
        if entries.len() > 1 && !self.allow_multiple {
            return Err(DirectoryError::MultipleEntries(format!(
                "Found {} entries for {} under {}",
                entries.len(),
                user,
                self.base_dn
            )));
        }
        if entries.len() > 1 {
            debug!("Found {} entries for {}; using the first", entries.len(), user);
        }
        Ok((!entries.is_empty()).then(|| entries.swap_remove(0)))
    }
}

/// Finds the DN by searching one base DN with the user filter
pub struct SearchDnResolver {
    factory: Arc<dyn ConnectionFactory>,
    settings: SearchSettings,
    resolve_from_attribute: Option<String>,
}

impl SearchDnResolver {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        settings: SearchSettings,
        resolve_from_attribute: Option<String>,
    ) -> Self {
        Self {
            factory,
            settings,
            resolve_from_attribute: resolve_from_attribute.filter(|a| !a.trim().is_empty()),
        }
    }
}

#[async_trait]
impl DnResolver for SearchDnResolver {
    async fn resolve(&self, user: &str) -> DirectoryResult<Option<String>> {
        let attributes = match &self.resolve_from_attribute {
            Some(attribute) => vec![attribute.clone()],
            None => vec![NO_ATTRIBUTES.to_string()],
        };

        let response = self
            .settings
            .search(
                self.factory.as_ref(),
                &[SEARCH_FILTER_DEFAULT_PARAM_NAME],
                &[user.to_string()],
                attributes,
            )
            .await?;

        let Some(entry) = self.settings.single(response, user)? else {
            trace!("No DN found for {} under {}", user, self.settings.base_dn);
            return Ok(None);
        };

        match &self.resolve_from_attribute {
            Some(attribute) => {
                let dn = entry
                    .attribute(attribute)
                    .and_then(|a| a.string_value())
                    .map(|v| v.into_owned());
                if dn.is_none() {
                    warn!("Entry {} has no value for {}", entry.dn, attribute);
                }
                Ok(dn)
            }
            None => Ok(Some(entry.dn)),
        }
    }
}

/// Tries each resolver in order; the first DN found wins
pub struct ChainingDnResolver {
    resolvers: Vec<Box<dyn DnResolver>>,
}

impl ChainingDnResolver {
    pub fn new(resolvers: Vec<Box<dyn DnResolver>>) -> Self {
        Self { resolvers }
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Resolve a DN, failing with [`DirectoryError::AccountNotFound`] when no resolver finds one
    pub async fn resolve_dn(&self, user: &str) -> DirectoryResult<String> {
        match self.resolve(user).await? {
            Some(dn) => Ok(dn),
            None => Err(DirectoryError::AccountNotFound(user.to_string())),
        }
    }
}

#[async_trait]
impl DnResolver for ChainingDnResolver {
    async fn resolve(&self, user: &str) -> DirectoryResult<Option<String>> {
        for (i, resolver) in self.resolvers.iter().enumerate() {
            match resolver.resolve(user).await {
                Ok(Some(dn)) if !dn.is_empty() => {
                    debug!("Resolved {} to {} using resolver {}", user, dn, i);
                    return Ok(Some(dn));
                }
                Ok(_) => trace!("Resolver {} found no DN for {}", i, user),
                Err(e) => warn!("Resolver {} failed to resolve {}: {}", i, user, e),
            }
        }
        Ok(None)
    }
}

/// Reads the full entry by searching one base DN with `{user}` / `{dn}` parameters
pub struct SearchEntryResolver {
    factory: Arc<dyn ConnectionFactory>,
    settings: SearchSettings,
}

impl SearchEntryResolver {
    pub fn new(factory: Arc<dyn ConnectionFactory>, settings: SearchSettings) -> Self {
        Self { factory, settings }
    }
}

#[async_trait]
impl EntryResolver for SearchEntryResolver {
    async fn resolve(&self, criteria: &EntryCriteria) -> DirectoryResult<Option<LdapEntry>> {
        let response = self
            .settings
            .search(
                self.factory.as_ref(),
                &[SEARCH_FILTER_DEFAULT_PARAM_NAME, DN_PARAM_NAME],
                &[criteria.user.clone(), criteria.dn.clone()],
                criteria.return_attributes.clone(),
            )
            .await?;
        self.settings.single(response, &criteria.user)
    }
}

pub struct ChainingEntryResolver {
    resolvers: Vec<Box<dyn EntryResolver>>,
}

impl ChainingEntryResolver {
    pub fn new(resolvers: Vec<Box<dyn EntryResolver>>) -> Self {
        Self { resolvers }
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

#[async_trait]
impl EntryResolver for ChainingEntryResolver {
    async fn resolve(&self, criteria: &EntryCriteria) -> DirectoryResult<Option<LdapEntry>> {
        for (i, resolver) in self.resolvers.iter().enumerate() {
            match resolver.resolve(criteria).await {
                Ok(Some(entry)) => {
                    debug!("Resolved entry {} using resolver {}", entry.dn, i);
                    return Ok(Some(entry));
                }
                Ok(None) => trace!("Resolver {} found no entry for {}", i, criteria.user),
                Err(e) => warn!("Entry resolver {} failed for {}: {}", i, criteria.user, e),
            }
        }
        Ok(None)
    }
}

/// One search DN resolver per base DN segment, chained
pub fn new_search_dn_resolver(
    props: &LdapAuthenticationProperties,
    factory: Arc<dyn ConnectionFactory>,
    script_cache: Option<Arc<dyn ScriptCache>>,
) -> DirectoryResult<ChainingDnResolver> {
    let mut resolvers: Vec<Box<dyn DnResolver>> = Vec::new();
    for base_dn in props.base_dns() {
        let settings = SearchSettings::from_properties(
            props,
            &base_dn,
            props.allow_multiple_dns,
            script_cache.clone(),
        )?;
        resolvers.push(Box::new(SearchDnResolver::new(
            factory.clone(),
            settings,
            props.resolve_from_attribute.clone(),
        )));
    }
    if resolvers.is_empty() {
        return Err(DirectoryError::configuration("Base DN cannot be blank"));
    }
    debug!("Created {} search DN resolver(s)", resolvers.len());
    Ok(ChainingDnResolver::new(resolvers))
}

/// One search entry resolver per base DN segment, chained
pub fn new_search_entry_resolver(
    props: &LdapAuthenticationProperties,
    factory: Arc<dyn ConnectionFactory>,
    script_cache: Option<Arc<dyn ScriptCache>>,
) -> DirectoryResult<ChainingEntryResolver> {
    let mut resolvers: Vec<Box<dyn EntryResolver>> = Vec::new();
    for base_dn in props.base_dns() {
        let settings = SearchSettings::from_properties(
            props,
            &base_dn,
            props.allow_multiple_entries,
            script_cache.clone(),
        )?;
        resolvers.push(Box::new(SearchEntryResolver::new(factory.clone(), settings)));
    }
    if resolvers.is_empty() {
        return Err(DirectoryError::configuration("Base DN cannot be blank"));
    }
    Ok(ChainingEntryResolver::new(resolvers))
}
