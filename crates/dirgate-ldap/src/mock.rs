//! In-memory directory for tests
//!
//! Implements [`Connector`] over a shared entry list and records every
//! operation so tests can assert ordering and counts.

use async_trait::async_trait;
use dirgate_core::config::SearchScope;
use dirgate_core::types::{LdapAttribute, LdapEntry, ResultCode};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::client::{
    AttributeModification, BindRequest, CompareRequest, Connector, DirectoryConnection,
    ModificationType, OperationResult, PasswordModifyRequest, SearchRequest, SearchResponse,
    NO_ATTRIBUTES,
};
use crate::connection::{ConnectionDescriptor, SaslConfig};
use crate::error::{DirectoryError, DirectoryResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operation {
    Connect { url: String },
    Bind { dn: String, control_oids: Vec<String> },
    SaslBind,
    FastBind,
    Search { base_dn: String, filter: String, paged: bool },
    Compare { dn: String, attribute: String },
    Add { dn: String },
    Modify { dn: String, modifications: Vec<AttributeModification> },
    Delete { dn: String },
    PasswordModify { user_id: String, old_password: Option<String>, new_password: Option<String> },
    Close,
}

#[derive(Default)]
struct State {
    entries: Vec<LdapEntry>,
    passwords: HashMap<String, String>,
    unreachable: HashSet<String>,
    failing_bases: HashSet<String>,
    bind_results: HashMap<String, OperationResult>,
    results: HashMap<&'static str, OperationResult>,
    referrals: HashMap<String, Vec<String>>,
    search_delay: Option<std::time::Duration>,
    operations: Vec<Operation>,
}

#[derive(Clone, Default)]
pub(crate) struct MockDirectory {
    state: Arc<Mutex<State>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            directory: self.clone(),
        })
    }

    /// Register a bind password for a DN
    pub fn add_user(&self, dn: &str, password: &str) {
        self.state
            .lock()
            .passwords
            .insert(dn.to_lowercase(), password.to_string());
    }

    pub fn add_entry(&self, entry: LdapEntry) {
        self.state.lock().entries.push(entry);
    }

    /// Every search sleeps this long before answering
    pub fn set_search_delay(&self, delay: std::time::Duration) {
        self.state.lock().search_delay = Some(delay);
    }

    pub fn entry(&self, dn: &str) -> Option<LdapEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| e.dn.eq_ignore_ascii_case(dn))
            .cloned()
    }

    pub fn set_unreachable(&self, url: &str) {
        self.state.lock().unreachable.insert(url.to_string());
    }

    /// Searches under this base fail with a connection error
    pub fn fail_searches_under(&self, base_dn: &str) {
        self.state.lock().failing_bases.insert(base_dn.to_lowercase());
    }

    /// Fixed result for binds as this DN
    pub fn set_bind_result(&self, dn: &str, result: OperationResult) {
        self.state.lock().bind_results.insert(dn.to_lowercase(), result);
    }

    /// Fixed result for an operation kind (`add`, `modify`, `delete`, `password_modify`)
    pub fn set_result(&self, operation: &'static str, result: OperationResult) {
        self.state.lock().results.insert(operation, result);
    }

    /// Continuation references returned by searches under this base
    pub fn set_referrals(&self, base_dn: &str, urls: Vec<String>) {
        self.state.lock().referrals.insert(base_dn.to_lowercase(), urls);
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().operations.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.count(|op| matches!(op, Operation::Connect { .. }))
    }

    pub fn search_count(&self) -> usize {
        self.count(|op| matches!(op, Operation::Search { .. }))
    }

    pub fn bind_dns(&self) -> Vec<String> {
        self.state
            .lock()
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Bind { dn, .. } => Some(dn.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&Operation) -> bool) -> usize {
        self.state.lock().operations.iter().filter(|op| predicate(op)).count()
    }

    fn record(&self, operation: Operation) {
        self.state.lock().operations.push(operation);
    }
}

struct MockConnector {
    directory: MockDirectory,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        url: &str,
        _descriptor: &ConnectionDescriptor,
    ) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        self.directory.record(Operation::Connect { url: url.to_string() });
        if self.directory.state.lock().unreachable.contains(url) {
            return Err(DirectoryError::connection(format!("{} is unreachable", url)));
        }
        Ok(Box::new(MockConnection {
            directory: self.directory.clone(),
            url: url.to_string(),
        }))
    }
}

struct MockConnection {
    directory: MockDirectory,
    url: String,
}

impl MockConnection {
    fn fixed_result(&self, operation: &'static str) -> Option<OperationResult> {
        self.directory.state.lock().results.get(operation).cloned()
    }
}

#[async_trait]
impl DirectoryConnection for MockConnection {
    fn url(&self) -> &str {
        &self.url
    }

    async fn bind(&mut self, request: &BindRequest) -> DirectoryResult<OperationResult> {
        self.directory.record(Operation::Bind {
            dn: request.dn.clone(),
            control_oids: request.controls.iter().map(|c| c.oid.clone()).collect(),
        });

        let state = self.directory.state.lock();
        let key = request.dn.to_lowercase();
        if let Some(result) = state.bind_results.get(&key) {
            return Ok(result.clone());
        }
        if request.dn.is_empty() && request.credential.is_empty() {
            return Ok(OperationResult::success());
        }
        match state.passwords.get(&key) {
            Some(password) if !password.is_empty() && *password == request.credential => {
                Ok(OperationResult::success())
            }
            _ => Ok(OperationResult::new(ResultCode::InvalidCredentials, "Invalid credentials")),
        }
    }

    async fn sasl_bind(&mut self, _config: &SaslConfig) -> DirectoryResult<OperationResult> {
        self.directory.record(Operation::SaslBind);
        Ok(OperationResult::success())
    }

    async fn fast_bind(&mut self) -> DirectoryResult<OperationResult> {
        self.directory.record(Operation::FastBind);
        Ok(OperationResult::success())
    }

    async fn search(&mut self, request: &SearchRequest) -> DirectoryResult<SearchResponse> {
        self.directory.record(Operation::Search {
            base_dn: request.base_dn.clone(),
            filter: request.filter.clone(),
            paged: request.page.is_some(),
        });

        let delay = self.directory.state.lock().search_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.directory.state.lock();
        let base = request.base_dn.to_lowercase();
        if state.failing_bases.contains(&base) {
            return Err(DirectoryError::connection(format!("search under {} failed", request.base_dn)));
        }

        let filter = parse_filter(&request.filter)
            .ok_or_else(|| DirectoryError::operation("search", ResultCode::ProtocolError, "bad filter"))?;

        let mut matches: Vec<LdapEntry> = state
            .entries
            .iter()
            .filter(|e| in_scope(&e.dn, &request.base_dn, request.scope) && filter.matches(e))
            .map(|e| select_attributes(e, &request.attributes))
            .collect();

        if request.size_limit > 0 {
            matches.truncate(request.size_limit as usize);
        }

        let mut response = SearchResponse {
            references: state.referrals.get(&base).cloned().unwrap_or_default(),
            result: Some(OperationResult::success()),
            ..Default::default()
        };

        match &request.page {
            Some(page) => {
                let offset: usize = std::str::from_utf8(&page.cookie)
                    .ok()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
                let end = (offset + page.size.max(1) as usize).min(matches.len());
                response.entries = matches[offset.min(end)..end].to_vec();
                response.page_cookie = Some(if end < matches.len() {
                    end.to_string().into_bytes()
                } else {
                    Vec::new()
                });
            }
            None => response.entries = matches,
        }
        Ok(response)
    }

    async fn compare(&mut self, request: &CompareRequest) -> DirectoryResult<OperationResult> {
        self.directory.record(Operation::Compare {
            dn: request.dn.clone(),
            attribute: request.attribute.clone(),
        });

        let state = self.directory.state.lock();
        let Some(entry) = state.entries.iter().find(|e| e.dn.eq_ignore_ascii_case(&request.dn)) else {
            return Ok(OperationResult::new(ResultCode::NoSuchObject, "No such object"));
        };
        let matched = entry
            .attribute(&request.attribute)
            .map(|a| a.values.iter().any(|v| *v == request.value))
            .unwrap_or(false);
        Ok(OperationResult::new(
            if matched { ResultCode::CompareTrue } else { ResultCode::CompareFalse },
            "",
        ))
    }

    async fn add(&mut self, entry: &LdapEntry) -> DirectoryResult<OperationResult> {
        self.directory.record(Operation::Add { dn: entry.dn.clone() });
        if let Some(result) = self.fixed_result("add") {
            return Ok(result);
        }

        let mut state = self.directory.state.lock();
        if state.entries.iter().any(|e| e.dn.eq_ignore_ascii_case(&entry.dn)) {
            return Ok(OperationResult::new(ResultCode::EntryAlreadyExists, "Entry already exists"));
        }
        state.entries.push(entry.clone());
        Ok(OperationResult::success())
    }

    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[AttributeModification],
    ) -> DirectoryResult<OperationResult> {
        self.directory.record(Operation::Modify {
            dn: dn.to_string(),
            modifications: modifications.to_vec(),
        });
        if let Some(result) = self.fixed_result("modify") {
            return Ok(result);
        }

        let mut state = self.directory.state.lock();
        let Some(entry) = state.entries.iter_mut().find(|e| e.dn.eq_ignore_ascii_case(dn)) else {
            return Ok(OperationResult::new(ResultCode::NoSuchObject, "No such object"));
        };

        for m in modifications {
            match m.operation {
                ModificationType::Add => {
                    entry.add_attribute(LdapAttribute {
                        name: m.attribute.clone(),
                        values: m.values.clone(),
                        binary: false,
                    });
                }
                ModificationType::Delete => {
                    if m.values.is_empty() {
                        entry.remove_attribute(&m.attribute);
                    } else if let Some(attribute) = entry.attribute_mut(&m.attribute) {
                        attribute.values.retain(|v| !m.values.contains(v));
                    }
                }
                ModificationType::Replace => {
                    entry.put_attribute(LdapAttribute {
                        name: m.attribute.clone(),
                        values: m.values.clone(),
                        binary: false,
                    });
                }
            }
        }
        Ok(OperationResult::success())
    }

    async fn delete(&mut self, dn: &str) -> DirectoryResult<OperationResult> {
        self.directory.record(Operation::Delete { dn: dn.to_string() });
        if let Some(result) = self.fixed_result("delete") {
            return Ok(result);
        }

        let mut state = self.directory.state.lock();
        let before = state.entries.len();
        state.entries.retain(|e| !e.dn.eq_ignore_ascii_case(dn));
        if state.entries.len() == before {
            return Ok(OperationResult::new(ResultCode::NoSuchObject, "No such object"));
        }
        Ok(OperationResult::success())
    }

    async fn password_modify(
        &mut self,
        request: &PasswordModifyRequest,
    ) -> DirectoryResult<OperationResult> {
        self.directory.record(Operation::PasswordModify {
            user_id: request.user_id.clone(),
            old_password: request.old_password.clone(),
            new_password: request.new_password.clone(),
        });
        if let Some(result) = self.fixed_result("password_modify") {
            return Ok(result);
        }

        let mut state = self.directory.state.lock();
        let key = request.user_id.to_lowercase();
        let Some(current) = state.passwords.get(&key).cloned() else {
            return Ok(OperationResult::new(ResultCode::NoSuchObject, "No such object"));
        };
        if let Some(old) = &request.old_password {
            if *old != current {
                return Ok(OperationResult::new(ResultCode::InvalidCredentials, "Invalid old password"));
            }
        }
        if let Some(new) = &request.new_password {
            state.passwords.insert(key, new.clone());
        }
        Ok(OperationResult::success())
    }

    async fn close(&mut self) -> DirectoryResult<()> {
        self.directory.record(Operation::Close);
        Ok(())
    }
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    let dn = dn.to_lowercase();
    let base = base.to_lowercase();
    match scope {
        SearchScope::Object => dn == base,
        SearchScope::OneLevel => parent(&dn) == base,
        SearchScope::Subtree => base.is_empty() || dn == base || dn.ends_with(&format!(",{}", base)),
    }
}

fn parent(dn: &str) -> &str {
    dn.split_once(',').map(|(_, rest)| rest).unwrap_or("")
}

fn select_attributes(entry: &LdapEntry, requested: &[String]) -> LdapEntry {
    if requested.is_empty() || requested.iter().any(|a| a == "*") {
        return entry.clone();
    }
    let mut selected = LdapEntry::new(entry.dn.clone());
    for name in requested.iter().filter(|a| a.as_str() != NO_ATTRIBUTES) {
        if let Some(attribute) = entry.attribute(name) {
            selected.add_attribute(attribute.clone());
        }
    }
    selected
}

enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equals(String, String),
    Wildcard(String, Vec<String>),
}

impl Filter {
    fn matches(&self, entry: &LdapEntry) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Filter::Not(filter) => !filter.matches(entry),
            Filter::Present(name) => {
                name.eq_ignore_ascii_case("objectClass") || entry.attribute(name).is_some()
            }
            Filter::Equals(name, value) => entry
                .attribute(name)
                .map(|a| a.string_values().iter().any(|v| v.eq_ignore_ascii_case(value)))
                .unwrap_or(false),
            Filter::Wildcard(name, parts) => entry
                .attribute(name)
                .map(|a| a.string_values().iter().any(|v| wildcard_match(v, parts)))
                .unwrap_or(false),
        }
    }
}

fn wildcard_match(value: &str, parts: &[String]) -> bool {
    let value = value.to_lowercase();
    let mut rest = value.as_str();
    for (i, part) in parts.iter().enumerate() {
        let part = part.to_lowercase();
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !rest.starts_with(&part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            return rest.ends_with(&part);
        } else {
            match rest.find(&part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

fn parse_filter(filter: &str) -> Option<Filter> {
    let (parsed, rest) = parse_component(filter.trim())?;
    rest.is_empty().then_some(parsed)
}

fn parse_component(input: &str) -> Option<(Filter, &str)> {
    let input = input.strip_prefix('(')?;
    match input.chars().next()? {
        '&' | '|' => {
            let and = input.starts_with('&');
            let mut rest = &input[1..];
            let mut filters = Vec::new();
            while !rest.starts_with(')') {
                let (filter, next) = parse_component(rest)?;
                filters.push(filter);
                rest = next;
            }
            let composite = if and { Filter::And(filters) } else { Filter::Or(filters) };
            Some((composite, &rest[1..]))
        }
        '!' => {
            let (filter, rest) = parse_component(&input[1..])?;
            Some((Filter::Not(Box::new(filter)), rest.strip_prefix(')')?))
        }
        _ => {
            let end = input.find(')')?;
            let (name, value) = input[..end].split_once('=')?;
            let filter = if value == "*" {
                Filter::Present(name.to_string())
            } else if value.contains('*') {
                Filter::Wildcard(name.to_string(), value.split('*').map(unescape).collect())
            } else {
                Filter::Equals(name.to_string(), unescape(value))
            };
            Some((filter, &input[end + 1..]))
        }
    }
}

fn unescape(value: &str) -> String {
    let mut bytes = Vec::with_capacity(value.len());
    let raw = value.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && i + 2 < raw.len() {
            if let Ok(b) = std::str::from_utf8(&raw[i + 1..i + 3])
                .map_err(|_| ())
                .and_then(|hex| u8::from_str_radix(hex, 16).map_err(|_| ()))
            {
                bytes.push(b);
                i += 3;
                continue;
            }
        }
        bytes.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(dn: &str, uid: &str) -> LdapEntry {
        LdapEntry::new(dn)
            .with_attribute(LdapAttribute::new("uid", [uid]))
            .with_attribute(LdapAttribute::new("objectClass", ["person"]))
    }

    #[test]
    fn test_filter_evaluation() {
        let entry = person("uid=jdoe,ou=people,dc=x", "jdoe");
        assert!(parse_filter("(uid=jdoe)").unwrap().matches(&entry));
        assert!(parse_filter("(&(objectClass=person)(uid=JDOE))").unwrap().matches(&entry));
        assert!(parse_filter("(|(uid=nobody)(uid=j*e))").unwrap().matches(&entry));
        assert!(!parse_filter("(!(uid=jdoe))").unwrap().matches(&entry));
        assert!(parse_filter("(uid=\\2a)").is_some());
    }

    #[test]
    fn test_scope() {
        assert!(in_scope("uid=a,ou=people,dc=x", "dc=x", SearchScope::Subtree));
        assert!(in_scope("uid=a,ou=people,dc=x", "ou=people,dc=x", SearchScope::OneLevel));
        assert!(!in_scope("uid=a,ou=people,dc=x", "dc=x", SearchScope::OneLevel));
        assert!(in_scope("", "", SearchScope::Object));
    }
}
