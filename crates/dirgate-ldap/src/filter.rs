//! Search filter templates
//!
//! Filters carry `{N}` and `{name}` placeholders. Values are RFC 4515
//! escaped when the filter is formatted.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fmt;
use tracing::{debug, trace};

use crate::error::DirectoryResult;
use crate::script::{self, ScriptCache};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("valid placeholder pattern"));

/// A filter template plus its bound parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    template: String,
    parameters: Vec<(String, String)>,
}

impl SearchFilter {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            parameters: Vec::new(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn set_template(&mut self, template: impl Into<String>) {
        self.template = template.into();
    }

    /// Bind a placeholder (without braces) to a value, replacing an earlier binding
    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.parameters.push((name, value)),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    /// Render the filter with every bound placeholder substituted and escaped
    pub fn format(&self) -> String {
        // one pass, so bound values are never rescanned for placeholders
        PLACEHOLDER
            .replace_all(&self.template, |caps: &Captures<'_>| match self.parameter(&caps[1]) {
                Some(value) => escape_filter_value(value),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

impl fmt::Display for SearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Escape an assertion value per RFC 4515
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\5c"),
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Build a search filter from a query and positional values.
///
/// `names[i]` names the i-th value. A placeholder is bound only when the
/// query literally contains `{i}` or `{names[i]}`; extra values are ignored.
/// When the query points at a script, the compiled script builds the filter
/// instead and the cache must be present.
pub fn new_search_filter(
    query: &str,
    names: &[&str],
    values: &[String],
    script_cache: Option<&dyn ScriptCache>,
) -> DirectoryResult<SearchFilter> {
    let mut filter = SearchFilter::default();

    if script::is_script_resource(query) {
        let script = script::resolve_script(script_cache, query)?;
        let parameters: Vec<(String, String)> = names
            .iter()
            .zip(values)
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        trace!("Building search filter from script {}", query);
        script.build_filter(&mut filter, &parameters)?;
    } else {
        filter.set_template(query);
        for (i, value) in values.iter().enumerate() {
            if query.contains(&format!("{{{}}}", i)) {
                filter.set_parameter(i.to_string(), value.clone());
            }
            if let Some(name) = names.get(i) {
                if query.contains(&format!("{{{}}}", name)) {
                    filter.set_parameter(*name, value.clone());
                }
            }
        }
    }

    debug!("Constructed LDAP search filter {}", filter);
    Ok(filter)
}

/// Single-value filter using the default `{user}` parameter name
pub fn new_user_filter(query: &str, user: &str) -> DirectoryResult<SearchFilter> {
    new_search_filter(
        query,
        &[dirgate_core::SEARCH_FILTER_DEFAULT_PARAM_NAME],
        &[user.to_string()],
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DirectoryError;
    use crate::script::{CompiledScript, InMemoryScriptCache};
    use std::sync::Arc;

    #[test]
    fn test_escape() {
        assert_eq!(escape_filter_value("a*b(c)\\d"), "a\\2ab\\28c\\29\\5cd");
        assert_eq!(escape_filter_value("plain"), "plain");
        assert_eq!(escape_filter_value("nul\0"), "nul\\00");
    }

    #[test]
    fn test_named_and_positional_placeholders() {
        let filter = new_search_filter(
            "(&(uid={user})(ou={1}))",
            &["user", "unit"],
            &["j*doe".to_string(), "staff".to_string()],
            None,
        )
        .unwrap();

        assert_eq!(filter.format(), "(&(uid=j\\2adoe)(ou=staff))");
        assert_eq!(filter.parameter("user"), Some("j*doe"));
        assert_eq!(filter.parameter("1"), Some("staff"));
        assert!(filter.parameter("unit").is_none());
    }

    #[test]
    fn test_bound_values_are_not_rescanned() {
        let mut filter = SearchFilter::new("(&(uid={user})(member={dn}))");
        filter.set_parameter("user", "{dn}");
        filter.set_parameter("dn", "cn=x");
        assert_eq!(filter.format(), "(&(uid={dn})(member=cn=x))");

        // unbound placeholders stay literal
        let filter = SearchFilter::new("(cn={missing})");
        assert_eq!(filter.format(), "(cn={missing})");
    }

    #[test]
    fn test_absent_placeholders_are_not_bound() {
        let filter = new_user_filter("(objectClass=person)", "jdoe").unwrap();
        assert!(filter.parameters().is_empty());
        assert_eq!(filter.format(), "(objectClass=person)");
    }

    struct UidScript;

    impl CompiledScript for UidScript {
        fn build_filter(
            &self,
            filter: &mut SearchFilter,
            parameters: &[(String, String)],
        ) -> DirectoryResult<()> {
            filter.set_template("(sAMAccountName={user})");
            for (name, value) in parameters {
                filter.set_parameter(name.clone(), value.clone());
            }
            Ok(())
        }
    }

    #[test]
    fn test_script_filter() {
        let cache = InMemoryScriptCache::new(|_| Ok(Arc::new(UidScript) as Arc<dyn CompiledScript>));
        let filter = new_search_filter(
            "script:filter.groovy",
            &["user"],
            &["jdoe".to_string()],
            Some(&cache),
        )
        .unwrap();
        assert_eq!(filter.format(), "(sAMAccountName=jdoe)");
        assert!(cache.contains_key(&crate::script::compute_key("script:filter.groovy")));
    }

    #[test]
    fn test_script_filter_requires_cache() {
        let result = new_search_filter("script:filter.groovy", &["user"], &[], None);
        assert!(matches!(result, Err(DirectoryError::Configuration(_))));
    }
}
