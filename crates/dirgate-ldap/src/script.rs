//! Script collaborator seam
//!
//! Dirgate never executes scripts itself. A [`ScriptCache`] supplied by the
//! host compiles locations into [`CompiledScript`] objects, keyed by the
//! SHA-256 hex digest of the location.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

use crate::authenticator::AuthenticationResponse;
use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::SearchFilter;
use crate::policy::{MessageDescriptor, PasswordPolicyContext};

/// Prefix marking an inline or registered script location
pub const SCRIPT_PREFIX: &str = "script:";

/// A compiled script. Each capability defaults to an error so a script only
/// implements what it is used for.
pub trait CompiledScript: Send + Sync {
    /// Populate `filter` from the named parameters
    fn build_filter(
        &self,
        _filter: &mut SearchFilter,
        _parameters: &[(String, String)],
    ) -> DirectoryResult<()> {
        Err(DirectoryError::Script("script does not build search filters".to_string()))
    }

    /// Interpret an authentication response into policy messages
    fn handle_policy(
        &self,
        _response: &AuthenticationResponse,
        _context: &PasswordPolicyContext,
    ) -> DirectoryResult<Vec<MessageDescriptor>> {
        Err(DirectoryError::Script("script does not handle password policy".to_string()))
    }
}

pub trait ScriptCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<dyn CompiledScript>>;

    fn put(&self, key: &str, script: Arc<dyn CompiledScript>);

    fn contains_key(&self, key: &str) -> bool;

    /// Compile the script at `location`
    fn compile(&self, location: &str) -> DirectoryResult<Arc<dyn CompiledScript>>;
}

/// Cache key for a script location
pub fn compute_key(location: &str) -> String {
    hex::encode(Sha256::digest(location.as_bytes()))
}

/// Whether a filter or policy location refers to a script rather than a literal
pub fn is_script_resource(location: &str) -> bool {
    let location = location.trim();
    if location.is_empty() || location.starts_with('(') {
        return false;
    }
    location.starts_with(SCRIPT_PREFIX) || Path::new(location).is_file()
}

/// Fetch a compiled script from the cache, compiling and caching it on a miss
pub fn resolve_script(
    cache: Option<&dyn ScriptCache>,
    location: &str,
) -> DirectoryResult<Arc<dyn CompiledScript>> {
    let cache = cache.ok_or_else(|| {
        DirectoryError::configuration(format!(
            "No script cache is available to handle {}",
            location
        ))
    })?;

    let key = compute_key(location);
    if let Some(script) = cache.get(&key) {
        trace!("Located cached script for key {}", key);
        return Ok(script);
    }

    let script = cache.compile(location)?;
    cache.put(&key, script.clone());
    trace!("Cached script {} under key {}", location, key);
    Ok(script)
}

type Compiler = dyn Fn(&str) -> DirectoryResult<Arc<dyn CompiledScript>> + Send + Sync;

/// Process-local cache around a host-supplied compiler
pub struct InMemoryScriptCache {
    scripts: RwLock<HashMap<String, Arc<dyn CompiledScript>>>,
    compiler: Box<Compiler>,
}

impl InMemoryScriptCache {
    pub fn new<F>(compiler: F) -> Self
    where
        F: Fn(&str) -> DirectoryResult<Arc<dyn CompiledScript>> + Send + Sync + 'static,
    {
        Self {
            scripts: RwLock::new(HashMap::new()),
            compiler: Box::new(compiler),
        }
    }

    pub fn len(&self) -> usize {
        self.scripts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.read().is_empty()
    }
}

impl ScriptCache for InMemoryScriptCache {
    fn get(&self, key: &str) -> Option<Arc<dyn CompiledScript>> {
        self.scripts.read().get(key).cloned()
    }

    fn put(&self, key: &str, script: Arc<dyn CompiledScript>) {
        self.scripts.write().insert(key.to_string(), script);
    }

    fn contains_key(&self, key: &str) -> bool {
        self.scripts.read().contains_key(key)
    }

    fn compile(&self, location: &str) -> DirectoryResult<Arc<dyn CompiledScript>> {
        (self.compiler)(location)
    }
}
