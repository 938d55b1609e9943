//! Bounded connection pool
//!
//! Checkout is limited by a semaphore holding `max_pool_size` permits; a
//! caller waits at most `block_wait_time` for one. Idle connections sit in a
//! mutex-guarded deque. Connections returned by a caller are passivated
//! (re-bound to the service identity) on their next checkout. Pruning and
//! periodic validation run as background tasks holding only a weak
//! reference to the pool.

use async_trait::async_trait;
use dirgate_core::config::{PoolPassivator, SearchScope};
use dirgate_core::LdapProperties;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{BindRequest, CompareRequest, DirectoryConnection, SearchRequest, NO_ATTRIBUTES};
use crate::connection::ConnectionDescriptor;
use crate::error::{DirectoryError, DirectoryResult};
use crate::factory::{ConnectionFactory, ConnectionSink, DefaultConnectionFactory, ManagedConnection};

/// How pooled connections are checked for liveness
#[derive(Debug, Clone)]
pub enum ConnectionValidator {
    None,
    /// Valid when the compare returns COMPARE_TRUE
    Compare(CompareRequest),
    /// Valid when the search succeeds and returns an entry
    Search(SearchRequest),
}

impl ConnectionValidator {
    pub fn from_properties(props: &LdapProperties) -> DirectoryResult<Self> {
        let validator = &props.validator;
        match validator.validator_type.trim().to_lowercase().as_str() {
            "compare" => Ok(ConnectionValidator::Compare(CompareRequest::new(
                validator.dn.as_str(),
                validator.attribute_name.as_str(),
                validator.attribute_value.as_str(),
            ))),
            "none" => {
                debug!("No validator is configured for the LDAP connection pool of [{}]", props.ldap_url);
                Ok(ConnectionValidator::None)
            }
            _ => {
                let scope = validator.scope.parse::<SearchScope>()?;
                let request = SearchRequest::new(validator.base_dn.as_str(), validator.search_filter.as_str())
                    .with_scope(scope)
                    .with_attributes(vec![NO_ATTRIBUTES.to_string()])
                    .with_size_limit(1);
                Ok(ConnectionValidator::Search(request))
            }
        }
    }

    /// Validate a connection within the given timeout
    pub async fn validate(&self, connection: &mut dyn DirectoryConnection, timeout: Duration) -> bool {
        let check = async {
            match self {
                ConnectionValidator::None => true,
                ConnectionValidator::Compare(request) => matches!(
                    connection.compare(request).await,
                    Ok(result) if result.code == dirgate_core::types::ResultCode::CompareTrue
                ),
                ConnectionValidator::Search(request) => matches!(
                    connection.search(request).await,
                    Ok(response) if response.is_success() && !response.entries.is_empty()
                ),
            }
        };

        let outcome = tokio::time::timeout(timeout, check).await;
        match outcome {
            Ok(valid) => valid,
            Err(_) => {
                debug!("Validation of connection to {} timed out", connection.url());
                false
            }
        }
    }
}

/// Pool sizing and maintenance settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub block_wait_time: Duration,
    pub idle_time: Duration,
    pub prune_period: Duration,
    pub validate_on_checkout: bool,
    pub validate_periodically: bool,
    pub validate_period: Duration,
    pub validate_timeout: Duration,
    pub fail_fast: bool,
    pub validator: ConnectionValidator,
    /// Identity to re-bind as before reusing a returned connection
    pub passivator: Option<BindRequest>,
}

impl PoolConfig {
    pub fn from_properties(props: &LdapProperties, descriptor: &ConnectionDescriptor) -> DirectoryResult<Self> {
        props.validate()?;

        let passivator = match props.pool_passivator.parse::<PoolPassivator>()? {
            PoolPassivator::Bind => match descriptor.bind_credentials() {
                Some((dn, credential)) => {
                    debug!("Created [BIND] passivator for [{}]", props.ldap_url);
                    Some(BindRequest::new(dn, credential))
                }
                None => {
                    warn!(
                        "[BIND] pool passivator for [{}] requires a bind DN and credential; \
                         either provide them or choose NONE. Passivation is skipped",
                        props.ldap_url
                    );
                    None
                }
            },
            PoolPassivator::None => None,
        };

        Ok(Self {
            min_size: props.min_pool_size,
            max_size: props.max_pool_size,
            block_wait_time: Duration::from_secs(props.block_wait_time_secs),
            idle_time: Duration::from_secs(props.idle_time_secs),
            prune_period: Duration::from_secs(props.prune_period_secs),
            validate_on_checkout: props.validate_on_checkout,
            validate_periodically: props.validate_periodically,
            validate_period: Duration::from_secs(props.validate_period_secs),
            validate_timeout: Duration::from_secs(props.validate_timeout_secs),
            fail_fast: props.fail_fast,
            validator: ConnectionValidator::from_properties(props)?,
            passivator,
        })
    }
}

struct IdleConnection {
    connection: Box<dyn DirectoryConnection>,
    idle_since: Instant,
    /// Handed back by a caller, so its bound identity is unknown
    returned: bool,
}

struct PoolShared {
    factory: DefaultConnectionFactory,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConnection>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl PoolShared {
    fn in_use(&self) -> usize {
        self.config.max_size.saturating_sub(self.permits.available_permits())
    }

    async fn passivate(&self, connection: &mut dyn DirectoryConnection) -> bool {
        let Some(request) = &self.config.passivator else {
            return true;
        };
        match connection.bind(request).await {
            Ok(result) if result.is_success() => true,
            Ok(result) => {
                debug!("Passivation bind on {} returned {}", connection.url(), result.code);
                false
            }
            Err(e) => {
                debug!("Passivation bind on {} failed: {}", connection.url(), e);
                false
            }
        }
    }

    async fn prune(&self) {
        let stale: Vec<IdleConnection> = {
            let mut idle = self.idle.lock();
            let mut total = idle.len() + self.in_use();
            let mut kept = VecDeque::with_capacity(idle.len());
            let mut stale = Vec::new();
            // Oldest first
            while let Some(entry) = idle.pop_front() {
                if total > self.config.min_size && entry.idle_since.elapsed() >= self.config.idle_time {
                    total -= 1;
                    stale.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            *idle = kept;
            stale
        };

        if !stale.is_empty() {
            debug!("Pruning {} idle connection(s) for [{}]", stale.len(), self.factory.descriptor().ldap_url);
        }
        for mut entry in stale {
            let _ = entry.connection.close().await;
        }
    }

    /// Validate idle connections one at a time. Each connection holds a
    /// permit while it is out of the idle queue, so concurrent checkouts
    /// count it and the pool never exceeds `max_size`.
    async fn validate_idle(&self) {
        let pending = self.idle.lock().len();
        let mut invalid = 0usize;

        for _ in 0..pending {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                debug!("Pool for [{}] is busy; deferring validation", self.factory.descriptor().ldap_url);
                break;
            };
            let candidate = self.idle.lock().pop_front();
            let Some(mut entry) = candidate else {
                break;
            };

            let valid = self
                .config
                .validator
                .validate(entry.connection.as_mut(), self.config.validate_timeout)
                .await;
            if valid && !self.closed.load(Ordering::Acquire) {
                self.idle.lock().push_back(entry);
            } else {
                if !valid {
                    invalid += 1;
                }
                let _ = entry.connection.close().await;
            }
            drop(permit);
        }

        if invalid > 0 {
            warn!(
                "Removed {} invalid connection(s) from the pool for [{}]",
                invalid,
                self.factory.descriptor().ldap_url
            );
        }
    }
}

impl ConnectionSink for PoolShared {
    fn release(&self, connection: Box<dyn DirectoryConnection>, broken: bool) {
        if broken || self.closed.load(Ordering::Acquire) {
            debug!("Discarding connection to {}", connection.url());
            return;
        }
        self.idle.lock().push_back(IdleConnection {
            connection,
            idle_since: Instant::now(),
            returned: true,
        });
    }
}

/// Connection factory backed by a bounded pool
pub struct PooledConnectionFactory {
    shared: Arc<PoolShared>,
    cancel: CancellationToken,
}

impl PooledConnectionFactory {
    pub fn new(props: &LdapProperties, factory: DefaultConnectionFactory) -> DirectoryResult<Self> {
        let config = PoolConfig::from_properties(props, factory.descriptor())?;
        Ok(Self::with_config(config, factory))
    }

    pub fn with_config(config: PoolConfig, factory: DefaultConnectionFactory) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_size));
        Self {
            shared: Arc::new(PoolShared {
                factory,
                config,
                idle: Mutex::new(VecDeque::new()),
                permits,
                closed: AtomicBool::new(false),
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Number of idle connections
    pub fn idle_count(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Number of checked-out connections
    pub fn active_count(&self) -> usize {
        self.shared.in_use()
    }

    /// Open `min_size` connections and start background maintenance
    pub async fn initialize(&self) -> DirectoryResult<()> {
        let shared = &self.shared;
        let url = &shared.factory.descriptor().ldap_url;
        let mut opened = 0usize;
        let mut last_error = None;

        for _ in 0..shared.config.min_size {
            match shared.factory.open().await {
                Ok(mut connection) => {
                    if shared.config.validator
                        .validate(connection.as_mut(), shared.config.validate_timeout)
                        .await
                    {
                        shared.idle.lock().push_back(IdleConnection {
                            connection,
                            idle_since: Instant::now(),
                            returned: false,
                        });
                        opened += 1;
                    } else {
                        let _ = connection.close().await;
                        last_error = Some(DirectoryError::connection(format!(
                            "Connection to [{}] failed validation",
                            url
                        )));
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }

        if opened == 0 && shared.config.min_size > 0 {
            if let Some(e) = last_error {
                if shared.config.fail_fast {
                    error!("Unable to initialize connection pool for [{}]: {}", url, e);
                    return Err(e);
                }
                warn!("Connection pool for [{}] starts empty: {}", url, e);
            }
        }

        self.spawn_maintenance();
        info!(
            "Connection pool for [{}] initialized with {} connection(s) (min={}, max={})",
            url, opened, shared.config.min_size, shared.config.max_size
        );
        Ok(())
    }

    fn spawn_maintenance(&self) {
        let config = &self.shared.config;

        if !config.prune_period.is_zero() {
            let weak = Arc::downgrade(&self.shared);
            let cancel = self.cancel.clone();
            let period = config.prune_period;
            tokio::spawn(async move {
                maintenance_loop(weak, cancel, period, |shared| async move { shared.prune().await }).await;
            });
        }

        if config.validate_periodically
            && !config.validate_period.is_zero()
            && !matches!(config.validator, ConnectionValidator::None)
        {
            let weak = Arc::downgrade(&self.shared);
            let cancel = self.cancel.clone();
            let period = config.validate_period;
            tokio::spawn(async move {
                maintenance_loop(weak, cancel, period, |shared| async move { shared.validate_idle().await })
                    .await;
            });
        }
    }

    async fn checkout(&self) -> DirectoryResult<ManagedConnection> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(DirectoryError::PoolClosed);
        }

        let permit = match tokio::time::timeout(
            shared.config.block_wait_time,
            shared.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DirectoryError::PoolClosed),
            Err(_) => {
                warn!(
                    "No connection available for [{}] after {:?}",
                    shared.factory.descriptor().ldap_url,
                    shared.config.block_wait_time
                );
                return Err(DirectoryError::PoolExhausted(shared.config.block_wait_time));
            }
        };

        let weak = Arc::downgrade(&self.shared);
        let sink: Weak<dyn ConnectionSink> = weak;

        loop {
            let candidate = shared.idle.lock().pop_back();
            let Some(mut entry) = candidate else {
                let connection = shared.factory.open().await?;
                debug!("Opened new pooled connection to {}", connection.url());
                return Ok(ManagedConnection::pooled(connection, sink, permit));
            };

            if entry.returned && !shared.passivate(entry.connection.as_mut()).await {
                let _ = entry.connection.close().await;
                continue;
            }

            if shared.config.validate_on_checkout
                && !shared
                    .config
                    .validator
                    .validate(entry.connection.as_mut(), shared.config.validate_timeout)
                    .await
            {
                debug!("Discarding connection to {} that failed validation", entry.connection.url());
                let _ = entry.connection.close().await;
                continue;
            }

            return Ok(ManagedConnection::pooled(entry.connection, sink, permit));
        }
    }
}

async fn maintenance_loop<F, Fut>(weak: Weak<PoolShared>, cancel: CancellationToken, period: Duration, task: F)
where
    F: Fn(Arc<PoolShared>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                task(shared).await;
            }
        }
    }
}

#[async_trait]
impl ConnectionFactory for PooledConnectionFactory {
    fn descriptor(&self) -> &ConnectionDescriptor {
        self.shared.factory.descriptor()
    }

    async fn get_connection(&self) -> DirectoryResult<ManagedConnection> {
        self.checkout().await
    }

    async fn connect_url(&self, url: &str) -> DirectoryResult<ManagedConnection> {
        self.shared.factory.connect_url(url).await
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        self.shared.permits.close();

        let idle: Vec<IdleConnection> = self.shared.idle.lock().drain(..).collect();
        for mut entry in idle {
            let _ = entry.connection.close().await;
        }
        info!("Closed connection pool for [{}]", self.descriptor().ldap_url);
    }
}

impl Drop for PooledConnectionFactory {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::new_connection_descriptor;
    use crate::mock::{MockDirectory, Operation};

    const ADMIN: &str = "cn=admin,dc=example,dc=com";

    fn props() -> LdapProperties {
        LdapProperties {
            ldap_url: "ldap://localhost".to_string(),
            bind_dn: Some(ADMIN.to_string()),
            bind_credential: Some("secret".to_string()),
            min_pool_size: 1,
            max_pool_size: 2,
            block_wait_time_secs: 1,
            ..Default::default()
        }
    }

    fn pool(props: &LdapProperties, directory: &MockDirectory) -> PooledConnectionFactory {
        let descriptor = new_connection_descriptor(props).unwrap();
        let factory = DefaultConnectionFactory::new(descriptor, directory.connector());
        PooledConnectionFactory::new(props, factory).unwrap()
    }

    fn directory() -> MockDirectory {
        let directory = MockDirectory::new();
        directory.add_user(ADMIN, "secret");
        directory.add_entry(dirgate_core::types::LdapEntry::new(""));
        directory
    }

    #[tokio::test]
    async fn test_initialize_opens_min_connections() {
        let directory = directory();
        let mut p = props();
        p.min_pool_size = 2;
        let pool = pool(&p, &directory);

        pool.initialize().await.unwrap();
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(directory.connect_count(), 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_fail_fast_initialization() {
        let directory = directory();
        directory.set_unreachable("ldap://localhost");

        let pool_strict = pool(&props(), &directory);
        assert!(pool_strict.initialize().await.is_err());

        let mut p = props();
        p.fail_fast = false;
        let pool_lenient = pool(&p, &directory);
        assert!(pool_lenient.initialize().await.is_ok());
        assert_eq!(pool_lenient.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_checkout_reuses_returned_connection() {
        let directory = directory();
        let pool = pool(&props(), &directory);
        pool.initialize().await.unwrap();

        {
            let _connection = pool.get_connection().await.unwrap();
            assert_eq!(pool.active_count(), 1);
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 1);

        let _again = pool.get_connection().await.unwrap();
        assert_eq!(directory.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let directory = directory();
        let pool = pool(&props(), &directory);
        pool.initialize().await.unwrap();

        let _a = pool.get_connection().await.unwrap();
        let _b = pool.get_connection().await.unwrap();
        assert!(matches!(
            pool.get_connection().await,
            Err(DirectoryError::PoolExhausted(_))
        ));
    }

    #[tokio::test]
    async fn test_invalidated_connection_is_discarded() {
        let directory = directory();
        let pool = pool(&props(), &directory);
        pool.initialize().await.unwrap();

        let mut connection = pool.get_connection().await.unwrap();
        connection.invalidate();
        drop(connection);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_bind_passivator_rebinds_returned_connection() {
        let directory = directory();
        let mut p = props();
        p.pool_passivator = "BIND".to_string();
        p.validate_on_checkout = false;
        let pool = pool(&p, &directory);
        pool.initialize().await.unwrap();

        drop(pool.get_connection().await.unwrap());
        drop(pool.get_connection().await.unwrap());

        // initializer bind + one passivation bind
        let binds = directory
            .operations()
            .into_iter()
            .filter(|op| matches!(op, Operation::Bind { .. }))
            .count();
        assert_eq!(binds, 2);
    }

    #[test]
    fn test_bind_passivator_without_credentials_is_skipped() {
        let mut p = props();
        p.bind_dn = None;
        p.bind_credential = None;
        p.pool_passivator = "BIND".to_string();
        let descriptor = new_connection_descriptor(&p).unwrap();

        let config = PoolConfig::from_properties(&p, &descriptor).unwrap();
        assert!(config.passivator.is_none());
    }

    #[test]
    fn test_validator_selection() {
        let mut p = props();
        assert!(matches!(
            ConnectionValidator::from_properties(&p).unwrap(),
            ConnectionValidator::Search(ref r) if r.size_limit == 1 && r.scope == SearchScope::Object
        ));

        p.validator.validator_type = "compare".to_string();
        assert!(matches!(
            ConnectionValidator::from_properties(&p).unwrap(),
            ConnectionValidator::Compare(_)
        ));

        p.validator.validator_type = "NONE".to_string();
        assert!(matches!(
            ConnectionValidator::from_properties(&p).unwrap(),
            ConnectionValidator::None
        ));

        p.validator.validator_type = "whatever".to_string();
        assert!(matches!(
            ConnectionValidator::from_properties(&p).unwrap(),
            ConnectionValidator::Search(_)
        ));
    }

    #[tokio::test]
    async fn test_prune_keeps_minimum() {
        let directory = directory();
        let mut p = props();
        p.min_pool_size = 1;
        p.max_pool_size = 3;
        p.idle_time_secs = 0;
        let pool = pool(&p, &directory);
        pool.initialize().await.unwrap();

        {
            let _a = pool.get_connection().await.unwrap();
            let _b = pool.get_connection().await.unwrap();
        }
        assert_eq!(pool.idle_count(), 2);

        pool.shared.prune().await;
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_checkout() {
        let directory = directory();
        let pool = pool(&props(), &directory);
        pool.initialize().await.unwrap();
        pool.close().await;

        assert!(matches!(
            pool.get_connection().await,
            Err(DirectoryError::PoolClosed)
        ));
    }

    #[tokio::test]
    async fn test_validation_does_not_overfill_pool() {
        let directory = directory();
        let mut p = props();
        p.min_pool_size = 2;
        p.max_pool_size = 2;
        p.validate_on_checkout = false;
        let pool = pool(&p, &directory);
        pool.initialize().await.unwrap();
        assert_eq!(directory.connect_count(), 2);

        directory.set_search_delay(Duration::from_millis(200));
        let shared = pool.shared.clone();
        let validation = tokio::spawn(async move { shared.validate_idle().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (a, b) = tokio::join!(pool.get_connection(), pool.get_connection());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(pool.idle_count() + pool.active_count() <= 2);
        // the connection under validation is handed over, not replaced
        assert_eq!(directory.connect_count(), 2);

        drop(a);
        drop(b);
        validation.await.unwrap();
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_with_maintenance() {
        let directory = directory();
        directory.set_search_delay(Duration::from_millis(5));
        let mut p = props();
        p.min_pool_size = 1;
        p.max_pool_size = 3;
        p.idle_time_secs = 0;
        p.block_wait_time_secs = 5;
        let pool = Arc::new(pool(&p, &directory));
        pool.initialize().await.unwrap();

        let mut workers = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            workers.push(tokio::spawn(async move {
                for _ in 0..4 {
                    let connection = pool.get_connection().await.unwrap();
                    assert!(pool.idle_count() + pool.active_count() <= 3);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    drop(connection);
                }
            }));
        }

        let maintenance = {
            let shared = pool.shared.clone();
            let pool = pool.clone();
            tokio::spawn(async move {
                for _ in 0..10 {
                    shared.validate_idle().await;
                    assert!(pool.idle_count() + pool.active_count() <= 3);
                    shared.prune().await;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        for worker in workers {
            worker.await.unwrap();
        }
        maintenance.await.unwrap();

        assert_eq!(pool.active_count(), 0);
        assert!(pool.idle_count() <= 3);
        pool.close().await;
    }
}
