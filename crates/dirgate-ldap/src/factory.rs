//! Connection factories
//!
//! A factory hands out [`ManagedConnection`]s. The default factory opens a
//! new connection per checkout; the pooled factory in [`crate::pool`]
//! recycles them.

use async_trait::async_trait;
use dirgate_core::config::ConnectionStrategy;
use dirgate_core::LdapProperties;
use rand::seq::SliceRandom;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

use crate::client::{
    AttributeModification, BindRequest, CompareRequest, Connector, DirectoryConnection,
    OperationResult, PasswordModifyRequest, SearchRequest, SearchResponse,
};
use crate::connection::{new_connection_descriptor, ConnectionDescriptor, ConnectionInitializer, SaslConfig};
use crate::error::{DirectoryError, DirectoryResult};
use crate::pool::PooledConnectionFactory;
use dirgate_core::types::LdapEntry;

/// Source of directory connections for one directory target
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    fn descriptor(&self) -> &ConnectionDescriptor;

    /// Check out a ready-to-use connection
    async fn get_connection(&self) -> DirectoryResult<ManagedConnection>;

    /// Open an unpooled connection to a specific URL (used to chase referrals)
    async fn connect_url(&self, url: &str) -> DirectoryResult<ManagedConnection>;

    /// Release every resource held by the factory
    async fn close(&self);
}

/// Receives connections when a [`ManagedConnection`] is dropped
pub(crate) trait ConnectionSink: Send + Sync {
    fn release(&self, connection: Box<dyn DirectoryConnection>, broken: bool);
}

/// A checked-out connection.
///
/// Pooled connections go back to their pool on drop unless
/// [`ManagedConnection::invalidate`] was called; unpooled ones are closed
/// when the underlying client handle is dropped.
pub struct ManagedConnection {
    connection: Box<dyn DirectoryConnection>,
    sink: Option<Weak<dyn ConnectionSink>>,
    // Dropped after the connection is handed back, freeing the pool slot
    _permit: Option<OwnedSemaphorePermit>,
    broken: bool,
}

impl ManagedConnection {
    pub fn unpooled(connection: Box<dyn DirectoryConnection>) -> Self {
        Self {
            connection,
            sink: None,
            _permit: None,
            broken: false,
        }
    }

    pub(crate) fn pooled(
        connection: Box<dyn DirectoryConnection>,
        sink: Weak<dyn ConnectionSink>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            connection,
            sink: Some(sink),
            _permit: Some(permit),
            broken: false,
        }
    }

    /// Discard this connection instead of returning it to the pool
    pub fn invalidate(&mut self) {
        self.broken = true;
    }

    /// Invalidate the connection when an error leaves it unusable
    pub fn check<T>(&mut self, result: DirectoryResult<T>) -> DirectoryResult<T> {
        if let Err(e) = &result {
            if e.is_connection_failure() {
                self.broken = true;
            }
        }
        result
    }
}

impl Deref for ManagedConnection {
    type Target = dyn DirectoryConnection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl DerefMut for ManagedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut()
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        let Some(sink) = self.sink.take().and_then(|s| s.upgrade()) else {
            return;
        };
        let connection = std::mem::replace(&mut self.connection, Box::new(Released));
        sink.release(connection, self.broken);
    }
}

/// Placeholder left behind once a connection has been handed back
struct Released;

#[async_trait]
impl DirectoryConnection for Released {
    fn url(&self) -> &str {
        ""
    }

    async fn bind(&mut self, _: &BindRequest) -> DirectoryResult<OperationResult> {
        Err(released())
    }

    async fn sasl_bind(&mut self, _: &SaslConfig) -> DirectoryResult<OperationResult> {
        Err(released())
    }

    async fn fast_bind(&mut self) -> DirectoryResult<OperationResult> {
        Err(released())
    }

    async fn search(&mut self, _: &SearchRequest) -> DirectoryResult<SearchResponse> {
        Err(released())
    }

    async fn compare(&mut self, _: &CompareRequest) -> DirectoryResult<OperationResult> {
        Err(released())
    }

    async fn add(&mut self, _: &LdapEntry) -> DirectoryResult<OperationResult> {
        Err(released())
    }

    async fn modify(&mut self, _: &str, _: &[AttributeModification]) -> DirectoryResult<OperationResult> {
        Err(released())
    }

    async fn delete(&mut self, _: &str) -> DirectoryResult<OperationResult> {
        Err(released())
    }

    async fn password_modify(&mut self, _: &PasswordModifyRequest) -> DirectoryResult<OperationResult> {
        Err(released())
    }

    async fn close(&mut self) -> DirectoryResult<()> {
        Ok(())
    }
}

fn released() -> DirectoryError {
    DirectoryError::connection("connection already released")
}

/// Run the descriptor's initializer on a freshly opened connection
pub(crate) async fn initialize_connection(
    connection: &mut dyn DirectoryConnection,
    initializer: &ConnectionInitializer,
) -> DirectoryResult<()> {
    let result = match initializer {
        ConnectionInitializer::None => return Ok(()),
        ConnectionInitializer::Bind { dn, credential } => {
            connection.bind(&BindRequest::new(dn.as_str(), credential.as_str())).await?
        }
        ConnectionInitializer::FastBind => connection.fast_bind().await?,
        ConnectionInitializer::Sasl(config) => connection.sasl_bind(config).await?,
    };

    if !result.is_success() {
        return Err(DirectoryError::connection(format!(
            "Initialization of connection to {} failed with {}: {}",
            connection.url(),
            result.code,
            result.message
        )));
    }
    Ok(())
}

/// Opens one connection per checkout
pub struct DefaultConnectionFactory {
    descriptor: ConnectionDescriptor,
    connector: Arc<dyn Connector>,
    cursor: AtomicUsize,
    srv_warned: AtomicBool,
}

impl DefaultConnectionFactory {
    pub fn new(descriptor: ConnectionDescriptor, connector: Arc<dyn Connector>) -> Self {
        Self {
            descriptor,
            connector,
            cursor: AtomicUsize::new(0),
            srv_warned: AtomicBool::new(false),
        }
    }

    /// URLs in the order the connection strategy wants them tried
    fn ordered_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.descriptor.urls().into_iter().map(str::to_string).collect();
        match self.descriptor.strategy {
            ConnectionStrategy::ActivePassive => {}
            ConnectionStrategy::RoundRobin => {
                if !urls.is_empty() {
                    let start = self.cursor.fetch_add(1, Ordering::Relaxed) % urls.len();
                    urls.rotate_left(start);
                }
            }
            ConnectionStrategy::Random => urls.shuffle(&mut rand::rng()),
            ConnectionStrategy::DnsSrv => {
                if !self.srv_warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        "DNS SRV lookup is not available; using [{}] in declared order",
                        self.descriptor.ldap_url
                    );
                }
            }
        }
        urls
    }

    async fn open_url(&self, url: &str) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        let mut connection = self.connector.connect(url, &self.descriptor).await?;
        if let Err(e) = initialize_connection(connection.as_mut(), &self.descriptor.initializer).await {
            let _ = connection.close().await;
            return Err(e);
        }
        Ok(connection)
    }

    /// Open and initialize a connection, failing over across URLs
    pub async fn open(&self) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        let mut last_error = None;
        for url in self.ordered_urls() {
            match self.open_url(&url).await {
                Ok(connection) => {
                    debug!("Opened connection to {}", url);
                    return Ok(connection);
                }
                Err(e) => {
                    warn!("Unable to open connection to {}: {}", url, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| DirectoryError::connection("No LDAP URL to connect to")))
    }
}

#[async_trait]
impl ConnectionFactory for DefaultConnectionFactory {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    async fn get_connection(&self) -> DirectoryResult<ManagedConnection> {
        Ok(ManagedConnection::unpooled(self.open().await?))
    }

    async fn connect_url(&self, url: &str) -> DirectoryResult<ManagedConnection> {
        Ok(ManagedConnection::unpooled(self.open_url(url).await?))
    }

    async fn close(&self) {
        debug!("Closed default connection factory for [{}]", self.descriptor.ldap_url);
    }
}

/// Build the connection factory for a directory target: pooled unless pooling is disabled
pub async fn new_connection_factory(
    props: &LdapProperties,
    connector: Arc<dyn Connector>,
) -> DirectoryResult<Arc<dyn ConnectionFactory>> {
    let descriptor = new_connection_descriptor(props)?;
    let factory = DefaultConnectionFactory::new(descriptor, connector);

    if props.disable_pooling {
        info!("Connection pooling is disabled for [{}]", props.display_name());
        return Ok(Arc::new(factory));
    }

    let pool = PooledConnectionFactory::new(props, factory)?;
    pool.initialize().await?;
    Ok(Arc::new(pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDirectory;

    fn props(url: &str) -> LdapProperties {
        LdapProperties {
            ldap_url: url.to_string(),
            bind_dn: Some("cn=admin,dc=example,dc=com".to_string()),
            bind_credential: Some("secret".to_string()),
            disable_pooling: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_blank_url_builds_nothing() {
        let directory = MockDirectory::new();
        let result = new_connection_factory(&props(""), directory.connector()).await;
        assert!(matches!(result, Err(DirectoryError::Configuration(_))));
        assert_eq!(directory.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_default_factory_binds_service_account() {
        let directory = MockDirectory::new();
        directory.add_user("cn=admin,dc=example,dc=com", "secret");

        let factory = new_connection_factory(&props("ldap://a"), directory.connector())
            .await
            .unwrap();
        let connection = factory.get_connection().await.unwrap();
        assert_eq!(connection.url(), "ldap://a");
        assert_eq!(directory.bind_dns(), vec!["cn=admin,dc=example,dc=com"]);
    }

    #[tokio::test]
    async fn test_active_passive_failover() {
        let directory = MockDirectory::new();
        directory.add_user("cn=admin,dc=example,dc=com", "secret");
        directory.set_unreachable("ldap://a");

        let factory = new_connection_factory(&props("ldap://a ldap://b"), directory.connector())
            .await
            .unwrap();
        let connection = factory.get_connection().await.unwrap();
        assert_eq!(connection.url(), "ldap://b");
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let directory = MockDirectory::new();
        directory.add_user("cn=admin,dc=example,dc=com", "secret");

        let mut p = props("ldap://a ldap://b");
        p.connection_strategy = Some("ROUND_ROBIN".to_string());
        let factory = new_connection_factory(&p, directory.connector()).await.unwrap();

        let first = factory.get_connection().await.unwrap().url().to_string();
        let second = factory.get_connection().await.unwrap().url().to_string();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_failed_initialization_is_reported() {
        let directory = MockDirectory::new();
        directory.add_user("cn=admin,dc=example,dc=com", "other");

        let factory = new_connection_factory(&props("ldap://a"), directory.connector())
            .await
            .unwrap();
        assert!(matches!(
            factory.get_connection().await,
            Err(DirectoryError::Connection(_))
        ));
    }
}
