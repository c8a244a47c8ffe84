//! Lazily initialized, shared cluster connection.
//!
//! [`ConnectionManager`] owns the single cluster session of the process. The
//! first call to [`ConnectionManager::handle`] connects, opens the bucket and
//! scope and runs schema bootstrap; later calls return the published
//! [`ConnectionHandle`] from a read lock. Concurrent first callers serialize
//! on an async mutex and re-check the handle under it, so exactly one of
//! them connects.
//!
//! A failed initialization closes whatever it opened and publishes nothing;
//! the next call starts over.

use std::sync::Arc;

use fail::fail_point;
use idsvr_docstore::{Cluster, ClusterConnector, Collection, Keyspace, StoreError};
use parking_lot::RwLock;

use crate::{
    bootstrap::{CollectionCatalog, SchemaBootstrapper},
    config::PersistenceConfig,
    error::{PersistenceError, Result},
};

/// An initialized, bootstrapped cluster session bound to one bucket and
/// scope.
pub struct ConnectionHandle {
    cluster: Arc<dyn Cluster>,
    bucket: String,
    scope: String,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("bucket", &self.bucket)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Wraps an already bootstrapped cluster session.
    ///
    /// [`ConnectionManager`] is the usual way to obtain a handle; this is for
    /// hosts that manage the session themselves.
    pub fn new(
        cluster: Arc<dyn Cluster>,
        bucket: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self { cluster, bucket: bucket.into(), scope: scope.into() }
    }

    /// Returns the cluster session.
    #[must_use]
    pub fn cluster(&self) -> &Arc<dyn Cluster> {
        &self.cluster
    }

    /// Returns the bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Returns the scope name.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the named collection in this bucket and scope.
    #[must_use]
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(Arc::clone(&self.cluster), Keyspace::new(&self.bucket, &self.scope, name))
    }
}

/// Owns the process-wide cluster session.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use idsvr_docstore::{MemoryCluster, MemoryConnector};
/// use idsvr_persistence::{ConnectionManager, PersistenceConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let connector = MemoryConnector::new(MemoryCluster::new().with_bucket("curity"));
///     let config = PersistenceConfig::builder()
///         .host("localhost")
///         .username("idsvr")
///         .password("secret")
///         .build()?;
///
///     let manager = ConnectionManager::new(config, Arc::new(connector));
///     let handle = manager.handle().await?;
///     assert_eq!(handle.bucket(), "curity");
///
///     manager.close().await;
///     Ok(())
/// }
/// ```
pub struct ConnectionManager {
    config: PersistenceConfig,
    connector: Arc<dyn ClusterConnector>,
    catalog: CollectionCatalog,
    handle: RwLock<Option<Arc<ConnectionHandle>>>,
    init: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager that bootstraps the default collection catalog.
    ///
    /// Nothing is connected until the first [`handle`](Self::handle) call.
    pub fn new(config: PersistenceConfig, connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            config,
            connector,
            catalog: CollectionCatalog::default(),
            handle: RwLock::new(None),
            init: tokio::sync::Mutex::new(()),
        }
    }

    /// Replaces the collection catalog bootstrapped on first use.
    #[must_use]
    pub fn with_catalog(mut self, catalog: CollectionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Returns `true` once a handle has been published.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.read().is_some()
    }

    /// Returns the shared handle, initializing it on first use.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::Config`] if the configuration cannot produce a connection string or
    ///   the bucket does not exist
    /// - [`PersistenceError::Unavailable`] if connecting or opening the bucket or scope fails
    /// - [`PersistenceError::Bootstrap`] if schema bootstrap fails
    pub async fn handle(&self) -> Result<Arc<ConnectionHandle>> {
        let published = self.handle.read().clone();
        if let Some(handle) = published {
            return Ok(handle);
        }

        let _guard = self.init.lock().await;
        let published = self.handle.read().clone();
        if let Some(handle) = published {
            return Ok(handle);
        }

        let handle = Arc::new(self.initialize().await?);
        *self.handle.write() = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Closes the published session, if any.
    ///
    /// Safe to call before initialization and more than once. A later
    /// [`handle`](Self::handle) call connects again.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self) {
        let _guard = self.init.lock().await;
        let taken = self.handle.write().take();
        let Some(handle) = taken else {
            tracing::debug!("no open connection to close");
            return;
        };

        match handle.cluster.close().await {
            Ok(()) => tracing::info!(bucket = %handle.bucket, "connection closed"),
            Err(e) => {
                tracing::warn!(bucket = %handle.bucket, error = %e, "failed to close connection");
            },
        }
    }

    #[tracing::instrument(
        skip(self),
        fields(bucket = %self.config.bucket(), scope = %self.config.scope())
    )]
    async fn initialize(&self) -> Result<ConnectionHandle> {
        let connection_string = self.config.connection_string()?;
        let cluster = self
            .connector
            .connect(&connection_string, &self.config.credentials())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to connect");
                PersistenceError::unavailable("failed to connect to cluster", e)
            })?;

        if let Err(e) = self.provision(&cluster).await {
            tracing::error!(error = %e, "connection initialization failed");
            if let Err(close_err) = cluster.close().await {
                tracing::warn!(error = %close_err, "failed to close partially opened connection");
            }
            return Err(e);
        }

        tracing::info!("connection initialized");
        Ok(ConnectionHandle::new(cluster, self.config.bucket(), self.config.scope()))
    }

    async fn provision(&self, cluster: &Arc<dyn Cluster>) -> Result<()> {
        let bucket = self.config.bucket();
        let scope = self.config.scope();

        cluster.open_bucket(bucket).await.map_err(|e| {
            if matches!(e, StoreError::BucketNotFound { .. }) {
                PersistenceError::Config {
                    message: format!("bucket {bucket} does not exist"),
                    source: Some(Arc::new(e)),
                }
            } else {
                PersistenceError::unavailable(format!("failed to open bucket {bucket}"), e)
            }
        })?;

        let exists = cluster
            .scope_exists(bucket, scope)
            .await
            .map_err(|e| PersistenceError::unavailable("failed to look up scope", e))?;
        if !exists {
            match cluster.create_scope(bucket, scope).await {
                Ok(()) => tracing::info!(scope, "created scope"),
                Err(StoreError::ScopeExists { .. }) => {
                    tracing::debug!(scope, "scope created concurrently");
                },
                Err(e) => {
                    return Err(PersistenceError::unavailable(
                        format!("failed to create scope {scope}"),
                        e,
                    ));
                },
            }
        }

        fail_point!("connection-before-bootstrap", |_| Err(PersistenceError::unavailable(
            "injected failure before bootstrap",
            StoreError::internal("injected"),
        )));

        SchemaBootstrapper::new(Arc::clone(cluster), bucket, scope, *self.config.bootstrap())
            .ensure(&self.catalog)
            .await?;
        Ok(())
    }
}
