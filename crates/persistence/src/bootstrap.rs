//! Schema bootstrap.
//!
//! [`SchemaBootstrapper`] makes sure every collection in a
//! [`CollectionCatalog`] exists and has a primary index that is actually
//! servable before any record is read or written. Index creation and
//! propagation are asynchronous in the store, so both are wrapped in
//! [`retry_while`] with a predicate that only accepts the transient error
//! class of each step.
//!
//! # Steps
//!
//! 1. Primary index on the whole bucket; failures are logged and ignored
//! 2. Every collection in the scope; "already exists" counts as success
//! 3. Per collection, primary index creation retried on
//!    [`StoreError::is_index_building`]
//! 4. Per collection, index watch retried on [`StoreError::is_index_not_found`]
//! 5. One bucket-wide readiness wait
//!
//! Running it again against a provisioned store only re-verifies state.

use std::sync::Arc;

use idsvr_docstore::{Cluster, IndexTarget, Keyspace, PrimaryIndexOptions, StoreError};

use crate::{
    config::BootstrapConfig,
    error::{BootstrapStage, PersistenceError, Result},
    retry::{RetryError, retry_while},
};

/// Collection holding bucket documents.
pub const BUCKETS_COLLECTION: &str = "curity-buckets";

/// Collection holding sessions.
pub const SESSIONS_COLLECTION: &str = "curity-sessions";

/// Collection holding accounts.
pub const ACCOUNTS_COLLECTION: &str = "curity-accounts";

/// Collection holding delegations.
pub const DELEGATIONS_COLLECTION: &str = "curity-delegations";

/// Collection holding nonces.
pub const NONCES_COLLECTION: &str = "curity-nonces";

/// Collection holding tokens.
pub const TOKENS_COLLECTION: &str = "curity-tokens";

/// The ordered set of collections bootstrap provisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionCatalog {
    names: Vec<String>,
}

impl CollectionCatalog {
    /// Creates a catalog from `names`, dropping repeats.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        Self { names: unique }
    }

    /// Iterates the collection names in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Returns the number of collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` when the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns whether `name` is in the catalog.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

impl Default for CollectionCatalog {
    fn default() -> Self {
        Self::new([
            BUCKETS_COLLECTION,
            SESSIONS_COLLECTION,
            ACCOUNTS_COLLECTION,
            DELEGATIONS_COLLECTION,
            NONCES_COLLECTION,
            TOKENS_COLLECTION,
        ])
    }
}

/// What a bootstrap run found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Collections created by this run.
    pub created_collections: Vec<String>,
    /// Collections that already existed.
    pub existing_collections: Vec<String>,
}

/// Provisions collections and primary indexes in one bucket and scope.
pub struct SchemaBootstrapper {
    cluster: Arc<dyn Cluster>,
    bucket: String,
    scope: String,
    config: BootstrapConfig,
}

impl std::fmt::Debug for SchemaBootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaBootstrapper")
            .field("bucket", &self.bucket)
            .field("scope", &self.scope)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SchemaBootstrapper {
    /// Creates a bootstrapper for `bucket.scope`.
    pub fn new(
        cluster: Arc<dyn Cluster>,
        bucket: impl Into<String>,
        scope: impl Into<String>,
        config: BootstrapConfig,
    ) -> Self {
        Self { cluster, bucket: bucket.into(), scope: scope.into(), config }
    }

    /// Ensures every collection in `catalog` exists with a servable primary
    /// index.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Bootstrap`] if a collection cannot be
    /// created, a retry deadline is exhausted, a non-transient index error
    /// occurs, or the bucket does not become ready in time.
    #[tracing::instrument(
        skip(self, catalog),
        fields(bucket = %self.bucket, scope = %self.scope, collections = catalog.len())
    )]
    pub async fn ensure(&self, catalog: &CollectionCatalog) -> Result<BootstrapReport> {
        self.ensure_bucket_index().await;

        let mut report = BootstrapReport::default();
        for name in catalog.iter() {
            if self.ensure_collection(name).await? {
                report.created_collections.push(name.to_owned());
            } else {
                report.existing_collections.push(name.to_owned());
            }
        }

        for name in catalog.iter() {
            self.ensure_collection_index(name).await?;
        }
        for name in catalog.iter() {
            self.await_collection_index(name).await?;
        }

        self.cluster
            .wait_until_ready(&self.bucket, self.config.bucket_ready_timeout)
            .await
            .map_err(|e| {
                PersistenceError::bootstrap(BootstrapStage::WaitUntilReady, &self.bucket, e)
            })?;

        tracing::info!(
            created = report.created_collections.len(),
            existing = report.existing_collections.len(),
            "schema bootstrap complete",
        );
        Ok(report)
    }

    fn keyspace(&self, collection: &str) -> Keyspace {
        Keyspace::new(&self.bucket, &self.scope, collection)
    }

    async fn ensure_bucket_index(&self) {
        let target = IndexTarget::Bucket(self.bucket.clone());
        match self.cluster.create_primary_index(&target, PrimaryIndexOptions::default()).await {
            Ok(()) => tracing::info!(target = %target, "created bucket primary index"),
            Err(StoreError::IndexExists { .. }) => {
                tracing::info!(target = %target, "bucket primary index already exists");
            },
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "bucket primary index not created");
            },
        }
    }

    /// Returns `true` if the collection was created, `false` if it existed.
    #[tracing::instrument(skip(self))]
    async fn ensure_collection(&self, name: &str) -> Result<bool> {
        match self.cluster.create_collection(&self.keyspace(name)).await {
            Ok(()) => {
                tracing::info!(collection = name, "created collection");
                Ok(true)
            },
            Err(StoreError::CollectionExists { .. }) => {
                tracing::info!(collection = name, "collection already exists");
                Ok(false)
            },
            Err(e) => Err(PersistenceError::bootstrap(BootstrapStage::CreateCollection, name, e)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn ensure_collection_index(&self, name: &str) -> Result<()> {
        let target = IndexTarget::Collection(self.keyspace(name));
        let options = PrimaryIndexOptions { ignore_if_exists: true, num_replicas: 0 };
        let cluster = &self.cluster;

        retry_while(
            &self.config.index_create,
            "create_primary_index",
            StoreError::is_index_building,
            || cluster.create_primary_index(&target, options),
        )
        .await
        .map_err(|e| stage_error(BootstrapStage::CreatePrimaryIndex, name, e))?;

        tracing::info!(collection = name, "primary index created");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn await_collection_index(&self, name: &str) -> Result<()> {
        let target = IndexTarget::Collection(self.keyspace(name));
        let timeout = self.config.watch_timeout;
        let cluster = &self.cluster;

        retry_while(
            &self.config.index_watch,
            "watch_primary_index",
            StoreError::is_index_not_found,
            || cluster.watch_primary_index(&target, timeout),
        )
        .await
        .map_err(|e| stage_error(BootstrapStage::WatchPrimaryIndex, name, e))?;

        tracing::debug!(collection = name, "primary index online");
        Ok(())
    }
}

fn stage_error(
    stage: BootstrapStage,
    target: &str,
    err: RetryError<StoreError>,
) -> PersistenceError {
    match err {
        RetryError::Rejected(e) => PersistenceError::bootstrap(stage, target, e),
        other => PersistenceError::bootstrap(stage, target, other),
    }
}
