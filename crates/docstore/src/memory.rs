//! In-memory cluster implementation.
//!
//! This module provides [`MemoryCluster`], an in-memory implementation of
//! [`Cluster`] suitable for testing and development, and [`MemoryConnector`],
//! the matching [`ClusterConnector`].
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Ordered storage**: Documents are kept in a [`BTreeMap`] so query results
//!   come back ordered by id
//! - **TTL support**: Expired documents are invisible immediately and a
//!   background task reaps them
//! - **Index convergence**: [`IndexConvergence`] makes freshly created primary
//!   indexes report "still building" and "not found" for a configurable number
//!   of calls, mirroring an index service that accepts a definition before it
//!   can serve it
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Queries are always consistent, so every [`ScanConsistency`](crate::ScanConsistency)
//!   behaves like `RequestPlus`
//! - TTL cleanup runs every second, so physical removal is not precise

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use fail::fail_point;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::{select, sync::watch, time::sleep};

use crate::{
    cluster::{Cluster, ClusterConnector},
    error::{StoreError, StoreResult},
    query::{Projection, Query, QueryResult},
    types::{
        Credentials, Document, Expiry, IndexTarget, Keyspace, MutateInSpec, PrimaryIndexOptions,
    },
};

const DEFAULT_SCOPE: &str = "_default";
const DEFAULT_COLLECTION: &str = "_default";

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// How a freshly created primary index converges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexConvergence {
    /// Number of create requests per target rejected as "still building"
    /// before one is accepted.
    pub create_failures: u32,
    /// Number of watch calls per target answered with "index not found"
    /// after the create is accepted.
    pub watch_misses: u32,
    /// The index never comes online; watches and readiness waits time out.
    pub never_online: bool,
}

struct StoredDocument {
    content: Value,
    cas: u64,
    expiry: Option<Expiry>,
}

impl StoredDocument {
    fn is_expired(&self, now: Expiry) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

#[derive(Default)]
struct CollectionData {
    documents: BTreeMap<String, StoredDocument>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexState {
    Pending { watch_misses_left: u32 },
    Online,
}

struct BucketData {
    scopes: BTreeMap<String, BTreeMap<String, CollectionData>>,
    indexes: BTreeMap<IndexTarget, IndexState>,
    create_attempts: BTreeMap<IndexTarget, u32>,
}

impl BucketData {
    fn new() -> Self {
        let mut default_scope = BTreeMap::new();
        default_scope.insert(DEFAULT_COLLECTION.to_owned(), CollectionData::default());
        let mut scopes = BTreeMap::new();
        scopes.insert(DEFAULT_SCOPE.to_owned(), default_scope);
        Self { scopes, indexes: BTreeMap::new(), create_attempts: BTreeMap::new() }
    }

    fn collection(&self, keyspace: &Keyspace) -> StoreResult<&CollectionData> {
        self.scopes
            .get(keyspace.scope())
            .ok_or_else(|| StoreError::ScopeNotFound { scope: keyspace.scope().to_owned() })?
            .get(keyspace.collection())
            .ok_or_else(|| StoreError::CollectionNotFound {
                collection: keyspace.collection().to_owned(),
            })
    }

    fn collection_mut(&mut self, keyspace: &Keyspace) -> StoreResult<&mut CollectionData> {
        self.scopes
            .get_mut(keyspace.scope())
            .ok_or_else(|| StoreError::ScopeNotFound { scope: keyspace.scope().to_owned() })?
            .get_mut(keyspace.collection())
            .ok_or_else(|| StoreError::CollectionNotFound {
                collection: keyspace.collection().to_owned(),
            })
    }

    fn has_target(&self, target: &IndexTarget) -> bool {
        match target {
            IndexTarget::Bucket(_) => true,
            IndexTarget::Collection(keyspace) => self.collection(keyspace).is_ok(),
        }
    }
}

type Catalog = BTreeMap<String, BucketData>;

/// In-memory document-store cluster.
///
/// # Cloning and Sessions
///
/// Clones share both the data and the session state. Use
/// [`session`](Self::session) to obtain a new session over the same data
/// whose [`close`](Cluster::close) does not affect other sessions; this is
/// what [`MemoryConnector`] hands out on every connect.
///
/// # Shutdown
///
/// The background TTL cleanup task stops automatically when all clones and
/// sessions are dropped.
#[derive(Clone)]
pub struct MemoryCluster {
    catalog: Arc<RwLock<Catalog>>,
    convergence: IndexConvergence,
    next_cas: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    _shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryCluster {
    /// Creates an empty cluster with no buckets.
    ///
    /// Spawns the TTL cleanup task, so this must be called from within a
    /// Tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let cluster = Self {
            catalog: Arc::new(RwLock::new(BTreeMap::new())),
            convergence: IndexConvergence::default(),
            next_cas: Arc::new(AtomicU64::new(1)),
            closed: Arc::new(AtomicBool::new(false)),
            _shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        let catalog = Arc::clone(&cluster.catalog);
        tokio::spawn(async move {
            cleanup_expired_documents(catalog, shutdown_rx).await;
        });

        cluster
    }

    /// Sets how newly created primary indexes converge.
    #[must_use]
    pub fn with_convergence(mut self, convergence: IndexConvergence) -> Self {
        self.convergence = convergence;
        self
    }

    /// Creates a bucket with its `_default` scope and collection.
    ///
    /// Does nothing if the bucket already exists.
    #[must_use]
    pub fn with_bucket(self, bucket: &str) -> Self {
        self.create_bucket(bucket);
        self
    }

    /// Creates a bucket with its `_default` scope and collection.
    pub fn create_bucket(&self, bucket: &str) {
        self.catalog.write().entry(bucket.to_owned()).or_insert_with(BucketData::new);
    }

    /// Returns a new session over the same data.
    #[must_use]
    pub fn session(&self) -> Self {
        Self { closed: Arc::new(AtomicBool::new(false)), ..self.clone() }
    }

    /// Returns whether this session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the collection names in `bucket.scope`, sorted.
    #[must_use]
    pub fn collection_names(&self, bucket: &str, scope: &str) -> Vec<String> {
        self.catalog
            .read()
            .get(bucket)
            .and_then(|b| b.scopes.get(scope))
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of primary indexes defined in `bucket`.
    #[must_use]
    pub fn index_count(&self, bucket: &str) -> usize {
        self.catalog.read().get(bucket).map_or(0, |b| b.indexes.len())
    }

    /// Returns whether the primary index on `target` is online.
    #[must_use]
    pub fn is_index_online(&self, target: &IndexTarget) -> bool {
        self.catalog
            .read()
            .get(target.bucket())
            .and_then(|b| b.indexes.get(target))
            .is_some_and(|state| *state == IndexState::Online)
    }

    /// Returns how many create requests `target` has received.
    #[must_use]
    pub fn create_attempts(&self, target: &IndexTarget) -> u32 {
        self.catalog
            .read()
            .get(target.bucket())
            .and_then(|b| b.create_attempts.get(target).copied())
            .unwrap_or(0)
    }

    /// Returns the number of documents physically held in `keyspace`,
    /// including expired ones not yet reaped.
    #[must_use]
    pub fn stored_document_count(&self, keyspace: &Keyspace) -> usize {
        self.catalog
            .read()
            .get(keyspace.bucket())
            .and_then(|b| b.collection(keyspace).ok())
            .map_or(0, |c| c.documents.len())
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::connection("cluster session is closed"));
        }
        Ok(())
    }

    fn next_cas(&self) -> u64 {
        self.next_cas.fetch_add(1, Ordering::Relaxed)
    }

    fn with_bucket_mut<T>(
        &self,
        bucket: &str,
        f: impl FnOnce(&mut BucketData) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut catalog = self.catalog.write();
        let data = catalog
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound { bucket: bucket.to_owned() })?;
        f(data)
    }

    fn with_bucket_ref<T>(
        &self,
        bucket: &str,
        f: impl FnOnce(&BucketData) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let catalog = self.catalog.read();
        let data = catalog
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound { bucket: bucket.to_owned() })?;
        f(data)
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task that reaps expired documents once per second.
async fn cleanup_expired_documents(
    catalog: Arc<RwLock<Catalog>>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(Duration::from_secs(1)) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let now = Utc::now();
        let mut catalog = catalog.write();
        for bucket in catalog.values_mut() {
            for collections in bucket.scopes.values_mut() {
                for collection in collections.values_mut() {
                    collection.documents.retain(|_, doc| !doc.is_expired(now));
                }
            }
        }
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    #[tracing::instrument(skip(self))]
    async fn open_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.ensure_open()?;
        fail_point!("memory-open-bucket", |_| Err(StoreError::connection(
            "injected open_bucket failure"
        )));
        self.with_bucket_ref(bucket, |_| Ok(()))
    }

    #[tracing::instrument(skip(self))]
    async fn scope_exists(&self, bucket: &str, scope: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        self.with_bucket_ref(bucket, |data| Ok(data.scopes.contains_key(scope)))
    }

    #[tracing::instrument(skip(self))]
    async fn create_scope(&self, bucket: &str, scope: &str) -> StoreResult<()> {
        self.ensure_open()?;
        self.with_bucket_mut(bucket, |data| {
            if data.scopes.contains_key(scope) {
                return Err(StoreError::ScopeExists { scope: scope.to_owned() });
            }
            data.scopes.insert(scope.to_owned(), BTreeMap::new());
            Ok(())
        })
    }

    #[tracing::instrument(skip(self), fields(keyspace = %keyspace))]
    async fn create_collection(&self, keyspace: &Keyspace) -> StoreResult<()> {
        self.ensure_open()?;
        fail_point!("memory-create-collection", |_| Err(StoreError::internal(
            "injected create_collection failure"
        )));
        self.with_bucket_mut(keyspace.bucket(), |data| {
            let collections = data
                .scopes
                .get_mut(keyspace.scope())
                .ok_or_else(|| StoreError::ScopeNotFound { scope: keyspace.scope().to_owned() })?;
            if collections.contains_key(keyspace.collection()) {
                return Err(StoreError::CollectionExists {
                    collection: keyspace.collection().to_owned(),
                });
            }
            collections.insert(keyspace.collection().to_owned(), CollectionData::default());
            Ok(())
        })
    }

    #[tracing::instrument(skip(self), fields(target = %target))]
    async fn create_primary_index(
        &self,
        target: &IndexTarget,
        options: PrimaryIndexOptions,
    ) -> StoreResult<()> {
        self.ensure_open()?;
        let convergence = self.convergence;
        self.with_bucket_mut(target.bucket(), |data| {
            if !data.has_target(target) {
                return Err(StoreError::internal(format!("keyspace not found: {target}")));
            }

            let attempts = data.create_attempts.entry(target.clone()).or_insert(0);
            *attempts += 1;
            fail_point!("memory-create-primary-index", |_| Err(StoreError::internal(
                "injected create_primary_index failure"
            )));
            if *attempts <= convergence.create_failures {
                return Err(StoreError::from_internal_server_failure(
                    target.to_string(),
                    "GSI CreatePrimaryIndex() - cause: Build Already In Progress",
                ));
            }

            if data.indexes.contains_key(target) {
                if options.ignore_if_exists {
                    return Ok(());
                }
                return Err(StoreError::IndexExists { target: target.to_string() });
            }

            let state = if convergence.watch_misses > 0 || convergence.never_online {
                IndexState::Pending { watch_misses_left: convergence.watch_misses }
            } else {
                IndexState::Online
            };
            data.indexes.insert(target.clone(), state);
            Ok(())
        })
    }

    #[tracing::instrument(skip(self), fields(target = %target))]
    async fn watch_primary_index(
        &self,
        target: &IndexTarget,
        timeout: Duration,
    ) -> StoreResult<()> {
        self.ensure_open()?;
        let never_online = self.convergence.never_online;
        let pending = self.with_bucket_mut(target.bucket(), |data| {
            let state = data
                .indexes
                .get_mut(target)
                .ok_or_else(|| StoreError::index_not_found(target.to_string()))?;
            let current = *state;
            match current {
                IndexState::Online => Ok(false),
                IndexState::Pending { watch_misses_left } if watch_misses_left > 0 => {
                    *state = IndexState::Pending { watch_misses_left: watch_misses_left - 1 };
                    Err(StoreError::index_not_found(target.to_string()))
                },
                IndexState::Pending { .. } if never_online => Ok(true),
                IndexState::Pending { .. } => {
                    *state = IndexState::Online;
                    Ok(false)
                },
            }
        })?;

        if pending {
            sleep(timeout).await;
            return Err(StoreError::timeout("watch_primary_index", timeout));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn wait_until_ready(&self, bucket: &str, timeout: Duration) -> StoreResult<()> {
        self.ensure_open()?;
        let never_online = self.convergence.never_online;
        let pending = self.with_bucket_mut(bucket, |data| {
            let any_pending = data.indexes.values().any(|state| *state != IndexState::Online);
            if any_pending && never_online {
                return Ok(true);
            }
            for state in data.indexes.values_mut() {
                *state = IndexState::Online;
            }
            Ok(false)
        })?;

        if pending {
            sleep(timeout).await;
            return Err(StoreError::timeout("wait_until_ready", timeout));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(keyspace = %keyspace))]
    async fn get(&self, keyspace: &Keyspace, id: &str) -> StoreResult<Option<Document>> {
        self.ensure_open()?;
        let now = Utc::now();
        self.with_bucket_ref(keyspace.bucket(), |data| {
            let collection = data.collection(keyspace)?;
            Ok(collection.documents.get(id).filter(|doc| !doc.is_expired(now)).map(|doc| {
                Document {
                    id: id.to_owned(),
                    content: doc.content.clone(),
                    cas: doc.cas,
                    expiry: doc.expiry,
                }
            }))
        })
    }

    #[tracing::instrument(skip(self, content), fields(keyspace = %keyspace))]
    async fn insert(
        &self,
        keyspace: &Keyspace,
        id: &str,
        content: Value,
        expiry: Option<Expiry>,
    ) -> StoreResult<u64> {
        self.ensure_open()?;
        fail_point!("memory-insert", |_| Err(StoreError::internal("injected insert failure")));
        let now = Utc::now();
        let cas = self.next_cas();
        self.with_bucket_mut(keyspace.bucket(), |data| {
            let collection = data.collection_mut(keyspace)?;
            if collection.documents.get(id).is_some_and(|doc| !doc.is_expired(now)) {
                return Err(StoreError::document_exists(id));
            }
            collection.documents.insert(id.to_owned(), StoredDocument { content, cas, expiry });
            Ok(cas)
        })
    }

    #[tracing::instrument(
        skip(self, specs),
        fields(keyspace = %keyspace, spec_count = specs.len())
    )]
    async fn mutate_in(
        &self,
        keyspace: &Keyspace,
        id: &str,
        specs: &[MutateInSpec],
        cas: Option<u64>,
    ) -> StoreResult<u64> {
        self.ensure_open()?;
        fail_point!("memory-mutate-in", |_| Err(StoreError::internal(
            "injected mutate_in failure"
        )));
        let now = Utc::now();
        let new_cas = self.next_cas();
        self.with_bucket_mut(keyspace.bucket(), |data| {
            let collection = data.collection_mut(keyspace)?;
            let doc = collection
                .documents
                .get_mut(id)
                .filter(|doc| !doc.is_expired(now))
                .ok_or_else(|| StoreError::document_not_found(id))?;

            if let Some(expected) = cas
                && expected != doc.cas
            {
                return Err(StoreError::cas_mismatch(id));
            }

            let fields = doc.content.as_object_mut().ok_or_else(|| {
                StoreError::internal(format!("document {id} is not a JSON object"))
            })?;

            // Validate every spec before applying any so the mutation is atomic.
            for spec in specs {
                if let MutateInSpec::Replace { path, .. } = spec
                    && !fields.contains_key(path)
                {
                    return Err(StoreError::PathNotFound { id: id.to_owned(), path: path.clone() });
                }
            }
            for spec in specs {
                match spec {
                    MutateInSpec::Replace { path, value }
                    | MutateInSpec::Upsert { path, value } => {
                        fields.insert(path.clone(), value.clone());
                    },
                }
            }

            doc.cas = new_cas;
            Ok(new_cas)
        })
    }

    #[tracing::instrument(skip(self, query), fields(keyspace = %query.keyspace()))]
    async fn query(&self, query: &Query) -> StoreResult<QueryResult> {
        self.ensure_open()?;
        let keyspace = query.keyspace();
        let now = Utc::now();
        self.with_bucket_ref(keyspace.bucket(), |data| {
            let collection = data.collection(keyspace)?;
            let target = IndexTarget::Collection(keyspace.clone());
            if data.indexes.get(&target) != Some(&IndexState::Online) {
                return Err(StoreError::index_not_found(target.to_string()));
            }

            let matching = collection
                .documents
                .values()
                .filter(|doc| !doc.is_expired(now) && query.matches(&doc.content));

            let rows = match query.projection() {
                Projection::Count => vec![json!({ "count": matching.count() })],
                Projection::Documents => {
                    let offset = query.offset_value().map_or(0, saturating_usize);
                    let limit = query.limit_value().map_or(usize::MAX, saturating_usize);
                    matching.skip(offset).take(limit).map(|doc| doc.content.clone()).collect()
                },
            };
            Ok(QueryResult::new(rows))
        })
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

fn saturating_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// [`ClusterConnector`] that hands out sessions over a shared [`MemoryCluster`].
///
/// Records every connection attempt so tests can assert on how often and
/// with which connection string the persistence layer connected.
pub struct MemoryConnector {
    cluster: MemoryCluster,
    expected: Option<Credentials>,
    connects: AtomicU32,
    sessions: Mutex<Vec<MemoryCluster>>,
    last_connection_string: Mutex<Option<String>>,
}

impl MemoryConnector {
    /// Creates a connector that accepts any credentials.
    #[must_use]
    pub fn new(cluster: MemoryCluster) -> Self {
        Self {
            cluster,
            expected: None,
            connects: AtomicU32::new(0),
            sessions: Mutex::new(Vec::new()),
            last_connection_string: Mutex::new(None),
        }
    }

    /// Only accepts exactly these credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.expected = Some(credentials);
        self
    }

    /// Returns the shared cluster.
    #[must_use]
    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }

    /// Returns the number of connection attempts, successful or not.
    #[must_use]
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::Acquire)
    }

    /// Returns every session handed out so far.
    #[must_use]
    pub fn sessions(&self) -> Vec<MemoryCluster> {
        self.sessions.lock().clone()
    }

    /// Returns the connection string of the most recent attempt.
    #[must_use]
    pub fn last_connection_string(&self) -> Option<String> {
        self.last_connection_string.lock().clone()
    }
}

#[async_trait]
impl ClusterConnector for MemoryConnector {
    #[tracing::instrument(skip(self, credentials), fields(username = credentials.username()))]
    async fn connect(
        &self,
        connection_string: &str,
        credentials: &Credentials,
    ) -> StoreResult<Arc<dyn Cluster>> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        *self.last_connection_string.lock() = Some(connection_string.to_owned());

        // Let concurrent callers interleave here the way a network round trip would.
        tokio::task::yield_now().await;

        fail_point!("memory-connect", |_| Err(StoreError::connection("injected connect failure")));

        if !(connection_string.starts_with("couchbase://")
            || connection_string.starts_with("couchbases://"))
        {
            return Err(StoreError::connection(format!(
                "unsupported connection string: {connection_string}"
            )));
        }

        if let Some(expected) = &self.expected
            && (expected.username() != credentials.username()
                || expected.password() != credentials.password())
        {
            return Err(StoreError::Authentication { username: credentials.username().to_owned() });
        }

        let session = self.cluster.session();
        self.sessions.lock().push(session.clone());
        Ok(Arc::new(session))
    }
}
