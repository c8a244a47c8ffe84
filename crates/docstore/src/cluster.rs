//! Cluster trait definition.
//!
//! [`Cluster`] is the narrow slice of a document-store client library that
//! the persistence layer relies on: bucket and collection management,
//! primary-index management, key-value access with per-document expiry,
//! sub-document mutation and declarative queries.
//!
//! # Semantics Every Backend Must Honor
//!
//! - `insert` is insert-if-absent and fails with
//!   [`DocumentExists`](crate::StoreError::DocumentExists) on a duplicate id.
//! - `mutate_in` is atomic per document and preserves the document's
//!   existing expiry.
//! - A document is invisible to `get` and `query` from its expiry instant on.
//! - `query` fails with [`IndexNotFound`](crate::StoreError::IndexNotFound)
//!   when the collection has no online primary index.
//! - After `close`, every call fails with
//!   [`Connection`](crate::StoreError::Connection).

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::{
    error::{StoreError, StoreResult},
    query::{Query, QueryResult},
    types::{
        Credentials, Document, Expiry, IndexTarget, Keyspace, MutateInSpec, PrimaryIndexOptions,
    },
};

/// An open session against a document-store cluster.
///
/// Implementations must be thread-safe; a single session is shared by every
/// lifecycle store in the process.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Opens a bucket, failing with
    /// [`BucketNotFound`](StoreError::BucketNotFound) if it does not exist.
    async fn open_bucket(&self, bucket: &str) -> StoreResult<()>;

    /// Returns whether `scope` exists in `bucket`.
    async fn scope_exists(&self, bucket: &str, scope: &str) -> StoreResult<bool>;

    /// Creates a scope, failing with [`ScopeExists`](StoreError::ScopeExists)
    /// if it is already present.
    async fn create_scope(&self, bucket: &str, scope: &str) -> StoreResult<()>;

    /// Creates a collection, failing with
    /// [`CollectionExists`](StoreError::CollectionExists) if it is already
    /// present.
    async fn create_collection(&self, keyspace: &Keyspace) -> StoreResult<()>;

    /// Requests creation of the primary index on `target`.
    ///
    /// Acceptance does not imply the index is queryable; see
    /// [`watch_primary_index`](Self::watch_primary_index).
    async fn create_primary_index(
        &self,
        target: &IndexTarget,
        options: PrimaryIndexOptions,
    ) -> StoreResult<()>;

    /// Waits until the primary index on `target` is online.
    ///
    /// Fails with [`IndexNotFound`](StoreError::IndexNotFound) while the
    /// index is not yet visible, or [`Timeout`](StoreError::Timeout) when it
    /// is visible but not online within `timeout`.
    async fn watch_primary_index(&self, target: &IndexTarget, timeout: Duration)
    -> StoreResult<()>;

    /// Waits until every index in `bucket` is online.
    async fn wait_until_ready(&self, bucket: &str, timeout: Duration) -> StoreResult<()>;

    /// Fetches a document, returning `None` if it is absent or expired.
    async fn get(&self, keyspace: &Keyspace, id: &str) -> StoreResult<Option<Document>>;

    /// Inserts a new document with an optional store-level expiry.
    ///
    /// Returns the new CAS value.
    async fn insert(
        &self,
        keyspace: &Keyspace,
        id: &str,
        content: Value,
        expiry: Option<Expiry>,
    ) -> StoreResult<u64>;

    /// Applies sub-document mutations atomically.
    ///
    /// When `cas` is set the mutation only applies if the document's CAS is
    /// unchanged, failing with [`CasMismatch`](StoreError::CasMismatch)
    /// otherwise. Returns the new CAS value.
    async fn mutate_in(
        &self,
        keyspace: &Keyspace,
        id: &str,
        specs: &[MutateInSpec],
        cas: Option<u64>,
    ) -> StoreResult<u64>;

    /// Executes a declarative query.
    async fn query(&self, query: &Query) -> StoreResult<QueryResult>;

    /// Closes the session. Further calls fail.
    async fn close(&self) -> StoreResult<()>;
}

/// Factory for [`Cluster`] sessions.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Connects and authenticates against `connection_string`.
    async fn connect(
        &self,
        connection_string: &str,
        credentials: &Credentials,
    ) -> StoreResult<Arc<dyn Cluster>>;
}

/// A cluster session bound to one collection.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct Collection {
    cluster: Arc<dyn Cluster>,
    keyspace: Keyspace,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("keyspace", &self.keyspace).finish_non_exhaustive()
    }
}

impl Collection {
    /// Binds `cluster` to `keyspace`.
    pub fn new(cluster: Arc<dyn Cluster>, keyspace: Keyspace) -> Self {
        Self { cluster, keyspace }
    }

    /// Returns the bound keyspace.
    #[must_use]
    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.keyspace.collection()
    }

    /// Fetches a document by id.
    pub async fn get(&self, id: &str) -> StoreResult<Option<Document>> {
        self.cluster.get(&self.keyspace, id).await
    }

    /// Serializes `content` and inserts it under `id`.
    pub async fn insert<T: Serialize + Sync>(
        &self,
        id: &str,
        content: &T,
        expiry: Option<Expiry>,
    ) -> StoreResult<u64> {
        let value = serde_json::to_value(content)
            .map_err(|e| StoreError::serialization_with_source("failed to encode document", e))?;
        self.cluster.insert(&self.keyspace, id, value, expiry).await
    }

    /// Applies sub-document mutations to `id`.
    pub async fn mutate_in(
        &self,
        id: &str,
        specs: &[MutateInSpec],
        cas: Option<u64>,
    ) -> StoreResult<u64> {
        self.cluster.mutate_in(&self.keyspace, id, specs, cas).await
    }

    /// Starts a whole-document query against this collection.
    #[must_use]
    pub fn select(&self) -> Query {
        Query::select(self.keyspace.clone())
    }

    /// Starts a count query against this collection.
    #[must_use]
    pub fn count(&self) -> Query {
        Query::count(self.keyspace.clone())
    }

    /// Executes a query built from [`select`](Self::select) or
    /// [`count`](Self::count).
    pub async fn query(&self, query: &Query) -> StoreResult<QueryResult> {
        self.cluster.query(query).await
    }
}
