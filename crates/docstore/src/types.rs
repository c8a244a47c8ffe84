//! Namespace, document and mutation types shared by every store backend.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use zeroize::Zeroizing;

/// Absolute instant at which the store reaps a document.
pub type Expiry = DateTime<Utc>;

/// A fully qualified `bucket.scope.collection` path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keyspace {
    bucket: String,
    scope: String,
    collection: String,
}

impl Keyspace {
    /// Creates a keyspace from its three namespace levels.
    pub fn new(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self { bucket: bucket.into(), scope: scope.into(), collection: collection.into() }
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

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`.`{}`.`{}`", self.bucket, self.scope, self.collection)
    }
}

/// What a primary index is built over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexTarget {
    /// The bucket's default collection.
    Bucket(String),
    /// A named collection.
    Collection(Keyspace),
}

impl IndexTarget {
    /// Returns the bucket this target lives in.
    #[must_use]
    pub fn bucket(&self) -> &str {
        match self {
            Self::Bucket(bucket) => bucket,
            Self::Collection(keyspace) => keyspace.bucket(),
        }
    }
}

impl fmt::Display for IndexTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bucket(bucket) => write!(f, "`{bucket}`"),
            Self::Collection(keyspace) => keyspace.fmt(f),
        }
    }
}

/// Options for [`Cluster::create_primary_index`](crate::Cluster::create_primary_index).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimaryIndexOptions {
    /// Succeed silently when the index already exists.
    pub ignore_if_exists: bool,
    /// Number of index replicas to maintain.
    pub num_replicas: u32,
}

/// Username and password used to authenticate against the cluster.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
}

impl Credentials {
    /// Creates credentials from a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: Zeroizing::new(password.into()) }
    }

    /// Returns the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A document read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// The document id (primary key within its collection).
    pub id: String,
    /// The JSON body.
    pub content: Value,
    /// Compare-and-swap token, changes on every mutation.
    pub cas: u64,
    /// Store-level expiry, if any.
    pub expiry: Option<Expiry>,
}

impl Document {
    /// Decodes the document body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`](crate::StoreError::Serialization)
    /// if the body does not match `T`.
    pub fn content_as<T: serde::de::DeserializeOwned>(&self) -> crate::StoreResult<T> {
        serde_json::from_value(self.content.clone()).map_err(Into::into)
    }
}

/// One sub-document mutation applied by
/// [`Cluster::mutate_in`](crate::Cluster::mutate_in).
#[derive(Debug, Clone, PartialEq)]
pub enum MutateInSpec {
    /// Replace an existing top-level field. Fails when the field is absent.
    Replace {
        /// Field name.
        path: String,
        /// New value.
        value: Value,
    },
    /// Set a top-level field, creating it if absent.
    Upsert {
        /// Field name.
        path: String,
        /// New value.
        value: Value,
    },
}

impl MutateInSpec {
    /// Creates a `Replace` spec.
    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Replace { path: path.into(), value: value.into() }
    }

    /// Creates an `Upsert` spec.
    pub fn upsert(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Upsert { path: path.into(), value: value.into() }
    }

    /// Returns the path this spec targets.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Replace { path, .. } | Self::Upsert { path, .. } => path,
        }
    }
}

/// Consistency level of a query relative to preceding mutations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanConsistency {
    /// Whatever the index has at query time.
    #[default]
    NotBounded,
    /// Wait until the index has every mutation issued before the query.
    RequestPlus,
}
