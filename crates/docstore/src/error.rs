//! Store error types and result alias.
//!
//! Every [`Cluster`](crate::Cluster) implementation maps its client-library
//! failures onto [`StoreError`]. The persistence layer classifies these
//! errors to decide what is retried during schema bootstrap and what is
//! surfaced to the host.
//!
//! # Error Classes
//!
//! | Class | Variants |
//! |-------|----------|
//! | Key-value | [`DocumentNotFound`](StoreError::DocumentNotFound), [`DocumentExists`](StoreError::DocumentExists), [`CasMismatch`](StoreError::CasMismatch), [`PathNotFound`](StoreError::PathNotFound) |
//! | Management | [`BucketNotFound`](StoreError::BucketNotFound), [`ScopeExists`](StoreError::ScopeExists), [`ScopeNotFound`](StoreError::ScopeNotFound), [`CollectionExists`](StoreError::CollectionExists), [`CollectionNotFound`](StoreError::CollectionNotFound) |
//! | Index | [`IndexExists`](StoreError::IndexExists), [`IndexNotFound`](StoreError::IndexNotFound), [`IndexBuilding`](StoreError::IndexBuilding) |
//! | Transport | [`Authentication`](StoreError::Authentication), [`Connection`](StoreError::Connection), [`Timeout`](StoreError::Timeout) |
//!
//! # Example
//!
//! ```
//! use idsvr_docstore::{StoreError, StoreResult};
//!
//! fn lookup(id: &str) -> StoreResult<()> {
//!     Err(StoreError::document_not_found(id))
//! }
//!
//! assert!(matches!(lookup("abc"), Err(StoreError::DocumentNotFound { .. })));
//! ```

use std::{sync::Arc, time::Duration};

use thiserror::Error;

/// A shared error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the document store.
///
/// Errors preserve their source chain via the `#[source]` attribute so the
/// underlying client-library failure stays visible in logs.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No document with the given id exists in the keyspace.
    #[error("Document not found: {id}")]
    DocumentNotFound {
        /// The document id that was looked up.
        id: String,
    },

    /// An insert collided with an existing document.
    #[error("Document already exists: {id}")]
    DocumentExists {
        /// The conflicting document id.
        id: String,
    },

    /// A mutation carried a CAS value that no longer matches the document.
    #[error("CAS mismatch for document: {id}")]
    CasMismatch {
        /// The document id whose CAS changed.
        id: String,
    },

    /// A sub-document `replace` named a path that is absent.
    #[error("Path '{path}' not found in document {id}")]
    PathNotFound {
        /// The document id.
        id: String,
        /// The missing path.
        path: String,
    },

    /// The configured bucket does not exist on the cluster.
    #[error("Bucket not found: {bucket}")]
    BucketNotFound {
        /// The bucket name.
        bucket: String,
    },

    /// The scope already exists.
    #[error("Scope already exists: {scope}")]
    ScopeExists {
        /// The scope name.
        scope: String,
    },

    /// The scope does not exist.
    #[error("Scope not found: {scope}")]
    ScopeNotFound {
        /// The scope name.
        scope: String,
    },

    /// The collection does not exist.
    #[error("Collection not found: {collection}")]
    CollectionNotFound {
        /// The collection name.
        collection: String,
    },

    /// The collection already exists.
    #[error("Collection already exists: {collection}")]
    CollectionExists {
        /// The collection name.
        collection: String,
    },

    /// A primary index already exists on the target.
    #[error("Index already exists on {target}")]
    IndexExists {
        /// The index target, rendered as a keyspace path.
        target: String,
    },

    /// The index is not (yet) visible on the target.
    ///
    /// Right after a create request this is transient: the index service
    /// has accepted the definition but not yet published it.
    #[error("Index not found on {target}")]
    IndexNotFound {
        /// The index target, rendered as a keyspace path.
        target: String,
    },

    /// The index service rejected the request because it is still
    /// converging (an internal server failure mentioning GSI).
    #[error("Index service still building on {target}: {message}")]
    IndexBuilding {
        /// The index target, rendered as a keyspace path.
        target: String,
        /// Server-provided detail.
        message: String,
    },

    /// The cluster rejected the supplied credentials.
    #[error("Authentication failed for user {username}")]
    Authentication {
        /// The username that was rejected.
        username: String,
    },

    /// Network or connection-related failure, including use after close.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Document content could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Catch-all for backend failures that fit no other class.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// An operation did not complete within its time limit.
    #[error("Operation timed out after {elapsed:?}: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The time limit that was exceeded.
        elapsed: Duration,
    },
}

impl StoreError {
    /// Creates a new `DocumentNotFound` error.
    #[must_use]
    pub fn document_not_found(id: impl Into<String>) -> Self {
        Self::DocumentNotFound { id: id.into() }
    }

    /// Creates a new `DocumentExists` error.
    #[must_use]
    pub fn document_exists(id: impl Into<String>) -> Self {
        Self::DocumentExists { id: id.into() }
    }

    /// Creates a new `CasMismatch` error.
    #[must_use]
    pub fn cas_mismatch(id: impl Into<String>) -> Self {
        Self::CasMismatch { id: id.into() }
    }

    /// Creates a new `IndexBuilding` error.
    #[must_use]
    pub fn index_building(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IndexBuilding { target: target.into(), message: message.into() }
    }

    /// Creates a new `IndexNotFound` error.
    #[must_use]
    pub fn index_not_found(target: impl Into<String>) -> Self {
        Self::IndexNotFound { target: target.into() }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout { operation: operation.into(), elapsed }
    }

    /// Maps a server-side internal failure onto the store taxonomy.
    ///
    /// The index service reports "still building" as a generic internal
    /// failure whose message mentions GSI; that shape is promoted to
    /// [`IndexBuilding`](Self::IndexBuilding) so it can be retried.
    #[must_use]
    pub fn from_internal_server_failure(
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        if message.contains("GSI") {
            Self::IndexBuilding { target: target.into(), message }
        } else {
            Self::Internal { message, source: None }
        }
    }

    /// Returns `true` when the index service is still converging.
    #[must_use]
    pub fn is_index_building(&self) -> bool {
        matches!(self, Self::IndexBuilding { .. })
    }

    /// Returns `true` when an index is not yet visible.
    #[must_use]
    pub fn is_index_not_found(&self) -> bool {
        matches!(self, Self::IndexNotFound { .. })
    }

    /// Returns `true` for failures of the "already exists" class.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Self::DocumentExists { .. }
                | Self::ScopeExists { .. }
                | Self::CollectionExists { .. }
                | Self::IndexExists { .. }
        )
    }

    /// Returns `true` for errors that may succeed if the request is repeated
    /// without any change on the caller's side.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::IndexBuilding { .. }
                | Self::IndexNotFound { .. }
                | Self::Connection { .. }
                | Self::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source("invalid document content", err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_gsi_internal_failure_is_index_building() {
        let err = StoreError::from_internal_server_failure(
            "`curity`.`_default`.`curity-nonces`",
            "GSI CreatePrimaryIndex() - cause: Build Already In Progress",
        );
        assert!(err.is_index_building());
        assert!(err.is_transient());
    }

    #[test]
    fn test_other_internal_failure_is_not_retryable() {
        let err = StoreError::from_internal_server_failure("`curity`", "permission denied");
        assert!(matches!(err, StoreError::Internal { .. }));
        assert!(!err.is_index_building());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_already_exists_class() {
        assert!(StoreError::document_exists("a").is_already_exists());
        assert!(StoreError::CollectionExists { collection: "c".into() }.is_already_exists());
        assert!(StoreError::IndexExists { target: "t".into() }.is_already_exists());
        assert!(!StoreError::document_not_found("a").is_already_exists());
    }

    #[test]
    fn test_source_chain_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StoreError::connection_with_source("connect failed", io);
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "refused");
    }

    #[test]
    fn test_serde_json_error_maps_to_serialization() {
        let err: StoreError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }

    #[test]
    fn test_timeout_display() {
        let err = StoreError::timeout("watch_primary_index", Duration::from_secs(10));
        assert_eq!(err.to_string(), "Operation timed out after 10s: watch_primary_index");
    }
}
