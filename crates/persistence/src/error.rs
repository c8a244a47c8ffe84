//! Error types for the persistence layer.
//!
//! [`PersistenceError`] is what the host sees. Soft "not found" outcomes are
//! never errors: lookups return `Ok(None)` and status updates return a count
//! of `0`. Everything here is either a conflict the caller must handle, or a
//! configuration or availability failure that makes the component unusable.

use std::fmt;

use idsvr_docstore::{BoxError, StoreError};
use thiserror::Error;

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// The bootstrap step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    /// Creating a collection in the configured scope.
    CreateCollection,
    /// Creating a collection's primary index.
    CreatePrimaryIndex,
    /// Waiting for a collection's primary index to become visible.
    WatchPrimaryIndex,
    /// Waiting for every index in the bucket to come online.
    WaitUntilReady,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateCollection => "create collection",
            Self::CreatePrimaryIndex => "create primary index",
            Self::WatchPrimaryIndex => "watch primary index",
            Self::WaitUntilReady => "wait until ready",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistenceError {
    /// Invalid or unusable configuration, including a missing bucket.
    #[error("Configuration error: {message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
        /// The store failure that revealed the problem, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The store could not be reached or the connection could not be
    /// initialized.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// The underlying store failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Schema bootstrap failed; the store must not serve traffic.
    #[error("Bootstrap failed during {stage} on {target}: {message}")]
    Bootstrap {
        /// The failing step.
        stage: BootstrapStage,
        /// The collection or bucket being provisioned.
        target: String,
        /// Description of the failure.
        message: String,
        /// The underlying failure.
        #[source]
        source: Option<BoxError>,
    },

    /// A create collided with an existing record, or a guarded update lost a
    /// race with a concurrent writer.
    #[error("Conflict on key: {key}")]
    Conflict {
        /// The contended key.
        key: String,
    },

    /// An operation that requires an existing record found none.
    #[error("Record not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// A status transition not permitted by the record's lifecycle.
    #[error("Invalid transition for {key}: {from} -> {to}")]
    InvalidTransition {
        /// The record key.
        key: String,
        /// The current status.
        from: String,
        /// The requested status.
        to: String,
    },

    /// The operation is not supported by this store.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Any other store failure.
    #[error(transparent)]
    Store(StoreError),
}

impl PersistenceError {
    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Creates a new `Unavailable` error wrapping a store failure.
    #[must_use]
    pub fn unavailable(message: impl Into<String>, source: StoreError) -> Self {
        Self::Unavailable { message: message.into(), source: Some(std::sync::Arc::new(source)) }
    }

    /// Creates a new `Bootstrap` error.
    #[must_use]
    pub fn bootstrap(
        stage: BootstrapStage,
        target: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Bootstrap {
            stage,
            target: target.into(),
            message: source.to_string(),
            source: Some(std::sync::Arc::new(source)),
        }
    }

    /// Returns `true` for conflict errors.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` for errors that make the persistence layer unusable
    /// until it is reinitialized.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Unavailable { .. } | Self::Bootstrap { .. })
    }
}

impl From<StoreError> for PersistenceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DocumentExists { id } | StoreError::CasMismatch { id } => {
                Self::Conflict { key: id }
            },
            StoreError::DocumentNotFound { id } => Self::NotFound { key: id },
            other => Self::Store(other),
        }
    }
}
