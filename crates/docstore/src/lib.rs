//! Document-store client surface for the identity-server persistence layer.
//!
//! This crate defines the [`Cluster`] trait and related types that the
//! persistence layer is written against. It deliberately covers only what
//! nonce, token and delegation storage need from a Couchbase-style document
//! store: bucket, scope and collection management, primary indexes, key-value
//! access with per-document expiry, sub-document mutation and simple
//! declarative queries.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    idsvr-persistence                        │
//! │   ConnectionManager │ SchemaBootstrapper │ Nonce/Token/...  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     idsvr-docstore                          │
//! │          Cluster / ClusterConnector traits                  │
//! │  (collections, indexes, get/insert/mutate_in, query)        │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryCluster│        client-library adapter                │
//! │   (testing)  │           (production)                       │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use idsvr_docstore::{Cluster, Keyspace, MemoryCluster};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cluster = MemoryCluster::new().with_bucket("curity");
//!     let nonces = Keyspace::new("curity", "_default", "curity-nonces");
//!     cluster.create_collection(&nonces).await?;
//!
//!     cluster.insert(&nonces, "n1", json!({"nonceValue": "v"}), None).await?;
//!     let doc = cluster.get(&nonces, "n1").await?;
//!     assert_eq!(doc.map(|d| d.content["nonceValue"].clone()), Some(json!("v")));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Implementing a Backend
//!
//! 1. Implement [`Cluster`] over the client library's session type
//! 2. Implement [`ClusterConnector`] to open sessions
//! 3. Map client-library errors to [`StoreError`], promoting "GSI" internal server failures to
//!    [`StoreError::IndexBuilding`] via [`StoreError::from_internal_server_failure`]
//!
//! See the [`memory`] module source for a reference implementation.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers.
//! - **`failpoints`**: Activates `fail` crate fail points inside [`MemoryCluster`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod error;
pub mod memory;
pub mod query;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use cluster::{Cluster, ClusterConnector, Collection};
pub use error::{BoxError, StoreError, StoreResult};
pub use memory::{IndexConvergence, MemoryCluster, MemoryConnector};
pub use query::{Projection, Query, QueryResult};
pub use types::{
    Credentials, Document, Expiry, IndexTarget, Keyspace, MutateInSpec, PrimaryIndexOptions,
    ScanConsistency,
};
