//! Identity-server persistence over a document store.
//!
//! This crate maps nonces, tokens and delegations onto collections of a
//! Couchbase-style cluster reached through [`idsvr_docstore::Cluster`], and
//! provisions those collections and their primary indexes before first use.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │   NonceStore   │   TokenStore   │   DelegationStore      │
//! ├──────────────────────────────────────────────────────────┤
//! │ ConnectionManager ── first use ──► SchemaBootstrapper    │
//! │        │                               │                 │
//! │        │                          retry_while            │
//! ├────────┴─────────────────────────────────────────────────┤
//! │          idsvr-docstore (Cluster / ClusterConnector)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use idsvr_docstore::{MemoryCluster, MemoryConnector};
//! use idsvr_persistence::{ConnectionManager, NonceStore, PersistenceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = MemoryConnector::new(MemoryCluster::new().with_bucket("curity"));
//!     let config = PersistenceConfig::builder()
//!         .host("localhost")
//!         .username("idsvr")
//!         .password("secret")
//!         .build()?;
//!     let retention = config.retention().nonces;
//!
//!     let manager = ConnectionManager::new(config, Arc::new(connector));
//!     let nonces = NonceStore::new(&*manager.handle().await?, retention);
//!
//!     let now = chrono::Utc::now().timestamp();
//!     nonces.save("abc", "val", now, 200).await?;
//!     assert_eq!(nonces.get("abc").await?.as_deref(), Some("val"));
//!
//!     nonces.consume("abc", now).await?;
//!     assert_eq!(nonces.get("abc").await?, None);
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers.
//! - **`failpoints`**: Activates `fail` crate fail points in connection setup and the in-memory
//!   cluster.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
mod clock;
pub mod config;
pub mod connection;
pub mod delegation;
pub mod error;
pub mod nonce;
pub mod retry;
pub mod string_or_array;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod token;

// Re-export primary types at crate root for convenience
pub use bootstrap::{BootstrapReport, CollectionCatalog, SchemaBootstrapper};
pub use config::{BootstrapConfig, PersistenceConfig, RetentionConfig};
pub use connection::{ConnectionHandle, ConnectionManager};
pub use delegation::{DelegationRecord, DelegationStatus, DelegationStore};
pub use error::{BootstrapStage, PersistenceError, Result};
pub use nonce::{ConsumedNonce, ExpiredNonce, IssuedNonce, NonceRecord, NonceStatus, NonceStore};
pub use retry::{RetryError, RetryPolicy, retry_while};
pub use string_or_array::{NoSingleValue, StringOrArray};
pub use token::{TokenRecord, TokenStatus, TokenStore};
