//! Shared test utilities for document-store testing.
//!
//! Feature-gated behind `testutil` to keep it out of production builds.
//!
//! ```toml
//! [dev-dependencies]
//! idsvr-docstore = { path = "../docstore", features = ["testutil"] }
//! ```

use crate::{
    cluster::Cluster,
    error::{StoreError, StoreResult},
    memory::MemoryCluster,
    types::{IndexTarget, Keyspace, PrimaryIndexOptions},
};

/// Bucket name used by the test helpers.
pub const TEST_BUCKET: &str = "curity";

/// Scope name used by the test helpers.
pub const TEST_SCOPE: &str = "_default";

/// Returns a keyspace for `collection` in the test bucket and scope.
#[must_use]
pub fn keyspace(collection: &str) -> Keyspace {
    Keyspace::new(TEST_BUCKET, TEST_SCOPE, collection)
}

/// Create a [`MemoryCluster`] with the test bucket and the given collections,
/// each carrying an online primary index.
///
/// # Panics
///
/// Panics if provisioning fails (should not happen with `MemoryCluster`).
pub async fn provisioned_cluster(collections: &[&str]) -> MemoryCluster {
    let cluster = MemoryCluster::new().with_bucket(TEST_BUCKET);
    for name in collections {
        let ks = keyspace(name);
        cluster.create_collection(&ks).await.expect("create collection failed");
        cluster
            .create_primary_index(&IndexTarget::Collection(ks), PrimaryIndexOptions::default())
            .await
            .expect("create primary index failed");
    }
    cluster
}

/// Returns `true` if `result` is a [`StoreError::DocumentExists`].
#[must_use]
pub fn is_document_exists<T>(result: &StoreResult<T>) -> bool {
    matches!(result, Err(StoreError::DocumentExists { .. }))
}

/// Assert that a [`StoreResult`] is a [`StoreError::DocumentExists`].
#[macro_export]
macro_rules! assert_document_exists {
    ($result:expr) => {{
        let result = $result;
        assert!(
            $crate::testutil::is_document_exists(&result),
            "expected DocumentExists, got: {:?}",
            result.as_ref().map(|_| ())
        )
    }};
}
