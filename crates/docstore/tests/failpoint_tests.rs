#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p idsvr-docstore --features failpoints --test failpoint_tests
//! ```

use idsvr_docstore::{
    Cluster, ClusterConnector, Credentials, IndexTarget, MemoryCluster, MemoryConnector,
    MutateInSpec, PrimaryIndexOptions, StoreError,
    testutil::{keyspace, provisioned_cluster},
};
use serde_json::json;

#[tokio::test]
async fn connect_failpoint_returns_connection_error() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-connect", "return").expect("failed to configure fail point");

    let connector = MemoryConnector::new(MemoryCluster::new());
    let result = connector.connect("couchbase://localhost", &Credentials::new("u", "p")).await;

    assert!(matches!(result, Err(StoreError::Connection { .. })));
    assert!(connector.sessions().is_empty(), "no session should be handed out");

    scenario.teardown();
}

#[tokio::test]
async fn mutate_in_failpoint_leaves_document_untouched() {
    let scenario = fail::FailScenario::setup();
    let cluster = provisioned_cluster(&["curity-tokens"]).await;
    let ks = keyspace("curity-tokens");
    cluster.insert(&ks, "h1", json!({"status": "issued"}), None).await.expect("insert");

    fail::cfg("memory-mutate-in", "return").expect("failed to configure fail point");
    let spec = MutateInSpec::replace("status", "revoked");
    let result = cluster.mutate_in(&ks, "h1", &[spec], None).await;
    fail::remove("memory-mutate-in");

    assert!(matches!(result, Err(StoreError::Internal { .. })));
    let doc = cluster.get(&ks, "h1").await.expect("get").expect("exists");
    assert_eq!(doc.content["status"], "issued");

    scenario.teardown();
}

#[tokio::test]
async fn create_collection_failpoint_returns_internal_error() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-create-collection", "return").expect("failed to configure fail point");

    let cluster = MemoryCluster::new().with_bucket("curity");
    let result = cluster.create_collection(&keyspace("curity-nonces")).await;

    assert!(matches!(result, Err(StoreError::Internal { .. })));
    assert!(!cluster.collection_names("curity", "_default").contains(&"curity-nonces".to_owned()));

    scenario.teardown();
}

#[tokio::test]
async fn create_primary_index_failpoint_counts_the_attempt() {
    let scenario = fail::FailScenario::setup();
    let cluster = MemoryCluster::new().with_bucket("curity");
    let ks = keyspace("curity-nonces");
    cluster.create_collection(&ks).await.expect("create collection");
    let target = IndexTarget::Collection(ks);

    fail::cfg("memory-create-primary-index", "return").expect("failed to configure fail point");
    let result = cluster.create_primary_index(&target, PrimaryIndexOptions::default()).await;
    fail::remove("memory-create-primary-index");

    assert!(matches!(result, Err(StoreError::Internal { .. })));
    assert_eq!(cluster.create_attempts(&target), 1);
    assert!(!cluster.is_index_online(&target));

    scenario.teardown();
}
