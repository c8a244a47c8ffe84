//! TTL boundary condition tests for `MemoryCluster`.
//!
//! Covers expiry exactly at "now", expiry in the future, expiry preserved
//! across sub-document mutations, and physical reaping by the cleanup task.

#![allow(clippy::expect_used, clippy::panic)]

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use idsvr_docstore::{
    Cluster, MutateInSpec, assert_document_exists,
    testutil::{keyspace, provisioned_cluster},
};
use serde_json::json;

const COLLECTION: &str = "curity-tokens";

// ============================================================================
// Expiry boundaries
// ============================================================================

/// A document whose expiry equals the insertion instant is invisible to the
/// very next read.
#[tokio::test]
async fn test_expiry_at_now_is_immediately_expired() {
    let cluster = provisioned_cluster(&[COLLECTION]).await;
    let ks = keyspace(COLLECTION);

    cluster.insert(&ks, "t1", json!({"status": "issued"}), Some(Utc::now())).await.expect("insert");

    let doc = cluster.get(&ks, "t1").await.expect("get should not error");
    assert!(doc.is_none(), "a document expiring now must not be readable");
}

/// An insert over a live document conflicts until that document expires.
#[tokio::test]
async fn test_insert_conflicts_until_expiry() {
    let cluster = provisioned_cluster(&[COLLECTION]).await;
    let ks = keyspace(COLLECTION);
    let expiry = Utc::now() + ChronoDuration::milliseconds(100);

    cluster.insert(&ks, "t1", json!({"v": 1}), Some(expiry)).await.expect("insert");
    assert_document_exists!(cluster.insert(&ks, "t1", json!({"v": 2}), None).await);

    tokio::time::sleep(Duration::from_millis(150)).await;
    cluster.insert(&ks, "t1", json!({"v": 3}), None).await.expect("insert after expiry");

    let doc = cluster.get(&ks, "t1").await.expect("get").expect("document should exist");
    assert_eq!(doc.content["v"], 3);
}

/// A document with a future expiry is readable and reports that expiry.
#[tokio::test]
async fn test_future_expiry_is_visible() {
    let cluster = provisioned_cluster(&[COLLECTION]).await;
    let ks = keyspace(COLLECTION);
    let expiry = Utc::now() + ChronoDuration::days(2);

    cluster.insert(&ks, "t1", json!({}), Some(expiry)).await.expect("insert");

    let doc = cluster.get(&ks, "t1").await.expect("get").expect("document should exist");
    assert_eq!(doc.expiry, Some(expiry));
}

/// Expired documents are excluded from queries and counts.
#[tokio::test]
async fn test_expired_documents_excluded_from_queries() {
    let cluster = provisioned_cluster(&[COLLECTION]).await;
    let ks = keyspace(COLLECTION);
    let past = Utc::now() - ChronoDuration::seconds(5);

    cluster.insert(&ks, "live", json!({"owner": "alice"}), None).await.expect("insert");
    cluster.insert(&ks, "dead", json!({"owner": "alice"}), Some(past)).await.expect("insert");

    let count = cluster
        .query(&idsvr_docstore::Query::count(ks.clone()).filter("owner", "alice"))
        .await
        .expect("count")
        .count()
        .expect("count row");
    assert_eq!(count, 1);
}

// ============================================================================
// Expiry and mutation
// ============================================================================

/// Sub-document mutations never move the store-level expiry.
#[tokio::test]
async fn test_repeated_mutations_keep_expiry() {
    let cluster = provisioned_cluster(&[COLLECTION]).await;
    let ks = keyspace(COLLECTION);
    let expiry = Utc::now() + ChronoDuration::hours(3);

    cluster.insert(&ks, "t1", json!({"status": "issued"}), Some(expiry)).await.expect("insert");
    for status in ["used", "revoked", "claimed"] {
        cluster
            .mutate_in(&ks, "t1", &[MutateInSpec::replace("status", status)], None)
            .await
            .expect("mutate_in");
    }

    let doc = cluster.get(&ks, "t1").await.expect("get").expect("exists");
    assert_eq!(doc.content["status"], "claimed");
    assert_eq!(doc.expiry, Some(expiry));
}

// ============================================================================
// Physical reaping
// ============================================================================

/// The background task removes expired documents from storage.
#[tokio::test]
async fn test_cleanup_task_reaps_expired_documents() {
    let cluster = provisioned_cluster(&[COLLECTION]).await;
    let ks = keyspace(COLLECTION);

    cluster
        .insert(&ks, "short", json!({}), Some(Utc::now() + ChronoDuration::milliseconds(200)))
        .await
        .expect("insert");
    cluster.insert(&ks, "forever", json!({}), None).await.expect("insert");
    assert_eq!(cluster.stored_document_count(&ks), 2);

    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(cluster.stored_document_count(&ks), 1);
    assert!(cluster.get(&ks, "forever").await.expect("get").is_some());
}
