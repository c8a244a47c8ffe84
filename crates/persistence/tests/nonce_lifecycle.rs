//! Nonce lifecycle tests against a bootstrapped in-memory cluster.
//!
//! Covers single use, lazy expiry on read, the fixed deletion horizon and
//! the transitions that must be rejected.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use chrono::Utc;
use idsvr_persistence::{
    NonceStatus, NonceStore, PersistenceError, bootstrap::NONCES_COLLECTION,
    testutil::bootstrapped_handle,
};

const RETENTION: u64 = 86_400;

fn now() -> i64 {
    Utc::now().timestamp()
}

async fn store() -> NonceStore {
    NonceStore::new(&*bootstrapped_handle().await, RETENTION)
}

// ============================================================================
// save / get
// ============================================================================

#[tokio::test]
async fn get_returns_value_within_ttl() {
    let nonces = store().await;
    let t0 = now() - 50;

    nonces.save("abc", "val", t0, 200).await.expect("save");

    assert_eq!(nonces.get("abc").await.expect("get").as_deref(), Some("val"));
}

#[tokio::test]
async fn get_past_ttl_returns_none_and_marks_expired() {
    let nonces = store().await;
    let t0 = now() - 250;

    nonces.save("abc", "val", t0, 200).await.expect("save");

    assert_eq!(nonces.get("abc").await.expect("get"), None);
    let raw = nonces.fetch_raw("abc").await.expect("fetch").expect("record still stored");
    assert_eq!(raw.nonce_status, NonceStatus::Expired);
    assert_eq!(raw.deleteable_at, t0 + 200 + RETENTION as i64);

    // Stays invisible afterwards.
    assert_eq!(nonces.get("abc").await.expect("get"), None);
}

#[tokio::test]
async fn get_missing_returns_none() {
    let nonces = store().await;
    assert_eq!(nonces.get("missing").await.expect("get"), None);
}

#[tokio::test]
async fn save_duplicate_is_conflict() {
    let nonces = store().await;
    nonces.save("dup", "v1", now(), 60).await.expect("first save");

    let err = nonces.save("dup", "v2", now(), 60).await.expect_err("duplicate must fail");

    assert!(err.is_conflict(), "expected Conflict, got {err:?}");
    assert_eq!(nonces.get("dup").await.expect("get").as_deref(), Some("v1"));
}

#[tokio::test]
async fn save_sets_store_expiry_to_deleteable_at() {
    let handle = bootstrapped_handle().await;
    let nonces = NonceStore::new(&handle, RETENTION);
    let t0 = now();

    nonces.save("n1", "v", t0, 120).await.expect("save");

    let doc = handle.collection(NONCES_COLLECTION).get("n1").await.expect("get").expect("stored");
    let expiry = doc.expiry.expect("nonce documents carry an expiry");
    assert_eq!(expiry.timestamp(), t0 + 120 + RETENTION as i64);
}

// ============================================================================
// consume
// ============================================================================

#[tokio::test]
async fn consumed_nonce_is_invisible() {
    let nonces = store().await;
    let t0 = now();
    nonces.save("n1", "v", t0, 300).await.expect("save");

    nonces.consume("n1", t0 + 5).await.expect("consume");

    assert_eq!(nonces.get("n1").await.expect("get"), None);
    let raw = nonces.fetch_raw("n1").await.expect("fetch").expect("stored");
    assert_eq!(raw.nonce_status, NonceStatus::Consumed);
    assert_eq!(raw.consumed_at, Some(t0 + 5));
}

#[tokio::test]
async fn consume_keeps_deletion_horizon() {
    let handle = bootstrapped_handle().await;
    let nonces = NonceStore::new(&handle, RETENTION);
    let t0 = now();
    nonces.save("n1", "v", t0, 300).await.expect("save");
    let before =
        handle.collection(NONCES_COLLECTION).get("n1").await.expect("get").expect("stored");

    nonces.consume("n1", t0 + 1).await.expect("consume");

    let after = handle.collection(NONCES_COLLECTION).get("n1").await.expect("get").expect("stored");
    assert_eq!(before.expiry, after.expiry);
    assert_eq!(after.content["deleteableAt"], before.content["deleteableAt"]);
}

#[tokio::test]
async fn consume_missing_is_not_found() {
    let nonces = store().await;

    let err = nonces.consume("missing", now()).await.expect_err("must fail");

    assert!(matches!(err, PersistenceError::NotFound { ref key } if key == "missing"));
}

#[tokio::test]
async fn consume_twice_is_rejected() {
    let nonces = store().await;
    nonces.save("n1", "v", now(), 300).await.expect("save");
    nonces.consume("n1", now()).await.expect("first consume");

    let err = nonces.consume("n1", now()).await.expect_err("second consume must fail");

    match err {
        PersistenceError::InvalidTransition { from, to, .. } => {
            assert_eq!(from, "consumed");
            assert_eq!(to, "consumed");
        },
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
}

#[tokio::test]
async fn consume_expired_is_rejected() {
    let nonces = store().await;
    nonces.save("n1", "v", now() - 500, 100).await.expect("save");
    assert_eq!(nonces.get("n1").await.expect("get"), None);

    let err = nonces.consume("n1", now()).await.expect_err("must fail");

    assert!(matches!(
        err,
        PersistenceError::InvalidTransition { ref from, .. } if from == "expired"
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consume_has_single_winner() {
    let nonces = Arc::new(store().await);
    nonces.save("race", "v", now(), 300).await.expect("save");

    let mut tasks = Vec::new();
    for i in 0..8 {
        let nonces = Arc::clone(&nonces);
        tasks.push(tokio::spawn(async move { nonces.consume("race", now() + i).await }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(()) => winners += 1,
            Err(
                PersistenceError::Conflict { .. } | PersistenceError::InvalidTransition { .. },
            ) => {},
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(winners, 1);
}
