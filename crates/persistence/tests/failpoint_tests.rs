#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p idsvr-persistence --features failpoints --test failpoint_tests
//! ```

use std::sync::Arc;

use idsvr_docstore::{IndexTarget, Keyspace, MemoryCluster, StoreError};
use idsvr_persistence::{
    BootstrapConfig, BootstrapStage, CollectionCatalog, NonceStore, PersistenceError,
    SchemaBootstrapper, TokenStatus, TokenStore,
    bootstrap::NONCES_COLLECTION,
    testutil::{TEST_BUCKET, memory_manager, sample_token},
};

#[tokio::test]
async fn connect_failure_is_unavailable_and_not_cached() {
    let scenario = fail::FailScenario::setup();
    let (manager, connector) = memory_manager();

    fail::cfg("memory-connect", "return").expect("failed to configure fail point");
    let err = manager.handle().await.expect_err("connect must fail");
    fail::remove("memory-connect");

    assert!(matches!(err, PersistenceError::Unavailable { .. }), "got {err:?}");
    assert!(!manager.is_connected());

    manager.handle().await.expect("second attempt connects");
    assert_eq!(connector.connect_count(), 2);

    scenario.teardown();
}

#[tokio::test]
async fn failure_before_bootstrap_closes_session() {
    let scenario = fail::FailScenario::setup();
    let (manager, connector) = memory_manager();

    fail::cfg("connection-before-bootstrap", "return").expect("failed to configure fail point");
    let err = manager.handle().await.expect_err("initialization must fail");
    fail::remove("connection-before-bootstrap");

    assert!(err.is_fatal(), "got {err:?}");
    let sessions = connector.sessions();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].is_closed());

    manager.handle().await.expect("retry succeeds");
    assert!(!connector.sessions()[1].is_closed());

    scenario.teardown();
}

#[tokio::test]
async fn bucket_open_failure_is_unavailable() {
    let scenario = fail::FailScenario::setup();
    let (manager, connector) = memory_manager();

    fail::cfg("memory-open-bucket", "return").expect("failed to configure fail point");
    let err = manager.handle().await.expect_err("open must fail");
    fail::remove("memory-open-bucket");

    assert!(matches!(err, PersistenceError::Unavailable { .. }), "got {err:?}");
    assert!(connector.sessions().iter().all(idsvr_docstore::MemoryCluster::is_closed));

    scenario.teardown();
}

#[tokio::test]
async fn token_status_update_failure_returns_zero() {
    let scenario = fail::FailScenario::setup();
    let (manager, _connector) = memory_manager();
    let tokens = TokenStore::new(&manager.handle().await.expect("handle"));
    tokens.create(&sample_token("h1")).await.expect("create");

    fail::cfg("memory-mutate-in", "return").expect("failed to configure fail point");
    let updated = tokens.set_status_by_token_hash("h1", TokenStatus::Revoked).await;
    fail::remove("memory-mutate-in");

    assert_eq!(updated, 0);
    assert_eq!(tokens.get_status("h1").await.expect("get status"), Some(TokenStatus::Issued));

    scenario.teardown();
}

#[tokio::test]
async fn nonce_consume_store_failure_propagates() {
    let scenario = fail::FailScenario::setup();
    let (manager, _connector) = memory_manager();
    let nonces = NonceStore::new(&manager.handle().await.expect("handle"), 60);
    let now = chrono::Utc::now().timestamp();
    nonces.save("n1", "v", now, 300).await.expect("save");

    fail::cfg("memory-mutate-in", "return").expect("failed to configure fail point");
    let err = nonces.consume("n1", now).await.expect_err("consume must fail");
    fail::remove("memory-mutate-in");

    assert!(matches!(err, PersistenceError::Store(StoreError::Internal { .. })), "got {err:?}");
    assert_eq!(nonces.get("n1").await.expect("get").as_deref(), Some("v"));

    scenario.teardown();
}

#[tokio::test]
async fn nonce_save_store_failure_is_not_conflict() {
    let scenario = fail::FailScenario::setup();
    let (manager, _connector) = memory_manager();
    let nonces = NonceStore::new(&manager.handle().await.expect("handle"), 60);

    fail::cfg("memory-insert", "return").expect("failed to configure fail point");
    let now = chrono::Utc::now().timestamp();
    let err = nonces.save("n1", "v", now, 300).await.expect_err("save must fail");
    fail::remove("memory-insert");

    assert!(!err.is_conflict());
    assert_eq!(nonces.fetch_raw("n1").await.expect("fetch"), None);

    scenario.teardown();
}

#[tokio::test]
async fn non_transient_index_creation_error_is_not_retried() {
    let scenario = fail::FailScenario::setup();
    let cluster = MemoryCluster::new().with_bucket(TEST_BUCKET);
    let bootstrapper = SchemaBootstrapper::new(
        Arc::new(cluster.clone()),
        TEST_BUCKET,
        "_default",
        BootstrapConfig::default(),
    );

    fail::cfg("memory-create-primary-index", "return").expect("failed to configure fail point");
    let err = bootstrapper
        .ensure(&CollectionCatalog::new([NONCES_COLLECTION]))
        .await
        .expect_err("bootstrap must fail");
    fail::remove("memory-create-primary-index");

    assert!(
        matches!(
            err,
            PersistenceError::Bootstrap { stage: BootstrapStage::CreatePrimaryIndex, .. }
        ),
        "got {err:?}"
    );
    let target = IndexTarget::Collection(Keyspace::new(TEST_BUCKET, "_default", NONCES_COLLECTION));
    assert_eq!(cluster.create_attempts(&target), 1);

    scenario.teardown();
}
