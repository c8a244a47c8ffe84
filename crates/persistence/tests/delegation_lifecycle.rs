//! Delegation lifecycle tests against a bootstrapped in-memory cluster.
//!
//! Exercises status-gated lookup, status updates, owner and status queries
//! with pagination, counts and authorization-code lookup.

#![allow(clippy::expect_used, clippy::panic)]

use idsvr_persistence::{
    DelegationRecord, DelegationStatus, DelegationStore,
    bootstrap::DELEGATIONS_COLLECTION,
    config::DEFAULT_DELEGATIONS_RETENTION_SECS,
    testutil::{bootstrapped_handle, random_owner, sample_delegation},
};
use rstest::rstest;

async fn store() -> DelegationStore {
    DelegationStore::new(&*bootstrapped_handle().await, DEFAULT_DELEGATIONS_RETENTION_SECS)
}

fn ids(delegations: &[DelegationRecord]) -> Vec<&str> {
    delegations.iter().map(|d| d.id.as_str()).collect()
}

// ============================================================================
// create / get_by_id / set_status
// ============================================================================

#[tokio::test]
async fn revoked_delegation_is_hidden_but_stored() {
    let delegations = store().await;
    delegations.create(&sample_delegation("d1", "alice")).await.expect("create");
    assert!(delegations.get_by_id("d1").await.expect("get").is_some());

    assert_eq!(delegations.set_status("d1", DelegationStatus::Revoked).await, 1);

    assert_eq!(delegations.get_by_id("d1").await.expect("get"), None);
    let raw = delegations.fetch_raw("d1").await.expect("fetch").expect("still stored");
    assert_eq!(raw.status, DelegationStatus::Revoked);
}

#[tokio::test]
async fn reissued_delegation_is_visible_again() {
    let delegations = store().await;
    delegations.create(&sample_delegation("d1", "alice")).await.expect("create");
    delegations.set_status("d1", DelegationStatus::Revoked).await;

    assert_eq!(delegations.set_status("d1", DelegationStatus::Issued).await, 1);

    assert!(delegations.get_by_id("d1").await.expect("get").is_some());
}

#[tokio::test]
async fn unknown_status_hides_delegation() {
    let delegations = store().await;
    delegations.create(&sample_delegation("d1", "alice")).await.expect("create");

    let suspended = DelegationStatus::Other("suspended".into());
    assert_eq!(delegations.set_status("d1", suspended.clone()).await, 1);

    assert_eq!(delegations.get_by_id("d1").await.expect("get"), None);
    assert_eq!(delegations.get_count_by_owner("alice").await.expect("count"), 1);
    let raw = delegations.fetch_raw("d1").await.expect("fetch").expect("still stored");
    assert_eq!(raw.status, suspended);
}

#[tokio::test]
async fn set_status_missing_returns_zero() {
    let delegations = store().await;
    assert_eq!(delegations.set_status("missing", DelegationStatus::Revoked).await, 0);
}

#[tokio::test]
async fn create_duplicate_is_conflict() {
    let delegations = store().await;
    delegations.create(&sample_delegation("d1", "alice")).await.expect("create");

    let err = delegations.create(&sample_delegation("d1", "bob")).await.expect_err("duplicate");

    assert!(err.is_conflict());
    let stored = delegations.get_by_id("d1").await.expect("get").expect("stored");
    assert_eq!(stored.owner, "alice");
}

#[tokio::test]
async fn store_expiry_adds_retention() {
    let handle = bootstrapped_handle().await;
    let delegations = DelegationStore::new(&handle, 600);
    let delegation = sample_delegation("d1", "alice");

    delegations.create(&delegation).await.expect("create");

    let doc =
        handle.collection(DELEGATIONS_COLLECTION).get("d1").await.expect("get").expect("stored");
    assert_eq!(doc.expiry.map(|e| e.timestamp()), Some(delegation.expires + 600));
}

#[tokio::test]
async fn non_expiring_delegation_has_no_store_expiry() {
    let handle = bootstrapped_handle().await;
    let delegations = DelegationStore::new(&handle, 600);
    let mut delegation = sample_delegation("d1", "alice");
    delegation.expires = 0;

    delegations.create(&delegation).await.expect("create");

    let doc =
        handle.collection(DELEGATIONS_COLLECTION).get("d1").await.expect("get").expect("stored");
    assert_eq!(doc.expiry, None);
}

// ============================================================================
// Queries
// ============================================================================

#[rstest]
#[case(0)]
#[case(1)]
#[case(7)]
#[tokio::test]
async fn owner_count_matches_listing(#[case] n: usize) {
    let delegations = store().await;
    let owner = random_owner();
    for i in 0..n {
        let id = format!("{owner}-{i}");
        delegations.create(&sample_delegation(&id, &owner)).await.expect("create");
    }
    delegations.create(&sample_delegation("other", &random_owner())).await.expect("create");

    let count = delegations.get_count_by_owner(&owner).await.expect("count");
    let listed = delegations.get_by_owner(&owner, 0, n as i64 + 10).await.expect("list");

    assert_eq!(count, n as u64);
    assert_eq!(listed.len(), n);
    assert!(listed.iter().all(|d| d.owner == owner));
}

#[rstest]
#[case(0, 0, &["d0", "d1", "d2", "d3", "d4"])]
#[case(-1, -1, &["d0", "d1", "d2", "d3", "d4"])]
#[case(0, 2, &["d0", "d1"])]
#[case(1, 2, &["d1", "d2"])]
#[case(3, 10, &["d3", "d4"])]
#[case(2, 0, &["d2", "d3", "d4"])]
#[case(5, 2, &[])]
#[tokio::test]
async fn owner_listing_pages_by_id(
    #[case] start_index: i64,
    #[case] count: i64,
    #[case] expected: &[&str],
) {
    let delegations = store().await;
    for i in [3, 0, 4, 1, 2] {
        delegations.create(&sample_delegation(&format!("d{i}"), "alice")).await.expect("create");
    }

    let page = delegations.get_by_owner("alice", start_index, count).await.expect("list");

    assert_eq!(ids(&page), expected);
}

#[tokio::test]
async fn active_listing_and_count_exclude_revoked() {
    let delegations = store().await;
    for id in ["a", "b", "c"] {
        delegations.create(&sample_delegation(id, "alice")).await.expect("create");
    }
    delegations.set_status("b", DelegationStatus::Revoked).await;

    let active = delegations.get_all_active(0, 0).await.expect("list");

    assert_eq!(ids(&active), vec!["a", "c"]);
    assert_eq!(delegations.get_count_all_active().await.expect("count"), 2);
    assert_eq!(ids(&delegations.get_all_active(1, 1).await.expect("page")), vec!["c"]);
}

#[tokio::test]
async fn get_all_includes_every_status() {
    let delegations = store().await;
    for id in ["a", "b"] {
        delegations.create(&sample_delegation(id, "alice")).await.expect("create");
    }
    delegations.set_status("a", DelegationStatus::Revoked).await;

    let all = delegations.get_all().await.expect("list");

    assert_eq!(ids(&all), vec!["a", "b"]);
}

#[tokio::test]
async fn authorization_code_lookup_returns_lowest_id() {
    let delegations = store().await;
    for id in ["z", "m", "b"] {
        let mut delegation = sample_delegation(id, "alice");
        delegation.authorization_code_hash = Some("shared".to_owned());
        delegations.create(&delegation).await.expect("create");
    }

    let found = delegations.get_by_authorization_code_hash("shared").await.expect("lookup");

    assert_eq!(found.map(|d| d.id), Some("b".to_owned()));
    assert_eq!(delegations.get_by_authorization_code_hash("unknown").await.expect("lookup"), None);
}

#[tokio::test]
async fn authorization_code_lookup_is_stable() {
    let delegations = store().await;
    delegations.create(&sample_delegation("d1", "alice")).await.expect("create");

    for _ in 0..3 {
        let found = delegations.get_by_authorization_code_hash("code-d1").await.expect("lookup");
        assert_eq!(found.map(|d| d.id).as_deref(), Some("d1"));
    }
}
