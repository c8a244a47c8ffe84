//! Shared test utilities for the persistence layer.
//!
//! Feature-gated behind `testutil` to keep it out of production builds.
//!
//! ```toml
//! [dev-dependencies]
//! idsvr-persistence = { path = "../persistence", features = ["testutil"] }
//! ```

use std::sync::Arc;

use chrono::Utc;
use idsvr_docstore::{MemoryCluster, MemoryConnector};
use rand::{Rng, distr::Alphanumeric};

use crate::{
    config::PersistenceConfig,
    connection::{ConnectionHandle, ConnectionManager},
    delegation::{DelegationRecord, DelegationStatus},
    token::{TokenRecord, TokenStatus},
};

/// Bucket the test helpers connect to.
pub const TEST_BUCKET: &str = "curity";

/// Returns a configuration pointing at `localhost` with fixed credentials.
///
/// # Panics
///
/// Panics if the builder rejects the configuration (should not happen).
#[must_use]
pub fn test_config() -> PersistenceConfig {
    PersistenceConfig::builder()
        .host("localhost")
        .username("idsvr")
        .password("secret")
        .build()
        .expect("test config is valid")
}

/// A manager over a fresh in-memory cluster that has the test bucket.
///
/// Returns the connector too so tests can inspect sessions and connection
/// attempts.
#[must_use]
pub fn memory_manager() -> (ConnectionManager, Arc<MemoryConnector>) {
    let connector = Arc::new(MemoryConnector::new(MemoryCluster::new().with_bucket(TEST_BUCKET)));
    let manager = ConnectionManager::new(test_config(), connector.clone());
    (manager, connector)
}

/// Connects and bootstraps the default catalog over a fresh in-memory
/// cluster.
///
/// # Panics
///
/// Panics if initialization fails (should not happen with `MemoryCluster`).
pub async fn bootstrapped_handle() -> Arc<ConnectionHandle> {
    let (manager, _connector) = memory_manager();
    manager.handle().await.expect("in-memory initialization failed")
}

/// Returns a random owner name, unique per call for practical purposes.
#[must_use]
pub fn random_owner() -> String {
    let suffix: String = rand::rng().sample_iter(&Alphanumeric).take(12).map(char::from).collect();
    format!("owner-{suffix}")
}

/// An issued token expiring five minutes from now.
#[must_use]
pub fn sample_token(token_hash: &str) -> TokenRecord {
    let now = Utc::now().timestamp();
    TokenRecord::builder()
        .token_hash(token_hash)
        .delegations_id("delegation-1")
        .purpose("access_token")
        .usage("bearer")
        .format("opaque")
        .scope("openid read")
        .created(now)
        .expires(now + 300)
        .status(TokenStatus::Issued)
        .issuer("https://idsvr.example/~")
        .subject("alice")
        .audience(vec!["api".to_owned(), "web".to_owned()])
        .not_before(now)
        .build()
}

/// An issued delegation for `owner` expiring in an hour.
#[must_use]
pub fn sample_delegation(id: &str, owner: &str) -> DelegationRecord {
    let now = Utc::now().timestamp();
    DelegationRecord::builder()
        .version("6.2")
        .id(id)
        .status(DelegationStatus::Issued)
        .owner(owner)
        .created(now)
        .expires(now + 3_600)
        .client_id("web")
        .redirect_uri("https://app.example/cb")
        .authorization_code_hash(format!("code-{id}"))
        .scope("openid")
        .build()
}
