//! Delegation storage.
//!
//! Status gates visibility: [`DelegationStore::get_by_id`] only resolves
//! delegations that are still issued, while [`DelegationStore::fetch_raw`]
//! reads the stored record whatever its status. Listings and counts are
//! equality queries run with request-plus consistency so a delegation is
//! visible to the query immediately after it is created.
//!
//! # Pagination
//!
//! `count > 0` limits the result to `count` rows and `start_index > 0` skips
//! that many rows. Non-positive values are ignored, so passing both as
//! non-positive returns everything. Rows are ordered by delegation id.

use std::fmt;

use idsvr_docstore::{Collection, MutateInSpec, Query, ScanConsistency};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    bootstrap::DELEGATIONS_COLLECTION,
    clock::{expiry_at, offset_secs},
    connection::ConnectionHandle,
    error::Result,
};

/// Lifecycle status of a delegation.
///
/// Only [`Issued`](Self::Issued) delegations are visible to lookups; any
/// other stored status, known or not, hides the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    /// Active.
    Issued,
    /// Revoked.
    Revoked,
    /// Any other stored status.
    #[serde(untagged)]
    Other(String),
}

impl DelegationStatus {
    /// Returns the stored name of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Issued => "issued",
            Self::Revoked => "revoked",
            Self::Other(status) => status,
        }
    }
}

impl fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delegation document as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRecord {
    /// Record format version.
    #[serde(default)]
    #[builder(into)]
    pub version: Option<String>,
    /// Delegation id; the document key.
    #[builder(into)]
    pub id: String,
    /// Current status.
    pub status: DelegationStatus,
    /// Subject the delegation was granted by.
    #[builder(into)]
    pub owner: String,
    /// Creation time, unix seconds.
    pub created: i64,
    /// Expiry time, unix seconds.
    pub expires: i64,
    /// Client the delegation was granted to.
    #[builder(into)]
    pub client_id: String,
    /// Redirect URI used in the grant.
    #[serde(default)]
    #[builder(into)]
    pub redirect_uri: Option<String>,
    /// Hash of the authorization code that produced the delegation.
    #[serde(default)]
    #[builder(into)]
    pub authorization_code_hash: Option<String>,
    /// Authentication attributes captured at grant time.
    #[serde(default)]
    #[builder(default)]
    pub authentication_attributes: Map<String, Value>,
    /// Consent outcome, when consent was collected.
    #[serde(default)]
    pub consent_result: Option<Value>,
    /// Granted scope.
    #[serde(default)]
    #[builder(default, into)]
    pub scope: String,
    /// Claim map.
    #[serde(default)]
    #[builder(default)]
    pub claim_map: Map<String, Value>,
    /// Custom claim values.
    #[serde(default)]
    #[builder(default)]
    pub custom_claim_values: Map<String, Value>,
    /// Resolved claims.
    #[serde(default)]
    #[builder(default)]
    pub claims: Map<String, Value>,
    /// Bound client certificate.
    #[serde(default)]
    #[builder(into)]
    pub mtls_client_certificate: Option<String>,
    /// SHA-256 thumbprint of the bound client certificate.
    #[serde(default, rename = "mtlsClientCertificateX5TS256")]
    #[builder(into)]
    pub mtls_client_certificate_x5t_s256: Option<String>,
    /// Subject DN of the bound client certificate.
    #[serde(default, rename = "mtlsClientCertificateDN")]
    #[builder(into)]
    pub mtls_client_certificate_dn: Option<String>,
}

impl DelegationRecord {
    /// Returns `true` while the delegation is issued.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == DelegationStatus::Issued
    }
}

/// Delegation operations over the `curity-delegations` collection.
#[derive(Debug, Clone)]
pub struct DelegationStore {
    collection: Collection,
    retention_secs: u64,
}

impl DelegationStore {
    /// Creates a store keeping records `retention_secs` past `expires`.
    #[must_use]
    pub fn new(handle: &ConnectionHandle, retention_secs: u64) -> Self {
        Self { collection: handle.collection(DELEGATIONS_COLLECTION), retention_secs }
    }

    /// Stores a new delegation.
    ///
    /// Delegations with a positive `expires` are reaped by the store
    /// `retention_secs` after it; others are kept indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Conflict`](crate::PersistenceError::Conflict)
    /// if the id is already stored.
    #[tracing::instrument(skip(self, delegation), fields(id = %delegation.id))]
    pub async fn create(&self, delegation: &DelegationRecord) -> Result<()> {
        let expiry = if delegation.expires > 0 {
            Some(expiry_at(delegation.expires.saturating_add(offset_secs(self.retention_secs)))?)
        } else {
            None
        };
        self.collection.insert(&delegation.id, delegation, expiry).await?;
        tracing::debug!("delegation created");
        Ok(())
    }

    /// Returns the delegation if it exists and is issued.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures or an undecodable document.
    #[tracing::instrument(skip(self))]
    pub async fn get_by_id(&self, id: &str) -> Result<Option<DelegationRecord>> {
        let Some(delegation) = self.fetch_raw(id).await? else {
            tracing::debug!("delegation not found");
            return Ok(None);
        };
        if !delegation.is_active() {
            tracing::debug!(status = %delegation.status, "delegation not active");
            return Ok(None);
        }
        Ok(Some(delegation))
    }

    /// Returns the stored delegation regardless of status.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures or an undecodable document.
    pub async fn fetch_raw(&self, id: &str) -> Result<Option<DelegationRecord>> {
        match self.collection.get(id).await? {
            Some(doc) => Ok(Some(doc.content_as()?)),
            None => Ok(None),
        }
    }

    /// Sets the status of a delegation.
    ///
    /// Any status may be written over any other, so a revoked delegation
    /// can be reissued by setting it back to [`DelegationStatus::Issued`].
    ///
    /// Returns `1` when updated and `0` when the update failed for any
    /// reason, including a missing delegation. Failures are logged.
    #[tracing::instrument(skip(self))]
    pub async fn set_status(&self, id: &str, status: DelegationStatus) -> u64 {
        let spec = MutateInSpec::replace("status", status.as_str());
        match self.collection.mutate_in(id, &[spec], None).await {
            Ok(_) => 1,
            Err(e) => {
                tracing::error!(error = %e, "failed to update delegation status");
                0
            },
        }
    }

    /// Lists delegations owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures or undecodable rows.
    #[tracing::instrument(skip(self))]
    pub async fn get_by_owner(
        &self,
        owner: &str,
        start_index: i64,
        count: i64,
    ) -> Result<Vec<DelegationRecord>> {
        self.list(paginate(self.select().filter("owner", owner), start_index, count)).await
    }

    /// Lists issued delegations.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures or undecodable rows.
    #[tracing::instrument(skip(self))]
    pub async fn get_all_active(
        &self,
        start_index: i64,
        count: i64,
    ) -> Result<Vec<DelegationRecord>> {
        let query = self.select().filter("status", DelegationStatus::Issued.as_str());
        self.list(paginate(query, start_index, count)).await
    }

    /// Counts delegations owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures.
    #[tracing::instrument(skip(self))]
    pub async fn get_count_by_owner(&self, owner: &str) -> Result<u64> {
        self.count(self.count_query().filter("owner", owner)).await
    }

    /// Counts issued delegations.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures.
    #[tracing::instrument(skip(self))]
    pub async fn get_count_all_active(&self) -> Result<u64> {
        self.count(self.count_query().filter("status", DelegationStatus::Issued.as_str())).await
    }

    /// Returns the delegation with the lowest id among those carrying
    /// `authorization_code_hash`.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures or an undecodable row.
    #[tracing::instrument(skip(self))]
    pub async fn get_by_authorization_code_hash(
        &self,
        authorization_code_hash: &str,
    ) -> Result<Option<DelegationRecord>> {
        let query =
            self.select().filter("authorizationCodeHash", authorization_code_hash).limit(1);
        Ok(self.list(query).await?.into_iter().next())
    }

    /// Lists every delegation regardless of status.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures or undecodable rows.
    #[tracing::instrument(skip(self))]
    pub async fn get_all(&self) -> Result<Vec<DelegationRecord>> {
        self.list(self.select()).await
    }

    fn select(&self) -> Query {
        self.collection.select().consistency(ScanConsistency::RequestPlus)
    }

    fn count_query(&self) -> Query {
        self.collection.count().consistency(ScanConsistency::RequestPlus)
    }

    async fn list(&self, query: Query) -> Result<Vec<DelegationRecord>> {
        tracing::debug!(statement = %query.statement(), "querying delegations");
        let rows = self.collection.query(&query).await?.rows_as()?;
        Ok(rows)
    }

    async fn count(&self, query: Query) -> Result<u64> {
        tracing::debug!(statement = %query.statement(), "counting delegations");
        Ok(self.collection.query(&query).await?.count()?)
    }
}

fn paginate(query: Query, start_index: i64, count: i64) -> Query {
    let query = match u64::try_from(count) {
        Ok(limit) if limit > 0 => query.limit(limit),
        _ => query,
    };
    match u64::try_from(start_index) {
        Ok(offset) if offset > 0 => query.offset(offset),
        _ => query,
    }
}
