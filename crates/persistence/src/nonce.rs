//! Single-use nonce storage.
//!
//! A nonce is issued by [`NonceStore::save`] and ends either consumed, via
//! [`NonceStore::consume`], or expired, when [`NonceStore::get`] observes
//! `createdAt + ttl <= now`. Both end states are terminal and make the nonce
//! invisible to `get`. The store reaps the document at `deleteableAt`, which
//! is fixed at save time and never changed by a transition.
//!
//! Transitions go through [`IssuedNonce`]: only an issued nonce can be turned
//! into a [`ConsumedNonce`] or an [`ExpiredNonce`], and each of those knows
//! the sub-document mutations that persist it. Both transitions are applied
//! with the CAS observed on read, so a nonce consumed concurrently cannot be
//! consumed twice.

use std::fmt;

use idsvr_docstore::{Collection, MutateInSpec, StoreError};
use serde::{Deserialize, Serialize};

use crate::{
    bootstrap::NONCES_COLLECTION,
    clock::{expiry_at, now_secs, offset_secs},
    connection::ConnectionHandle,
    error::{PersistenceError, Result},
};

/// Lifecycle status of a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonceStatus {
    /// Saved and not yet used.
    Issued,
    /// Used once.
    Consumed,
    /// Observed past its TTL before use.
    Expired,
}

impl NonceStatus {
    /// Returns the stored name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for NonceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A nonce document as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceRecord {
    /// Nonce identifier and document key.
    pub nonce: String,
    /// Opaque value returned by `get`.
    pub nonce_value: String,
    /// Current status.
    pub nonce_status: NonceStatus,
    /// Creation time, unix seconds.
    pub created_at: i64,
    /// Lifetime in seconds from `created_at`.
    pub nonce_ttl: i64,
    /// Consumption time, unix seconds.
    #[serde(default)]
    pub consumed_at: Option<i64>,
    /// Store-level expiry, unix seconds.
    pub deleteable_at: i64,
}

impl NonceRecord {
    /// Returns `true` once `created_at + nonce_ttl <= now`.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.created_at.saturating_add(self.nonce_ttl) <= now
    }
}

/// A nonce in the `issued` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedNonce {
    record: NonceRecord,
}

impl IssuedNonce {
    /// Creates a freshly issued nonce.
    ///
    /// `deleteableAt` is `created_at + ttl + retention_secs`.
    pub fn new(
        id: impl Into<String>,
        value: impl Into<String>,
        created_at: i64,
        ttl: i64,
        retention_secs: u64,
    ) -> Self {
        let deleteable_at =
            created_at.saturating_add(ttl).saturating_add(offset_secs(retention_secs));
        Self {
            record: NonceRecord {
                nonce: id.into(),
                nonce_value: value.into(),
                nonce_status: NonceStatus::Issued,
                created_at,
                nonce_ttl: ttl,
                consumed_at: None,
                deleteable_at,
            },
        }
    }

    /// Returns the underlying record.
    #[must_use]
    pub fn record(&self) -> &NonceRecord {
        &self.record
    }

    /// Returns `true` once the nonce's TTL has run out at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.record.is_expired_at(now)
    }

    /// Consumes the nonce at `consumed_at`.
    #[must_use]
    pub fn consume(mut self, consumed_at: i64) -> ConsumedNonce {
        self.record.nonce_status = NonceStatus::Consumed;
        self.record.consumed_at = Some(consumed_at);
        ConsumedNonce { record: self.record }
    }

    /// Expires the nonce.
    #[must_use]
    pub fn expire(mut self) -> ExpiredNonce {
        self.record.nonce_status = NonceStatus::Expired;
        ExpiredNonce { record: self.record }
    }

    /// Returns the nonce value.
    #[must_use]
    pub fn into_value(self) -> String {
        self.record.nonce_value
    }
}

impl TryFrom<NonceRecord> for IssuedNonce {
    /// The record is handed back unchanged when it is not issued.
    type Error = NonceRecord;

    fn try_from(record: NonceRecord) -> std::result::Result<Self, Self::Error> {
        match record.nonce_status {
            NonceStatus::Issued => Ok(Self { record }),
            _ => Err(record),
        }
    }
}

/// A nonce in the terminal `consumed` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedNonce {
    record: NonceRecord,
}

impl ConsumedNonce {
    /// Returns the underlying record.
    #[must_use]
    pub fn record(&self) -> &NonceRecord {
        &self.record
    }

    /// Mutations that persist the transition. `deleteableAt` is untouched.
    #[must_use]
    pub fn mutations(&self) -> Vec<MutateInSpec> {
        vec![
            MutateInSpec::replace("nonceStatus", NonceStatus::Consumed.as_str()),
            MutateInSpec::upsert("consumedAt", self.record.consumed_at),
        ]
    }
}

/// A nonce in the terminal `expired` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredNonce {
    record: NonceRecord,
}

impl ExpiredNonce {
    /// Returns the underlying record.
    #[must_use]
    pub fn record(&self) -> &NonceRecord {
        &self.record
    }

    /// Mutations that persist the transition. Only the status changes.
    #[must_use]
    pub fn mutations(&self) -> Vec<MutateInSpec> {
        vec![MutateInSpec::replace("nonceStatus", NonceStatus::Expired.as_str())]
    }
}

/// Nonce operations over the `curity-nonces` collection.
#[derive(Debug, Clone)]
pub struct NonceStore {
    collection: Collection,
    retention_secs: u64,
}

impl NonceStore {
    /// Creates a store keeping records `retention_secs` past their TTL.
    #[must_use]
    pub fn new(handle: &ConnectionHandle, retention_secs: u64) -> Self {
        Self { collection: handle.collection(NONCES_COLLECTION), retention_secs }
    }

    /// Saves a newly issued nonce.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Conflict`] if `id` already exists; nonces
    /// are never overwritten.
    #[tracing::instrument(skip(self, value))]
    pub async fn save(&self, id: &str, value: &str, created_at: i64, ttl: i64) -> Result<()> {
        let nonce = IssuedNonce::new(id, value, created_at, ttl, self.retention_secs);
        let expiry = expiry_at(nonce.record().deleteable_at)?;
        self.collection.insert(id, nonce.record(), Some(expiry)).await?;
        tracing::debug!(deleteable_at = nonce.record().deleteable_at, "nonce saved");
        Ok(())
    }

    /// Returns the nonce value if the nonce is issued and within its TTL.
    ///
    /// A nonce found issued but past its TTL is marked expired and `None` is
    /// returned. Absent, consumed and expired nonces all yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error only for store failures.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<String>> {
        let Some((record, cas)) = self.fetch(id).await? else {
            tracing::debug!("nonce not found");
            return Ok(None);
        };

        let issued = match IssuedNonce::try_from(record) {
            Ok(issued) => issued,
            Err(record) => {
                tracing::debug!(status = %record.nonce_status, "nonce no longer issued");
                return Ok(None);
            },
        };

        let now = now_secs();
        if !issued.is_expired_at(now) {
            return Ok(Some(issued.into_value()));
        }

        let expired = issued.expire();
        match self.collection.mutate_in(id, &expired.mutations(), Some(cas)).await {
            Ok(_) => tracing::debug!(now, "nonce expired"),
            Err(StoreError::CasMismatch { .. } | StoreError::DocumentNotFound { .. }) => {
                tracing::debug!("nonce changed concurrently, leaving it as is");
            },
            Err(e) => return Err(e.into()),
        }
        Ok(None)
    }

    /// Marks an issued nonce consumed at `consumed_at`.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::NotFound`] if the nonce does not exist
    /// - [`PersistenceError::InvalidTransition`] if it is already consumed or expired
    /// - [`PersistenceError::Conflict`] if it changed between read and update
    #[tracing::instrument(skip(self))]
    pub async fn consume(&self, id: &str, consumed_at: i64) -> Result<()> {
        let (record, cas) = self
            .fetch(id)
            .await?
            .ok_or_else(|| PersistenceError::NotFound { key: id.to_owned() })?;

        let issued = IssuedNonce::try_from(record).map_err(|record| {
            PersistenceError::InvalidTransition {
                key: id.to_owned(),
                from: record.nonce_status.to_string(),
                to: NonceStatus::Consumed.to_string(),
            }
        })?;

        let consumed = issued.consume(consumed_at);
        self.collection.mutate_in(id, &consumed.mutations(), Some(cas)).await?;
        tracing::debug!("nonce consumed");
        Ok(())
    }

    /// Returns the stored record regardless of status.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures or an undecodable document.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_raw(&self, id: &str) -> Result<Option<NonceRecord>> {
        Ok(self.fetch(id).await?.map(|(record, _)| record))
    }

    async fn fetch(&self, id: &str) -> Result<Option<(NonceRecord, u64)>> {
        let Some(doc) = self.collection.get(id).await? else {
            return Ok(None);
        };
        let record = doc.content_as::<NonceRecord>()?;
        Ok(Some((record, doc.cas)))
    }
}
