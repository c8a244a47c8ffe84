//! Token storage keyed by token hash.
//!
//! Tokens are written once with a store-level expiry at their `expires`
//! instant and are never deleted by this layer. Only the status changes
//! afterwards, through a single-field sub-document update.

use std::fmt;

use idsvr_docstore::{Collection, MutateInSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    bootstrap::TOKENS_COLLECTION,
    clock::expiry_at,
    connection::ConnectionHandle,
    error::{PersistenceError, Result},
    string_or_array::StringOrArray,
};

/// Lifecycle status of a token.
///
/// The host may write statuses this layer does not know about; those are
/// kept verbatim in [`TokenStatus::Other`] so the record still decodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    /// Issued and usable.
    Issued,
    /// Used once, for single-use tokens.
    Used,
    /// Revoked.
    Revoked,
    /// Claimed by a client.
    Claimed,
    /// Any other stored status.
    #[serde(untagged)]
    Other(String),
}

impl TokenStatus {
    /// Returns the stored name of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Issued => "issued",
            Self::Used => "used",
            Self::Revoked => "revoked",
            Self::Claimed => "claimed",
            Self::Other(status) => status,
        }
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A token document as stored.
///
/// Fields the host serializes alongside these (such as
/// `serializedTokenData` or `active`) are ignored on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Hash of the token; the document key.
    #[builder(into)]
    pub token_hash: String,
    /// Opaque token id, when the format has one.
    #[serde(default)]
    #[builder(into)]
    pub id: Option<String>,
    /// Id of the delegation the token was issued under.
    #[builder(into)]
    pub delegations_id: String,
    /// Purpose, e.g. `access_token`.
    #[builder(into)]
    pub purpose: String,
    /// Usage, e.g. `bearer`.
    #[builder(into)]
    pub usage: String,
    /// Format, e.g. `opaque`.
    #[builder(into)]
    pub format: String,
    /// Granted scope.
    #[serde(default)]
    #[builder(into)]
    pub scope: Option<String>,
    /// Creation time, unix seconds.
    pub created: i64,
    /// Expiry time, unix seconds; also the store-level expiry.
    pub expires: i64,
    /// Current status.
    pub status: TokenStatus,
    /// Issuer.
    #[builder(into)]
    pub issuer: String,
    /// Subject.
    #[builder(into)]
    pub subject: String,
    /// Audience.
    #[serde(default)]
    #[builder(default, into)]
    pub audience: StringOrArray,
    /// Not-before time, unix seconds.
    #[serde(default)]
    #[builder(default)]
    pub not_before: i64,
    /// Free-form token data.
    #[serde(default)]
    #[builder(default)]
    pub data: Map<String, Value>,
}

impl TokenRecord {
    /// Returns `true` while the token is issued.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Issued
    }
}

/// Token operations over the `curity-tokens` collection.
#[derive(Debug, Clone)]
pub struct TokenStore {
    collection: Collection,
}

impl TokenStore {
    /// Creates a store bound to the handle's token collection.
    #[must_use]
    pub fn new(handle: &ConnectionHandle) -> Self {
        Self { collection: handle.collection(TOKENS_COLLECTION) }
    }

    /// Stores a new token, expiring it at `token.expires`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Conflict`] if the hash is already stored.
    #[tracing::instrument(skip(self, token), fields(token_hash = %token.token_hash))]
    pub async fn create(&self, token: &TokenRecord) -> Result<()> {
        let expiry = expiry_at(token.expires)?;
        self.collection.insert(&token.token_hash, token, Some(expiry)).await?;
        tracing::debug!(expires = token.expires, "token created");
        Ok(())
    }

    /// Returns the token stored under `token_hash`.
    ///
    /// A status outside the known set decodes as [`TokenStatus::Other`].
    ///
    /// # Errors
    ///
    /// Returns an error for store failures or an undecodable document.
    #[tracing::instrument(skip(self))]
    pub async fn get_by_hash(&self, token_hash: &str) -> Result<Option<TokenRecord>> {
        let Some(doc) = self.collection.get(token_hash).await? else {
            tracing::debug!("token not found");
            return Ok(None);
        };
        Ok(Some(doc.content_as()?))
    }

    /// Returns the status of the token stored under `token_hash`.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures or an undecodable document.
    #[tracing::instrument(skip(self))]
    pub async fn get_status(&self, token_hash: &str) -> Result<Option<TokenStatus>> {
        Ok(self.get_by_hash(token_hash).await?.map(|token| token.status))
    }

    /// Sets the status of the token stored under `token_hash`.
    ///
    /// Returns `1` when updated and `0` when the update failed for any
    /// reason, including a missing token. Failures are logged, not returned.
    #[tracing::instrument(skip(self))]
    pub async fn set_status_by_token_hash(&self, token_hash: &str, status: TokenStatus) -> u64 {
        let spec = MutateInSpec::replace("status", status.as_str());
        match self.collection.mutate_in(token_hash, &[spec], None).await {
            Ok(_) => 1,
            Err(e) => {
                tracing::error!(error = %e, "failed to update token status");
                0
            },
        }
    }

    /// Sets a token's status by token id. Always fails: tokens are keyed by
    /// hash, use [`set_status_by_token_hash`](Self::set_status_by_token_hash).
    ///
    /// # Errors
    ///
    /// Always returns [`PersistenceError::Unsupported`].
    pub async fn set_status(&self, _token_id: &str, _status: TokenStatus) -> Result<u64> {
        Err(PersistenceError::Unsupported("set token status by id"))
    }
}
