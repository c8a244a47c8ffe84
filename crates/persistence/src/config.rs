//! Configuration for the persistence layer.
//!
//! [`PersistenceConfig`] carries everything needed to reach the cluster and
//! to place and age records: host or explicit connection string, TLS flag,
//! credentials, bucket and scope, per-artifact retention and the bootstrap
//! retry ceilings.

use std::{fmt, time::Duration};

use idsvr_docstore::Credentials;
use serde::{Deserialize, Deserializer, Serialize};
use zeroize::Zeroizing;

use crate::{
    error::{PersistenceError, Result},
    retry::RetryPolicy,
};

/// Default bucket name.
pub const DEFAULT_BUCKET: &str = "curity";

/// Default scope name.
pub const DEFAULT_SCOPE: &str = "_default";

/// Default session retention (1 day).
pub const DEFAULT_SESSIONS_RETENTION_SECS: u64 = 86_400;

/// Default nonce retention past logical expiry (1 day).
pub const DEFAULT_NONCES_RETENTION_SECS: u64 = 86_400;

/// Default delegation retention past logical expiry (365 days).
pub const DEFAULT_DELEGATIONS_RETENTION_SECS: u64 = 365 * 86_400;

/// Default token retention (2 days).
pub const DEFAULT_TOKENS_RETENTION_SECS: u64 = 2 * 86_400;

/// Default device retention (30 days).
pub const DEFAULT_DEVICES_RETENTION_SECS: u64 = 30 * 86_400;

/// Default ceiling for primary-index creation retries (60 seconds).
pub const DEFAULT_INDEX_CREATE_DEADLINE: Duration = Duration::from_secs(60);

/// Default ceiling for primary-index readiness retries (30 seconds).
pub const DEFAULT_INDEX_WATCH_DEADLINE: Duration = Duration::from_secs(30);

/// Default timeout of a single index watch call (10 seconds).
pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on the final bucket readiness wait (60 seconds).
pub const DEFAULT_BUCKET_READY_TIMEOUT: Duration = Duration::from_secs(60);

const PLAIN_SCHEME: &str = "couchbase://";
const TLS_SCHEME: &str = "couchbases://";

/// Seconds each artifact family is retained in the store past its logical
/// expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Session retention.
    #[serde(default = "default_sessions")]
    #[builder(default = DEFAULT_SESSIONS_RETENTION_SECS)]
    pub sessions: u64,

    /// Nonce retention grace added to `createdAt + ttl`.
    #[serde(default = "default_nonces")]
    #[builder(default = DEFAULT_NONCES_RETENTION_SECS)]
    pub nonces: u64,

    /// Delegation retention grace added to `expires`.
    #[serde(default = "default_delegations")]
    #[builder(default = DEFAULT_DELEGATIONS_RETENTION_SECS)]
    pub delegations: u64,

    /// Token retention.
    #[serde(default = "default_tokens")]
    #[builder(default = DEFAULT_TOKENS_RETENTION_SECS)]
    pub tokens: u64,

    /// Device retention.
    #[serde(default = "default_devices")]
    #[builder(default = DEFAULT_DEVICES_RETENTION_SECS)]
    pub devices: u64,
}

fn default_sessions() -> u64 {
    DEFAULT_SESSIONS_RETENTION_SECS
}

fn default_nonces() -> u64 {
    DEFAULT_NONCES_RETENTION_SECS
}

fn default_delegations() -> u64 {
    DEFAULT_DELEGATIONS_RETENTION_SECS
}

fn default_tokens() -> u64 {
    DEFAULT_TOKENS_RETENTION_SECS
}

fn default_devices() -> u64 {
    DEFAULT_DEVICES_RETENTION_SECS
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Retry ceilings and timeouts for schema bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    /// Retry policy for primary-index creation.
    #[serde(default = "default_index_create")]
    #[builder(default = default_index_create())]
    pub index_create: RetryPolicy,

    /// Retry policy for primary-index readiness.
    #[serde(default = "default_index_watch")]
    #[builder(default = default_index_watch())]
    pub index_watch: RetryPolicy,

    /// Timeout of a single watch call.
    #[serde(with = "humantime_serde", default = "default_watch_timeout")]
    #[builder(default = DEFAULT_WATCH_TIMEOUT)]
    pub watch_timeout: Duration,

    /// Bound on the final bucket-wide readiness wait.
    #[serde(with = "humantime_serde", default = "default_bucket_ready_timeout")]
    #[builder(default = DEFAULT_BUCKET_READY_TIMEOUT)]
    pub bucket_ready_timeout: Duration,
}

fn default_index_create() -> RetryPolicy {
    RetryPolicy::with_deadline(DEFAULT_INDEX_CREATE_DEADLINE)
}

fn default_index_watch() -> RetryPolicy {
    RetryPolicy::with_deadline(DEFAULT_INDEX_WATCH_DEADLINE)
}

fn default_watch_timeout() -> Duration {
    DEFAULT_WATCH_TIMEOUT
}

fn default_bucket_ready_timeout() -> Duration {
    DEFAULT_BUCKET_READY_TIMEOUT
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Connection, placement and retention settings.
///
/// # Example
///
/// ```
/// use idsvr_persistence::PersistenceConfig;
///
/// let config = PersistenceConfig::builder()
///     .host("db.example.com")
///     .use_tls(true)
///     .username("idsvr")
///     .password("secret")
///     .build()?;
///
/// assert_eq!(config.connection_string()?, "couchbases://db.example.com");
/// assert_eq!(config.bucket(), "curity");
/// # Ok::<(), idsvr_persistence::PersistenceError>(())
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Explicit connection string; wins over `host`.
    #[serde(default)]
    pub(crate) connection_string: Option<String>,

    /// Cluster host, used when no connection string is set.
    #[serde(default)]
    pub(crate) host: Option<String>,

    /// Use the TLS scheme when deriving the connection string from `host`.
    #[serde(default)]
    pub(crate) use_tls: bool,

    /// Cluster username.
    pub(crate) username: String,

    /// Cluster password.
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    pub(crate) password: Zeroizing<String>,

    /// Bucket holding every collection.
    #[serde(default = "default_bucket")]
    pub(crate) bucket: String,

    /// Scope holding every collection.
    #[serde(default = "default_scope")]
    pub(crate) scope: String,

    /// Retention per artifact family.
    #[serde(default)]
    pub(crate) retention: RetentionConfig,

    /// Bootstrap retry ceilings.
    #[serde(default)]
    pub(crate) bootstrap: BootstrapConfig,
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_owned()
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_owned()
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Zeroizing<String>, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(Zeroizing::new)
}

impl fmt::Debug for PersistenceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceConfig")
            .field("connection_string", &self.connection_string)
            .field("host", &self.host)
            .field("use_tls", &self.use_tls)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("bucket", &self.bucket)
            .field("scope", &self.scope)
            .field("retention", &self.retention)
            .field("bootstrap", &self.bootstrap)
            .finish()
    }
}

#[bon::bon]
impl PersistenceConfig {
    /// Creates a new configuration, validating all required fields.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Config`] if:
    /// - Neither `host` nor `connection_string` is set
    /// - `connection_string` has a scheme other than `couchbase://` or `couchbases://`
    /// - `username`, `bucket` or `scope` is empty
    #[builder]
    pub fn new(
        #[builder(into)] connection_string: Option<String>,
        #[builder(into)] host: Option<String>,
        #[builder(default)] use_tls: bool,
        #[builder(into)] username: String,
        #[builder(into)] password: String,
        #[builder(into, default = DEFAULT_BUCKET.to_owned())] bucket: String,
        #[builder(into, default = DEFAULT_SCOPE.to_owned())] scope: String,
        #[builder(default)] retention: RetentionConfig,
        #[builder(default)] bootstrap: BootstrapConfig,
    ) -> Result<Self> {
        let config = Self {
            connection_string,
            host,
            use_tls,
            username,
            password: Zeroizing::new(password),
            bucket,
            scope,
            retention,
            bootstrap,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// Call this after deserializing a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.connection_string()?;

        if self.username.is_empty() {
            return Err(PersistenceError::config("username cannot be empty"));
        }
        if self.bucket.is_empty() {
            return Err(PersistenceError::config("bucket cannot be empty"));
        }
        if self.scope.is_empty() {
            return Err(PersistenceError::config("scope cannot be empty"));
        }
        Ok(())
    }

    /// Resolves the connection string.
    ///
    /// An explicit connection string is used as is. Otherwise the host is
    /// prefixed with `couchbases://` when TLS is enabled, `couchbase://`
    /// when it is not.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Config`] if nothing usable is configured.
    pub fn connection_string(&self) -> Result<String> {
        if let Some(explicit) = &self.connection_string {
            if explicit.starts_with(PLAIN_SCHEME) || explicit.starts_with(TLS_SCHEME) {
                return Ok(explicit.clone());
            }
            return Err(PersistenceError::config(format!(
                "connection string must start with {PLAIN_SCHEME} or {TLS_SCHEME}"
            )));
        }

        match self.host.as_deref() {
            Some(host) if !host.is_empty() => {
                let scheme = if self.use_tls { TLS_SCHEME } else { PLAIN_SCHEME };
                Ok(format!("{scheme}{host}"))
            },
            _ => Err(PersistenceError::config("either host or connection_string is required")),
        }
    }

    /// Returns the credentials used to authenticate.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.as_str())
    }

    /// Returns the bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Returns the scope name.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns whether TLS is enabled.
    #[must_use]
    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Returns the retention settings.
    #[must_use]
    pub fn retention(&self) -> &RetentionConfig {
        &self.retention
    }

    /// Returns the bootstrap settings.
    #[must_use]
    pub fn bootstrap(&self) -> &BootstrapConfig {
        &self.bootstrap
    }
}
