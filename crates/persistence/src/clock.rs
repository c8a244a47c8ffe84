//! Unix-second helpers shared by the lifecycle stores.

use chrono::{DateTime, Utc};
use idsvr_docstore::{Expiry, StoreError};

use crate::error::{PersistenceError, Result};

/// Current wall-clock time in unix seconds.
pub(crate) fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Converts a retention in seconds to a signed offset, saturating.
pub(crate) fn offset_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Converts unix seconds to a store expiry instant.
pub(crate) fn expiry_at(secs: i64) -> Result<Expiry> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        PersistenceError::Store(StoreError::internal(format!("expiry out of range: {secs}")))
    })
}
