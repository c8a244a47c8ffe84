//! Bounded retry for transient store failures.
//!
//! This module provides [`retry_while`], which wraps an async operation with
//! retry on errors accepted by a caller-supplied predicate. Errors the
//! predicate rejects are returned immediately. Schema bootstrap uses it with
//! [`StoreError::is_index_building`](idsvr_docstore::StoreError::is_index_building)
//! for index creation and
//! [`StoreError::is_index_not_found`](idsvr_docstore::StoreError::is_index_not_found)
//! for index readiness.
//!
//! # Backoff Strategy
//!
//! - Delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - No retry is started whose backoff would end past `deadline`
//! - The whole loop, including a hung attempt, is bounded by `deadline` via [`tokio::time::timeout`]

use std::{future::Future, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Default first backoff delay (50 milliseconds).
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Default backoff ceiling (3 seconds).
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(3);

/// Backoff schedule and overall deadline for one retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    #[builder(default = DEFAULT_INITIAL_BACKOFF)]
    pub initial_backoff: Duration,

    /// Upper bound on any single delay.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    #[builder(default = DEFAULT_MAX_BACKOFF)]
    pub max_backoff: Duration,

    /// Upper bound on the total time spent, attempts and delays included.
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
}

fn default_initial_backoff() -> Duration {
    DEFAULT_INITIAL_BACKOFF
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

impl RetryPolicy {
    /// Creates a policy with the default backoff shape and the given deadline.
    #[must_use]
    pub fn with_deadline(deadline: Duration) -> Self {
        Self::builder().deadline(deadline).build()
    }

    /// Returns the delay before retry number `attempt + 1`.
    ///
    /// `min(initial_backoff * 2^attempt, max_backoff)`
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base =
            self.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        base.min(self.max_backoff)
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The operation failed with an error the predicate does not retry.
    #[error(transparent)]
    Rejected(E),

    /// Retryable failures continued until the next backoff would overrun
    /// the deadline.
    #[error("{operation} gave up after {attempts} attempts in {elapsed:?}: {last}")]
    Exhausted {
        /// The operation name.
        operation: String,
        /// Number of completed attempts.
        attempts: u32,
        /// Time spent before giving up.
        elapsed: Duration,
        /// The last retryable error.
        #[source]
        last: E,
    },

    /// The deadline fired while an attempt or a backoff sleep was in flight.
    #[error(
        "{operation} exceeded its {deadline:?} deadline after {attempts} attempts \
         (during_backoff: {during_backoff})"
    )]
    DeadlineElapsed {
        /// The operation name.
        operation: String,
        /// Number of completed attempts.
        attempts: u32,
        /// The configured deadline.
        deadline: Duration,
        /// Whether the deadline fired during a backoff sleep.
        during_backoff: bool,
        /// Rendering of the last error seen, if any.
        last_error: Option<String>,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// Returns the number of attempts made, if the loop ran at all.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Rejected(_) => None,
            Self::Exhausted { attempts, .. } | Self::DeadlineElapsed { attempts, .. } => {
                Some(*attempts)
            },
        }
    }
}

/// Tracks retry progress so a deadline cancellation can still report what
/// the loop was doing.
#[derive(Debug, Default)]
struct RetryState {
    attempts_completed: u32,
    during_backoff: bool,
    last_error_detail: Option<String>,
}

/// Executes `operation`, retrying while `is_retryable` accepts the error and
/// the policy's deadline allows another attempt.
///
/// # Errors
///
/// - [`RetryError::Rejected`] for the first error `is_retryable` rejects
/// - [`RetryError::Exhausted`] when the next backoff would overrun the deadline
/// - [`RetryError::DeadlineElapsed`] when the deadline fires mid-attempt
#[tracing::instrument(
    skip(policy, is_retryable, operation),
    fields(deadline_ms = policy.deadline.as_millis() as u64)
)]
pub async fn retry_while<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: P,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
    P: Fn(&E) -> bool,
{
    let state = Arc::new(Mutex::new(RetryState::default()));
    let tracked =
        retry_tracked(policy, operation_name, is_retryable, operation, Arc::clone(&state));

    match tokio::time::timeout(policy.deadline, tracked).await {
        Ok(result) => result,
        Err(_elapsed) => {
            let s = state.lock();
            tracing::warn!(
                operation = operation_name,
                attempts = s.attempts_completed,
                during_backoff = s.during_backoff,
                "retry deadline elapsed",
            );
            Err(RetryError::DeadlineElapsed {
                operation: operation_name.to_owned(),
                attempts: s.attempts_completed,
                deadline: policy.deadline,
                during_backoff: s.during_backoff,
                last_error: s.last_error_detail.clone(),
            })
        },
    }
}

async fn retry_tracked<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
    state: Arc<Mutex<RetryState>>,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
    P: Fn(&E) -> bool,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        state.lock().during_backoff = false;

        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            },
            Err(err) if is_retryable(&err) => {
                let delay = policy.backoff(attempt);
                let elapsed = start.elapsed();
                {
                    let mut s = state.lock();
                    s.attempts_completed = attempt + 1;
                    s.last_error_detail = Some(err.to_string());
                }

                if elapsed.saturating_add(delay) > policy.deadline {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %err,
                        "retry deadline exhausted",
                    );
                    return Err(RetryError::Exhausted {
                        operation: operation_name.to_owned(),
                        attempts: attempt + 1,
                        elapsed,
                        last: err,
                    });
                }

                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable error, retrying after backoff",
                );
                state.lock().during_backoff = true;
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            },
            Err(err) => {
                state.lock().attempts_completed = attempt + 1;
                return Err(RetryError::Rejected(err));
            },
        }
    }
}
