//! Fixed-delay retry for idempotent reads.
//!
//! Only operations that are safe to repeat go through here: reading the
//! credential table, listing, subscribing with the same subscriber id. Mutations
//! are never retried on the caller's behalf.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry schedule: a fixed delay between attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Pause between attempts
    pub delay: Duration,
    /// Total attempts including the first; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(500),
            max_attempts: Some(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    /// A single attempt, no retries.
    pub fn never() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: Some(1),
        }
    }

    fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Errors that may succeed when tried again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && policy.allows(attempt) => {
                log::debug!("{what} failed (attempt {attempt}): {e}; retrying in {:?}", policy.delay);
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Blocking variant for synchronous sources (credential files).
pub fn retry_blocking<T, E, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && policy.allows(attempt) => {
                log::debug!("{what} failed (attempt {attempt}): {e}; retrying in {:?}", policy.delay);
                std::thread::sleep(policy.delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
