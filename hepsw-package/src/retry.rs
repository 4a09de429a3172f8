//! Bounded retries and cooperative cancellation for remote operations

use crate::config::IndexConfig;
use crate::{PackageError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed-delay retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

/// Shared flag that asks long-running work to stop
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PackageError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Errors that retrying cannot change
fn is_permanent(err: &PackageError) -> bool {
    err.is_not_found()
        || matches!(
            err,
            PackageError::Cancelled
                | PackageError::Config { .. }
                | PackageError::InvalidValue { .. }
                | PackageError::SchemaMismatch { .. }
        )
}

/// Run `op` until it succeeds, fails permanently or runs out of retries
pub fn with_retry<T, F>(policy: &RetryPolicy, cancel: &CancelToken, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = policy.max_retries + 1;
    let mut attempt = 0;

    loop {
        cancel.check()?;
        attempt += 1;

        let err = match op() {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if is_permanent(&err) {
            debug!("Not retrying permanent error: {}", err);
            return Err(err);
        }

        if attempt >= attempts {
            if attempts == 1 {
                return Err(err);
            }
            return Err(PackageError::MaxRetriesExceeded {
                attempts,
                last: Box::new(err),
            });
        }

        warn!(
            "Attempt {}/{} failed: {}; retrying in {:?}",
            attempt, attempts, err, policy.delay
        );
        std::thread::sleep(policy.delay);
    }
}
