//! Retry policy for upstream calls.
//!
//! Attempts are bounded, each retry waits a randomized delay so concurrent
//! callers don't retry in lockstep, and a predicate decides which errors are
//! worth another attempt.

use crate::Error;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether an error may succeed on another attempt.
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    /// Retryable, but the attempt budget is spent.
    Exhausted,
    /// Not retryable; surface as-is.
    Fail,
}

#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Deadline for a single attempt. Exceeding it is a transient failure.
    pub attempt_timeout: Duration,
    retryable: RetryPredicate,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("min_backoff", &self.min_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(30),
            retryable: Arc::new(Error::is_retryable),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Retries wait a uniformly random delay in `[min, max]`.
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min;
        self.max_backoff = max.max(min);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_predicate(mut self, predicate: impl Fn(&Error) -> bool + Send + Sync + 'static) -> Self {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn is_retryable(&self, err: &Error) -> bool {
        (self.retryable)(err)
    }

    /// Randomized delay in `[min_backoff, max_backoff]`.
    pub fn backoff(&self) -> Duration {
        if self.max_backoff <= self.min_backoff {
            return self.min_backoff;
        }
        let lo = self.min_backoff.as_millis() as u64;
        let hi = self.max_backoff.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    /// Decide what to do after `attempt` (1-based) failed with `err`.
    ///
    /// A provider `Retry-After` hint lengthens the wait but never past `max_backoff`.
    pub fn decide(&self, attempt: u32, err: &Error) -> Decision {
        if !self.is_retryable(err) {
            return Decision::Fail;
        }
        if attempt >= self.max_attempts {
            return Decision::Exhausted;
        }
        let mut delay = self.backoff();
        if let Some(hint) = err.retry_after() {
            delay = delay.max(hint.min(self.max_backoff));
        }
        Decision::Retry { delay }
    }
}
