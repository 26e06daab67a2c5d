//! # Resilience Primitives Module
//!
//! Admission control for callers and retry behavior for the upstream.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Per-identity fixed-window admission control |
//! | [`retry`] | Bounded retries with randomized backoff |
//!
//! ## Rate Limiter
//!
//! Each identity (client IP, API key or user id) gets `max_requests` per
//! `window`. The (N+1)-th request in a window is denied; the window resets once
//! it elapses.
//!
//! ```rust
//! use quizgate::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new(
//!     RateLimiterConfig::new()
//!         .with_max_requests(2)
//!         .with_window(Duration::from_secs(60)),
//! );
//! assert!(limiter.allow("10.0.0.7"));
//! assert!(limiter.allow("10.0.0.7"));
//! assert!(!limiter.allow("10.0.0.7"));
//! ```
//!
//! ## Retry Policy
//!
//! ```rust
//! use quizgate::resilience::retry::{Decision, RetryPolicy};
//! use quizgate::Error;
//!
//! let policy = RetryPolicy::default(); // 3 attempts, 1-2s jittered backoff
//! let err = Error::transient("timeout", "attempt deadline elapsed");
//! assert!(matches!(policy.decide(1, &err), Decision::Retry { .. }));
//! assert_eq!(policy.decide(3, &err), Decision::Exhausted);
//! ```

pub mod rate_limiter;
pub mod retry;
