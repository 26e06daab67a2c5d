//! Per-identity fixed-window rate limiting.
//!
//! Each identity (usually a client IP) gets `max_requests` admissions per
//! `window`. The window starts at the identity's first request and resets
//! once it has elapsed. Check and increment happen under one map-entry lock,
//! so concurrent callers can never exceed the limit.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Requests admitted per identity per window. `0` disables limiting.
    pub max_requests: u32,
    pub window: Duration,
    /// An identity idle for this many windows is forgotten.
    pub idle_windows: u32,
    /// Run an idle sweep every this many admission checks. `0` disables it.
    pub sweep_every: u64,
}

impl RateLimiterConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
            idle_windows: 4,
            sweep_every: 1024,
        }
    }

    pub fn per_window(max_requests: u32, window: Duration) -> Option<Self> {
        if window.is_zero() {
            return None;
        }
        Some(Self {
            max_requests,
            window,
            ..Self::new()
        })
    }

    pub fn with_max_requests(mut self, n: u32) -> Self {
        self.max_requests = n;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_idle_windows(mut self, n: u32) -> Self {
        self.idle_windows = n;
        self
    }

    pub fn with_sweep_every(mut self, n: u64) -> Self {
        self.sweep_every = n;
        self
    }

    fn idle_after(&self) -> Duration {
        self.window.saturating_mul(self.idle_windows.max(1))
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct RateWindowSnapshot {
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    /// Time until the current window rolls over.
    pub reset_in: Duration,
}

#[derive(Debug)]
struct RateWindow {
    window_start: Instant,
    request_count: u32,
    last_seen: Instant,
}

/// Per-identity fixed-window admission control.
///
/// - One window per identity, created on first request
/// - Check-and-increment happens under the identity's map entry lock
/// - Identities are evicted only after `idle_windows` full windows of silence,
///   by which point their window has rolled over anyway
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    windows: DashMap<String, RateWindow>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        Self {
            cfg,
            windows: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    /// Admit or deny one request for `identity`. Denial is not an error.
    pub fn allow(&self, identity: &str) -> bool {
        if self.cfg.max_requests == 0 {
            return true;
        }
        let now = Instant::now();
        let admitted = {
            let mut w = self
                .windows
                .entry(identity.to_owned())
                .or_insert_with(|| RateWindow {
                    window_start: now,
                    request_count: 0,
                    last_seen: now,
                });
            if now.duration_since(w.window_start) >= self.cfg.window {
                w.window_start = now;
                w.request_count = 0;
            }
            w.last_seen = now;
            if w.request_count < self.cfg.max_requests {
                w.request_count += 1;
                true
            } else {
                false
            }
        };

        // The entry guard is dropped above; sweeping while holding it would deadlock.
        let sweep_every = self.cfg.sweep_every;
        if sweep_every > 0 && (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % sweep_every == 0 {
            self.evict_idle();
        }
        admitted
    }

    /// Drop windows for identities with no recent activity. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let idle_after = self.cfg.idle_after();
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.last_seen) < idle_after);
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, tracked = self.windows.len(), "evicted idle rate windows");
        }
        removed
    }

    pub fn snapshot(&self, identity: &str) -> Option<RateWindowSnapshot> {
        let w = self.windows.get(identity)?;
        let elapsed = Instant::now().duration_since(w.window_start);
        let (used, reset_in) = if elapsed >= self.cfg.window {
            (0, Duration::ZERO)
        } else {
            (w.request_count, self.cfg.window - elapsed)
        };
        Some(RateWindowSnapshot {
            limit: self.cfg.max_requests,
            used,
            remaining: self.cfg.max_requests.saturating_sub(used),
            reset_in,
        })
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_rate_limiter_config_per_window() {
        let config = RateLimiterConfig::per_window(5, Duration::from_secs(10)).unwrap();
        assert_eq!(config.max_requests, 5);
        assert_eq!(config.window, Duration::from_secs(10));
        assert!(RateLimiterConfig::per_window(5, Duration::ZERO).is_none());
    }

    #[test]
    fn test_rate_limiter_boundary() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_max_requests(3)
                .with_window(Duration::from_millis(50)),
        );

        assert!(limiter.allow("1.2.3.4"));
        assert!(limiter.allow("1.2.3.4"));
        assert!(limiter.allow("1.2.3.4"));
        // Fourth in the same window is denied
        assert!(!limiter.allow("1.2.3.4"));

        // Other identities are independent
        assert!(limiter.allow("5.6.7.8"));

        thread::sleep(Duration::from_millis(60));
        assert!(limiter.allow("1.2.3.4"));
    }

    #[test]
    fn test_rate_limiter_zero_limit_is_unlimited() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_max_requests(0));
        for _ in 0..100 {
            assert!(limiter.allow("anyone"));
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_rate_limiter_snapshot() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_max_requests(5)
                .with_window(Duration::from_secs(30)),
        );
        assert!(limiter.snapshot("k").is_none());
        limiter.allow("k");
        limiter.allow("k");

        let snap = limiter.snapshot("k").unwrap();
        assert_eq!(snap.limit, 5);
        assert_eq!(snap.used, 2);
        assert_eq!(snap.remaining, 3);
        assert!(snap.reset_in <= Duration::from_secs(30));
        assert!(snap.reset_in > Duration::from_secs(29));
    }

    #[test]
    fn test_rate_limiter_evicts_only_idle() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_max_requests(2)
                .with_window(Duration::from_millis(20))
                .with_idle_windows(1)
                .with_sweep_every(0),
        );
        limiter.allow("idle");
        thread::sleep(Duration::from_millis(40));
        limiter.allow("active");
        limiter.allow("active");

        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.tracked(), 1);
        assert!(limiter.snapshot("idle").is_none());
        // The active identity keeps its count and is still at the limit.
        assert!(!limiter.allow("active"));
    }

    #[test]
    fn test_rate_limiter_periodic_sweep() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_window(Duration::from_millis(5))
                .with_idle_windows(1)
                .with_sweep_every(2),
        );
        limiter.allow("a");
        thread::sleep(Duration::from_millis(15));
        limiter.allow("b"); // second check triggers the sweep
        assert_eq!(limiter.tracked(), 1);
        assert!(limiter.snapshot("a").is_none());
    }

    #[test]
    fn test_rate_limiter_concurrent_admission_is_exact() {
        let limiter = Arc::new(RateLimiter::new(
            RateLimiterConfig::new()
                .with_max_requests(25)
                .with_window(Duration::from_secs(60)),
        ));
        let admitted = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            handles.push(thread::spawn(move || {
                for _ in 0..10 {
                    if limiter.allow("shared") {
                        admitted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::Relaxed), 25);
    }
}
