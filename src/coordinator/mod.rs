//! # Request Coordinator
//!
//! The single entry point the routing layer calls. For each request it runs:
//!
//! 1. admission: [`RateLimiter::allow`] for the caller's identity
//! 2. cache lookup by fingerprint
//! 3. on miss, join the in-flight call for that fingerprint or lead a new one
//! 4. the leader's result is cached and handed to every waiter
//!
//! Concurrent identical requests collapse into one upstream call. Failures are
//! broadcast to all waiters and never cached, so the next request retries.
//!
//! ```rust,no_run
//! use quizgate::cache::FingerprintInputs;
//! use quizgate::config::GatewayConfig;
//! use quizgate::coordinator::RequestCoordinator;
//!
//! # async fn demo() -> quizgate::Result<()> {
//! let coordinator = RequestCoordinator::from_config(&GatewayConfig::from_env()?)?;
//! let inputs = FingerprintInputs::quiz("photosynthesis", "easy", "mcq");
//! let quiz = coordinator
//!     .resolve("203.0.113.9", &inputs, "Write 5 easy MCQs about photosynthesis")
//!     .await?;
//! println!("{}", quiz.text);
//! # Ok(())
//! # }
//! ```

mod flight;

use crate::cache::{
    CacheConfig, Fingerprint, FingerprintGenerator, FingerprintInputs, KeyedCache, MemoryCache,
};
use crate::config::GatewayConfig;
use crate::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::telemetry::{noop_sink, EventKind, EventSink, ResolveEvent};
use crate::upstream::{Completion, OpenAiBackend, UpstreamClient};
use crate::{Error, ErrorContext, ErrorKind, Result};
use flight::{InFlightTable, Role};
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identity recorded for calls that bypass admission control.
const INTERNAL_IDENTITY: &str = "internal";

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    /// This caller led the upstream call.
    Upstream,
    /// This caller waited on another caller's upstream call.
    Joined,
    /// Expired cache entry served because the upstream was exhausted.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub text: String,
    pub model: String,
    pub fingerprint: Fingerprint,
    pub source: Source,
    /// Upstream attempts spent for this response; 0 when served from cache.
    pub attempts: u32,
}

impl Resolved {
    fn new(completion: Completion, fingerprint: Fingerprint, source: Source) -> Self {
        let attempts = match source {
            Source::Cache | Source::Stale => 0,
            Source::Upstream | Source::Joined => completion.attempts,
        };
        Self {
            text: completion.text,
            model: completion.model,
            fingerprint,
            source,
            attempts,
        }
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub model: Option<String>,
    pub ttl: Option<Duration>,
}

impl ResolveOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// On `UpstreamExhausted`, answer with an expired entry if one is retained.
    pub serve_stale_on_exhausted: bool,
}

struct Inner {
    cache: Arc<KeyedCache>,
    limiter: Arc<RateLimiter>,
    upstream: Arc<UpstreamClient>,
    fingerprints: FingerprintGenerator,
    flights: Arc<InFlightTable>,
    sink: Arc<dyn EventSink>,
    config: CoordinatorConfig,
    janitor: OnceLock<JoinHandle<()>>,
}

/// Admission, caching and single-flight orchestration. Cheap to clone.
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

impl RequestCoordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Build every component from configuration, talking to the configured
    /// OpenAI-compatible endpoint. Starts the janitor when
    /// `coordinator.janitor_interval_secs` is non-zero.
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self> {
        cfg.validate()?;
        let backend = OpenAiBackend::new(
            &cfg.upstream.base_url,
            cfg.upstream.api_key.clone(),
            cfg.upstream.request_timeout(),
        )?;
        let upstream = UpstreamClient::new(Arc::new(backend), cfg.upstream.retry_policy())
            .with_default_model(cfg.upstream.model.clone())
            .with_max_tokens(cfg.upstream.max_tokens)
            .with_temperature(cfg.upstream.temperature);

        Self::builder()
            .cache(KeyedCache::new(
                cfg.cache.to_cache_config(),
                Arc::new(
                    MemoryCache::new(cfg.cache.max_entries)
                        .with_stale_grace(Duration::from_secs(cfg.cache.stale_grace_secs)),
                ),
            ))
            .rate_limiter(RateLimiter::new(cfg.rate_limit.to_limiter_config()))
            .upstream(upstream)
            .serve_stale_on_exhausted(cfg.coordinator.serve_stale_on_exhausted)
            .janitor_interval(cfg.coordinator.janitor_interval())
            .build()
    }

    pub fn cache(&self) -> &KeyedCache {
        &self.inner.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn upstream(&self) -> &UpstreamClient {
        &self.inner.upstream
    }

    /// Number of fingerprints with an upstream call in progress.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }

    /// Callers attached to the in-flight call for `fingerprint`, if any.
    pub fn waiters(&self, fingerprint: &Fingerprint) -> Option<usize> {
        self.inner.flights.waiters(fingerprint.as_str())
    }

    /// Whether a background janitor started with the coordinator is running.
    pub fn janitor_running(&self) -> bool {
        self.inner.janitor.get().is_some_and(|h| !h.is_finished())
    }

    /// Fingerprint a request would be cached under.
    pub fn fingerprint(&self, inputs: &FingerprintInputs, model: Option<&str>) -> Fingerprint {
        let model = self.inner.upstream.model_for(model);
        self.inner.fingerprints.generate(inputs, Some(model))
    }

    /// Admission, cache and single-flight upstream call for one request.
    pub async fn resolve(&self, identity: &str, inputs: &FingerprintInputs, prompt: &str) -> Result<Resolved> {
        self.resolve_inner(Some(identity), inputs, &ResolveOptions::default(), fixed(prompt))
            .await
    }

    pub async fn resolve_with(
        &self,
        identity: &str,
        inputs: &FingerprintInputs,
        prompt: &str,
        options: &ResolveOptions,
    ) -> Result<Resolved> {
        self.resolve_inner(Some(identity), inputs, options, fixed(prompt)).await
    }

    /// Like [`resolve_with`](Self::resolve_with), but `prompt` is only built
    /// once the caller is admitted and the cache has missed. Use it when
    /// building the prompt costs upstream work of its own.
    pub async fn resolve_deferred<F, Fut>(
        &self,
        identity: &str,
        inputs: &FingerprintInputs,
        options: &ResolveOptions,
        prompt: F,
    ) -> Result<Resolved>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = String>,
    {
        self.resolve_inner(Some(identity), inputs, options, prompt).await
    }

    /// Like [`resolve`](Self::resolve) without admission control, for
    /// server-side work not attributable to a client.
    pub async fn resolve_unlimited(
        &self,
        inputs: &FingerprintInputs,
        prompt: &str,
        options: &ResolveOptions,
    ) -> Result<Resolved> {
        self.resolve_inner(None, inputs, options, fixed(prompt)).await
    }

    /// Administrative flush of every cached generation.
    pub async fn clear_cache(&self) -> Result<()> {
        info!("clearing generation cache");
        self.inner.cache.clear().await
    }

    async fn resolve_inner<F, Fut>(
        &self,
        admission: Option<&str>,
        inputs: &FingerprintInputs,
        options: &ResolveOptions,
        prompt: F,
    ) -> Result<Resolved>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = String>,
    {
        let start = Instant::now();
        let inner = &self.inner;

        if let Some(identity) = admission {
            if !inner.limiter.allow(identity) {
                let retry_after = inner.limiter.snapshot(identity).map(|s| s.reset_in);
                self.emit(EventKind::RateLimited, None, identity, start, 0, ErrorKind::RateLimited.as_str())
                    .await;
                return Err(Error::RateLimited {
                    identity: identity.to_string(),
                    retry_after,
                });
            }
        }
        let identity = admission.unwrap_or(INTERNAL_IDENTITY);

        let model = inner.upstream.model_for(options.model.as_deref()).to_string();
        let fingerprint = inner.fingerprints.generate(inputs, Some(&model));

        if let Some(hit) = inner.cache.get::<Completion>(&fingerprint).await {
            self.emit(EventKind::CacheHit, Some(&fingerprint), identity, start, 0, "ok")
                .await;
            return Ok(Resolved::new(hit, fingerprint, Source::Cache));
        }

        let prompt = prompt().await;
        let (kind, source, outcome) = match inner.flights.join_or_lead(fingerprint.as_str()) {
            Role::Waiter(waiter) => {
                debug!(fingerprint = %fingerprint, identity, "joining in-flight generation");
                (EventKind::Joined, Source::Joined, waiter.wait().await)
            }
            Role::Leader { completer, waiter } => {
                let ttl = options.ttl.unwrap_or(inner.cache.config().default_ttl);
                let task_inner = Arc::clone(inner);
                let task_fp = fingerprint.clone();
                // The call runs on its own task so a cancelled leader does not
                // cancel it for the waiters or skip the cache write.
                tokio::spawn(async move {
                    // Another flight may have filled the cache between our read and the claim.
                    if let Some(hit) = task_inner.cache.get::<Completion>(&task_fp).await {
                        completer.complete(Ok(hit));
                        return;
                    }
                    let outcome = task_inner.upstream.generate(&prompt, Some(&model)).await;
                    if let Ok(ref completion) = outcome {
                        if let Err(e) = task_inner.cache.put(&task_fp, completion, ttl).await {
                            warn!(fingerprint = %task_fp, error = %e, "failed to cache generation");
                        }
                    }
                    completer.complete(outcome);
                });
                (EventKind::CacheMiss, Source::Upstream, waiter.wait().await)
            }
        };

        match outcome {
            Ok(completion) => {
                let retries = completion.attempts.saturating_sub(1);
                self.emit(kind, Some(&fingerprint), identity, start, retries, "ok")
                    .await;
                Ok(Resolved::new(completion, fingerprint, source))
            }
            Err(err) => {
                let retries = err.attempts().saturating_sub(1);
                if inner.config.serve_stale_on_exhausted && err.kind() == ErrorKind::UpstreamExhausted {
                    if let Some(stale) = inner.cache.get_stale::<Completion>(&fingerprint).await {
                        warn!(fingerprint = %fingerprint, identity, "upstream exhausted, serving stale generation");
                        self.emit(kind, Some(&fingerprint), identity, start, retries, "stale")
                            .await;
                        return Ok(Resolved::new(stale, fingerprint, Source::Stale));
                    }
                }
                self.emit(kind, Some(&fingerprint), identity, start, retries, err.kind().as_str())
                    .await;
                Err(err)
            }
        }
    }

    async fn emit(
        &self,
        kind: EventKind,
        fingerprint: Option<&Fingerprint>,
        identity: &str,
        start: Instant,
        retry_count: u32,
        outcome: &str,
    ) {
        let event = ResolveEvent {
            kind,
            fingerprint: fingerprint.map(|f| f.hash.clone()),
            identity: identity.to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
            retry_count,
            outcome: outcome.to_string(),
        };
        info!(
            event = event.kind.as_str(),
            fingerprint = event.fingerprint.as_deref().unwrap_or("-"),
            identity = %event.identity,
            latency_ms = event.latency_ms,
            retry_count = event.retry_count,
            outcome = %event.outcome,
            "resolve"
        );
        if let Err(e) = self.inner.sink.report(event).await {
            debug!(error = %e, "event sink rejected resolve event");
        }
    }

    /// Periodically purge expired cache entries and idle rate windows.
    ///
    /// The task ends once every handle to this coordinator is dropped.
    pub fn spawn_janitor(&self, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match inner.cache.purge_expired().await {
                    Ok(n) if n > 0 => debug!(purged = n, "purged expired cache entries"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "cache purge failed"),
                }
                inner.limiter.evict_idle();
            }
        })
    }
}

fn fixed(prompt: &str) -> impl FnOnce() -> std::future::Ready<String> + '_ {
    move || std::future::ready(prompt.to_string())
}

/// Builder for [`RequestCoordinator`].
///
/// Only the upstream client is required; cache and rate limiter default to an
/// in-memory cache and the default fixed window.
pub struct CoordinatorBuilder {
    cache: Option<Arc<KeyedCache>>,
    limiter: Option<Arc<RateLimiter>>,
    upstream: Option<Arc<UpstreamClient>>,
    fingerprints: FingerprintGenerator,
    sink: Arc<dyn EventSink>,
    config: CoordinatorConfig,
    janitor_interval: Option<Duration>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            cache: None,
            limiter: None,
            upstream: None,
            fingerprints: FingerprintGenerator::new(),
            sink: noop_sink(),
            config: CoordinatorConfig::default(),
            janitor_interval: None,
        }
    }

    pub fn cache(self, cache: KeyedCache) -> Self {
        self.shared_cache(Arc::new(cache))
    }

    /// Share one cache between several coordinators.
    pub fn shared_cache(mut self, cache: Arc<KeyedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn rate_limiter(self, limiter: RateLimiter) -> Self {
        self.shared_rate_limiter(Arc::new(limiter))
    }

    pub fn shared_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn upstream(mut self, upstream: UpstreamClient) -> Self {
        self.upstream = Some(Arc::new(upstream));
        self
    }

    pub fn fingerprint_generator(mut self, generator: FingerprintGenerator) -> Self {
        self.fingerprints = generator;
        self
    }

    /// Inject an event sink. Default is a no-op sink.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn serve_stale_on_exhausted(mut self, enable: bool) -> Self {
        self.config.serve_stale_on_exhausted = enable;
        self
    }

    /// Start [`RequestCoordinator::spawn_janitor`] on build. Needs a running
    /// tokio runtime; without one the janitor is skipped with a warning.
    pub fn janitor_interval(mut self, every: Option<Duration>) -> Self {
        self.janitor_interval = every;
        self
    }

    pub fn build(self) -> Result<RequestCoordinator> {
        let upstream = self.upstream.ok_or_else(|| {
            Error::configuration_with_context(
                "an upstream client is required",
                ErrorContext::new().with_source("coordinator_builder"),
            )
        })?;
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(KeyedCache::new(CacheConfig::default(), Arc::new(MemoryCache::default())))
        });
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::new(RateLimiterConfig::default())));

        let coordinator = RequestCoordinator {
            inner: Arc::new(Inner {
                cache,
                limiter,
                upstream,
                fingerprints: self.fingerprints,
                flights: Arc::new(InFlightTable::default()),
                sink: self.sink,
                config: self.config,
                janitor: OnceLock::new(),
            }),
        };
        if let Some(every) = self.janitor_interval.filter(|d| !d.is_zero()) {
            if tokio::runtime::Handle::try_current().is_ok() {
                let handle = coordinator.spawn_janitor(every);
                let _ = coordinator.inner.janitor.set(handle);
            } else {
                warn!(interval_ms = every.as_millis() as u64, "no tokio runtime, janitor not started");
            }
        }
        Ok(coordinator)
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::retry::RetryPolicy;
    use crate::upstream::{GenerationRequest, UpstreamBackend};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo {
        calls: AtomicU32,
    }

    #[async_trait]
    impl UpstreamBackend for Echo {
        async fn complete(&self, request: &GenerationRequest) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion::new(format!("echo: {}", request.prompt), request.model.clone()))
        }
        fn name(&self) -> &'static str {
            "echo"
        }
    }

    fn coordinator(backend: Arc<Echo>) -> RequestCoordinator {
        RequestCoordinator::builder()
            .upstream(UpstreamClient::new(backend, RetryPolicy::default()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_upstream() {
        let err = CoordinatorBuilder::new().build().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let backend = Arc::new(Echo { calls: AtomicU32::new(0) });
        let c = coordinator(backend.clone());
        let inputs = FingerprintInputs::quiz("rust", "easy", "mcq");

        let first = c.resolve("ip", &inputs, "prompt").await.unwrap();
        assert_eq!(first.source, Source::Upstream);
        assert_eq!(first.text, "echo: prompt");
        assert_eq!(first.attempts, 1);

        let second = c.resolve("ip", &inputs, "prompt").await.unwrap();
        assert_eq!(second.source, Source::Cache);
        assert_eq!(second.text, first.text);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(second.attempts, 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_model_override_uses_separate_entry() {
        let backend = Arc::new(Echo { calls: AtomicU32::new(0) });
        let c = coordinator(backend.clone());
        let inputs = FingerprintInputs::quiz("rust", "easy", "mcq");

        c.resolve("ip", &inputs, "p").await.unwrap();
        let other = c
            .resolve_with("ip", &inputs, "p", &ResolveOptions::default().with_model("gpt-4o"))
            .await
            .unwrap();
        assert_eq!(other.source, Source::Upstream);
        assert_eq!(other.model, "gpt-4o");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(other.fingerprint, c.fingerprint(&inputs, Some("gpt-4o")));
    }

    #[tokio::test]
    async fn test_deferred_prompt_not_built_when_denied_or_cached() {
        let backend = Arc::new(Echo { calls: AtomicU32::new(0) });
        let c = RequestCoordinator::builder()
            .upstream(UpstreamClient::new(backend.clone(), RetryPolicy::default()))
            .rate_limiter(RateLimiter::new(RateLimiterConfig::new().with_max_requests(2)))
            .build()
            .unwrap();
        let inputs = FingerprintInputs::quiz("rust", "easy", "mcq");
        let opts = ResolveOptions::default();
        let counter = AtomicU32::new(0);
        let built = &counter;
        let build = move || async move {
            built.fetch_add(1, Ordering::SeqCst);
            "deferred".to_string()
        };

        let first = c.resolve_deferred("ip", &inputs, &opts, build).await.unwrap();
        assert_eq!(first.text, "echo: deferred");
        let cached = c.resolve_deferred("ip", &inputs, &opts, build).await.unwrap();
        assert_eq!(cached.source, Source::Cache);
        let denied = c.resolve_deferred("ip", &inputs, &opts, build).await.unwrap_err();
        assert_eq!(denied.kind(), ErrorKind::RateLimited);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_from_config_starts_janitor() {
        let mut cfg = GatewayConfig::default();
        cfg.coordinator.janitor_interval_secs = 30;
        let c = RequestCoordinator::from_config(&cfg).unwrap();
        assert!(c.janitor_running());

        cfg.coordinator.janitor_interval_secs = 0;
        let quiet = RequestCoordinator::from_config(&cfg).unwrap();
        assert!(!quiet.janitor_running());
    }

    #[test]
    fn test_janitor_skipped_outside_runtime() {
        let backend = Arc::new(Echo { calls: AtomicU32::new(0) });
        let c = RequestCoordinator::builder()
            .upstream(UpstreamClient::new(backend, RetryPolicy::default()))
            .janitor_interval(Some(Duration::from_secs(1)))
            .build()
            .unwrap();
        assert!(!c.janitor_running());
    }

    #[tokio::test]
    async fn test_unlimited_skips_admission() {
        let backend = Arc::new(Echo { calls: AtomicU32::new(0) });
        let c = RequestCoordinator::builder()
            .upstream(UpstreamClient::new(backend, RetryPolicy::default()))
            .rate_limiter(RateLimiter::new(RateLimiterConfig::new().with_max_requests(1)))
            .build()
            .unwrap();
        let inputs = FingerprintInputs::quiz("rust", "easy", "mcq");

        for _ in 0..3 {
            c.resolve_unlimited(&inputs, "p", &ResolveOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(c.rate_limiter().tracked(), 0);
    }
}
