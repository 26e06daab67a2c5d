//! Gateway configuration.
//!
//! Loaded from YAML, then overridden by environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `QUIZGATE_CONFIG` | path of a YAML file read by [`GatewayConfig::from_env`] |
//! | `QUIZGATE_CACHE_ENABLED` | `cache.enabled` |
//! | `QUIZGATE_CACHE_TTL_SECS` | `cache.ttl_secs` |
//! | `QUIZGATE_CACHE_MAX_ENTRIES` | `cache.max_entries` |
//! | `QUIZGATE_RATE_LIMIT` | `rate_limit.max_requests` |
//! | `QUIZGATE_RATE_WINDOW_SECS` | `rate_limit.window_secs` |
//! | `QUIZGATE_UPSTREAM_BASE_URL` | `upstream.base_url` |
//! | `QUIZGATE_MODEL` | `upstream.model` |
//! | `QUIZGATE_MAX_ATTEMPTS` | `upstream.max_attempts` |
//! | `QUIZGATE_ATTEMPT_TIMEOUT_SECS` | `upstream.attempt_timeout_secs` |
//! | `QUIZGATE_SERVE_STALE` | `coordinator.serve_stale_on_exhausted` |
//! | `OPENAI_API_KEY` | `upstream.api_key` |

use crate::cache::CacheConfig;
use crate::resilience::rate_limiter::RateLimiterConfig;
use crate::resilience::retry::RetryPolicy;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub cache: CacheSection,
    pub rate_limit: RateLimitSection,
    pub upstream: UpstreamSection,
    pub coordinator: CoordinatorSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
    pub max_entry_bytes: usize,
    pub key_prefix: Option<String>,
    /// Seconds an expired entry is retained for stale serving.
    pub stale_grace_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            max_entries: 10_000,
            max_entry_bytes: 1024 * 1024,
            key_prefix: Some("quiz_cache".into()),
            stale_grace_secs: 0,
        }
    }
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        let cfg = CacheConfig::new()
            .with_enabled(self.enabled)
            .with_ttl(Duration::from_secs(self.ttl_secs))
            .with_max_entry_size(self.max_entry_bytes)
            .with_stale_grace(Duration::from_secs(self.stale_grace_secs));
        match &self.key_prefix {
            Some(prefix) => cfg.with_key_prefix(prefix.clone()),
            None => cfg.without_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// `0` disables limiting.
    pub max_requests: u32,
    pub window_secs: u64,
    pub idle_windows: u32,
    pub sweep_every: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_secs: 60,
            idle_windows: 4,
            sweep_every: 1024,
        }
    }
}

impl RateLimitSection {
    pub fn to_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new()
            .with_max_requests(self.max_requests)
            .with_window(Duration::from_secs(self.window_secs))
            .with_idle_windows(self.idle_windows)
            .with_sweep_every(self.sweep_every)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    pub base_url: String,
    /// Never written back out when the config is serialized.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub attempt_timeout_secs: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-3.5-turbo".into(),
            max_tokens: 700,
            temperature: 0.7,
            request_timeout_secs: 30,
            max_attempts: 3,
            min_backoff_ms: 1000,
            max_backoff_ms: 2000,
            attempt_timeout_secs: 30,
        }
    }
}

impl UpstreamSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_backoff(
                Duration::from_millis(self.min_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            )
            .with_attempt_timeout(Duration::from_secs(self.attempt_timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    pub serve_stale_on_exhausted: bool,
    /// Interval of the background purge task; `0` disables it.
    pub janitor_interval_secs: u64,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            serve_stale_on_exhausted: false,
            janitor_interval_secs: 60,
        }
    }
}

impl CoordinatorSection {
    pub fn janitor_interval(&self) -> Option<Duration> {
        (self.janitor_interval_secs > 0).then(|| Duration::from_secs(self.janitor_interval_secs))
    }
}

impl GatewayConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to parse config: {}", e),
                ErrorContext::new().with_source("config_loader"),
            )
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read config file: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Defaults (or `QUIZGATE_CONFIG` when set) with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("QUIZGATE_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = var("QUIZGATE_CACHE_ENABLED") {
            self.cache.enabled = parse_flag("QUIZGATE_CACHE_ENABLED", &v)?;
        }
        if let Some(v) = var("QUIZGATE_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_var("QUIZGATE_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = var("QUIZGATE_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = parse_var("QUIZGATE_CACHE_MAX_ENTRIES", &v)?;
        }
        if let Some(v) = var("QUIZGATE_RATE_LIMIT") {
            self.rate_limit.max_requests = parse_var("QUIZGATE_RATE_LIMIT", &v)?;
        }
        if let Some(v) = var("QUIZGATE_RATE_WINDOW_SECS") {
            self.rate_limit.window_secs = parse_var("QUIZGATE_RATE_WINDOW_SECS", &v)?;
        }
        if let Some(v) = var("QUIZGATE_UPSTREAM_BASE_URL") {
            self.upstream.base_url = v;
        }
        if let Some(v) = var("QUIZGATE_MODEL") {
            self.upstream.model = v;
        }
        if let Some(v) = var("QUIZGATE_MAX_ATTEMPTS") {
            self.upstream.max_attempts = parse_var("QUIZGATE_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("QUIZGATE_ATTEMPT_TIMEOUT_SECS") {
            self.upstream.attempt_timeout_secs = parse_var("QUIZGATE_ATTEMPT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("QUIZGATE_SERVE_STALE") {
            self.coordinator.serve_stale_on_exhausted = parse_flag("QUIZGATE_SERVE_STALE", &v)?;
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.upstream.api_key = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries", "must be at least 1"));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(invalid("rate_limit.window_secs", "window must be positive"));
        }
        if self.upstream.max_attempts == 0 {
            return Err(invalid("upstream.max_attempts", "must be at least 1"));
        }
        if self.upstream.min_backoff_ms > self.upstream.max_backoff_ms {
            return Err(invalid(
                "upstream.min_backoff_ms",
                "must not exceed upstream.max_backoff_ms",
            ));
        }
        if self.upstream.attempt_timeout_secs == 0 {
            return Err(invalid("upstream.attempt_timeout_secs", "must be positive"));
        }
        if self.upstream.max_tokens == 0 {
            return Err(invalid("upstream.max_tokens", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.upstream.temperature) {
            return Err(invalid("upstream.temperature", "must be within [0, 2]"));
        }
        if self.upstream.model.trim().is_empty() {
            return Err(invalid("upstream.model", "must not be empty"));
        }
        if let Err(e) = url::Url::parse(&self.upstream.base_url) {
            return Err(invalid("upstream.base_url", &e.to_string()));
        }
        Ok(())
    }
}

fn invalid(field: &str, details: &str) -> Error {
    Error::configuration_with_context(
        format!("invalid value for {}", field),
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("config_validation"),
    )
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| {
        Error::configuration_with_context(
            format!("invalid value for {}", name),
            ErrorContext::new()
                .with_field_path(name)
                .with_details(format!("{:?}: {}", value, e))
                .with_source("config_env"),
        )
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => parse_var::<bool>(name, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = GatewayConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.cache.ttl_secs, 3600);
        assert_eq!(cfg.upstream.max_attempts, 3);
        assert_eq!(cfg.upstream.model, "gpt-3.5-turbo");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = GatewayConfig::from_yaml_str(
            "rate_limit:\n  max_requests: 5\n  window_secs: 10\nupstream:\n  model: gpt-4o-mini\n",
        )
        .unwrap();
        assert_eq!(cfg.rate_limit.max_requests, 5);
        assert_eq!(cfg.rate_limit.window_secs, 10);
        assert_eq!(cfg.rate_limit.idle_windows, 4);
        assert_eq!(cfg.upstream.model, "gpt-4o-mini");
        assert_eq!(cfg.cache, CacheSection::default());

        let limiter = cfg.rate_limit.to_limiter_config();
        assert_eq!(limiter.window, Duration::from_secs(10));
    }

    #[test]
    fn test_bad_yaml_is_configuration_error() {
        let err = GatewayConfig::from_yaml_str("cache: [1, 2").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("QUIZGATE_RATE_LIMIT", "3"),
            ("QUIZGATE_CACHE_ENABLED", "off"),
            ("QUIZGATE_MODEL", " gpt-4o "),
            ("QUIZGATE_SERVE_STALE", "1"),
            ("OPENAI_API_KEY", "sk-test"),
            ("QUIZGATE_CACHE_TTL_SECS", ""),
        ]
        .into_iter()
        .collect();
        let mut cfg = GatewayConfig::default();
        cfg.apply_env_with(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.rate_limit.max_requests, 3);
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.upstream.model, "gpt-4o");
        assert!(cfg.coordinator.serve_stale_on_exhausted);
        assert_eq!(cfg.upstream.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.cache.ttl_secs, 3600);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut cfg = GatewayConfig::default();
        let err = cfg
            .apply_env_with(|k| (k == "QUIZGATE_MAX_ATTEMPTS").then(|| "three".to_string()))
            .unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.field_path.as_deref(), Some("QUIZGATE_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_validate_rejects_zero_window_and_inverted_backoff() {
        let mut cfg = GatewayConfig::default();
        cfg.rate_limit.window_secs = 0;
        let err = cfg.validate().unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("rate_limit.window_secs")
        );

        let mut cfg = GatewayConfig::default();
        cfg.upstream.min_backoff_ms = 5000;
        assert!(cfg.validate().is_err());

        let mut cfg = GatewayConfig::default();
        cfg.upstream.base_url = "not a url".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut cfg = GatewayConfig::default();
        cfg.upstream.api_key = Some("sk-secret".into());
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        assert!(!yaml.contains("sk-secret"));
        assert!(yaml.contains("base_url"));
    }

    #[test]
    fn test_retry_policy_from_section() {
        let policy = UpstreamSection::default().retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.min_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(2));
    }
}
