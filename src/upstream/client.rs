//! Retrying upstream client.

use super::{Completion, GenerationRequest, UpstreamBackend, Usage};
use crate::resilience::retry::{Decision, RetryPolicy};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Sends prompts to a backend under a [`RetryPolicy`].
pub struct UpstreamClient {
    backend: Arc<dyn UpstreamBackend>,
    policy: RetryPolicy,
    default_model: String,
    max_tokens: u32,
    temperature: f32,
}

impl UpstreamClient {
    pub fn new(backend: Arc<dyn UpstreamBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            default_model: "gpt-3.5-turbo".into(),
            max_tokens: 700,
            temperature: 0.7,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Resolve the model a request will actually use.
    pub fn model_for<'a>(&'a self, hint: Option<&'a str>) -> &'a str {
        hint.filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.default_model)
    }

    /// Generate text for `prompt`.
    ///
    /// Transient failures (including a per-attempt timeout) are retried up to
    /// the policy's attempt budget; anything else fails on the first attempt.
    pub async fn generate(&self, prompt: &str, model_hint: Option<&str>) -> Result<Completion> {
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            model: self.model_for(model_hint).to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let start = Instant::now();
            let outcome =
                match tokio::time::timeout(self.policy.attempt_timeout, self.backend.complete(&request)).await {
                    Ok(res) => res,
                    Err(_) => Err(Error::transient(
                        "timeout",
                        format!("attempt exceeded {:?}", self.policy.attempt_timeout),
                    )),
                };

            let err = match outcome {
                Ok(mut completion) => {
                    completion.attempts = attempt;
                    log_usage(&completion, start.elapsed().as_millis() as u64);
                    return Ok(completion);
                }
                Err(e) => e,
            };

            match self.policy.decide(attempt, &err) {
                Decision::Retry { delay } => {
                    warn!(
                        backend = self.backend.name(),
                        model = %request.model,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "upstream attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Decision::Exhausted => {
                    warn!(backend = self.backend.name(), model = %request.model, attempts = attempt, error = %err, "upstream retries exhausted");
                    return Err(Error::UpstreamExhausted {
                        attempts: attempt,
                        last_error: Box::new(err),
                    });
                }
                Decision::Fail => {
                    warn!(backend = self.backend.name(), model = %request.model, attempt, error = %err, "upstream call failed permanently");
                    return Err(err);
                }
            }
        }
    }
}

/// USD per 1k prompt and completion tokens. More specific model names first,
/// since lookup is by substring.
const PRICES_PER_1K: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.000_15, 0.000_6),
    ("gpt-4o", 0.005, 0.015),
    ("gpt-3.5-turbo", 0.000_5, 0.001_5),
];

/// Estimated USD cost of a generation, if the model is priced.
fn estimated_cost(model: &str, usage: &Usage) -> Option<f64> {
    let model = model.to_ascii_lowercase();
    PRICES_PER_1K
        .iter()
        .find(|(name, _, _)| model.contains(name))
        .map(|(_, input, output)| {
            (usage.prompt_tokens as f64 * input + usage.completion_tokens as f64 * output) / 1000.0
        })
}

fn log_usage(completion: &Completion, latency_ms: u64) {
    let Some(usage) = completion.usage else {
        info!(model = %completion.model, attempts = completion.attempts, latency_ms, "upstream generation succeeded");
        return;
    };
    let cost = estimated_cost(&completion.model, &usage).map(|usd| format!("USD {:.6}", usd));
    info!(
        model = %completion.model,
        attempts = completion.attempts,
        latency_ms,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        estimated_cost = cost.as_deref().unwrap_or("unknown"),
        "upstream generation succeeded"
    );
}
