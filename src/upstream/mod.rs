//! # Upstream Generation Module
//!
//! Access to the text-generation service that produces quizzes and feedback.
//!
//! [`UpstreamBackend`] performs exactly one request. [`UpstreamClient`] wraps a
//! backend with a [`RetryPolicy`](crate::resilience::retry::RetryPolicy):
//! transient failures are retried with jittered backoff, permanent ones are
//! surfaced immediately, and a spent budget becomes
//! [`Error::UpstreamExhausted`](crate::Error::UpstreamExhausted).
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`UpstreamClient`] | Retrying client used by the coordinator |
//! | [`UpstreamBackend`] | Single-attempt backend trait |
//! | [`OpenAiBackend`] | OpenAI-compatible chat completions over HTTP |
//!
//! Successful generations are logged with token usage and, for known OpenAI
//! models, an estimated cost.

mod classify;
mod client;
mod openai;

pub use classify::{classify_status, parse_error_message};
pub use client::UpstreamClient;
pub use openai::OpenAiBackend;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One generation request as sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Token counters reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A successful generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Attempts spent, including the successful one.
    #[serde(default = "one")]
    pub attempts: u32,
}

fn one() -> u32 {
    1
}

impl Completion {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            usage: None,
            attempts: 1,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A single-attempt generation backend.
///
/// Implementations classify failures into the upstream error variants
/// (`UpstreamTransient`, `UpstreamAuthFailure`, `UpstreamInvalidRequest`) and
/// leave retrying to [`UpstreamClient`].
#[async_trait]
pub trait UpstreamBackend: Send + Sync {
    async fn complete(&self, request: &GenerationRequest) -> Result<Completion>;
    fn name(&self) -> &'static str;
}
