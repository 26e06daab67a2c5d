//! Shared test doubles.

#![allow(dead_code)]

use async_trait::async_trait;
use quizgate::resilience::retry::RetryPolicy;
use quizgate::upstream::{Completion, GenerationRequest, UpstreamBackend};
use quizgate::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Backend that replays a script of outcomes, then echoes the prompt.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String>>>,
    calls: AtomicU32,
    delay: Duration,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn echo() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamBackend for ScriptedBackend {
    async fn complete(&self, request: &GenerationRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        let text = match next {
            Some(outcome) => outcome?,
            None => format!("quiz for: {}", request.prompt),
        };
        Ok(Completion::new(text, request.model.clone()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn transient() -> Error {
    Error::transient("server_error", "HTTP 503: overloaded")
}

/// Default attempt budget with millisecond backoff.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new()
        .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
        .with_attempt_timeout(Duration::from_secs(2))
}
