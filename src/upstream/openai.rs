//! OpenAI-compatible chat completions backend.

use super::classify::classify_status;
use super::{Completion, GenerationRequest, UpstreamBackend, Usage};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: url::Url,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiBackend {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(base_url: &str, api_key: Option<String>, request_timeout: Duration) -> Result<Self> {
        let mut root = url::Url::parse(base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid upstream base URL: {}", e),
                ErrorContext::new()
                    .with_field_path("upstream.base_url")
                    .with_details(base_url.to_string()),
            )
        })?;
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        let endpoint = root.join("chat/completions").map_err(|e| {
            Error::configuration_with_context(
                format!("invalid upstream base URL: {}", e),
                ErrorContext::new().with_field_path("upstream.base_url"),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| {
                Error::runtime_with_context(
                    format!("failed to build HTTP client: {}", e),
                    ErrorContext::new().with_source("openai_backend"),
                )
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// Best-effort parsing of `Retry-After: <seconds>`.
    fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
        let raw = headers.get("retry-after")?.to_str().ok()?;
        let secs: f64 = raw.trim().parse().ok()?;
        if secs.is_finite() && secs >= 0.0 {
            Some((secs * 1000.0) as u64)
        } else {
            None
        }
    }

    fn transport_error(e: reqwest::Error) -> Error {
        let class = if e.is_timeout() { "timeout" } else { "network" };
        Error::transient(class, e.to_string())
    }
}

#[async_trait]
impl UpstreamBackend for OpenAiBackend {
    async fn complete(&self, request: &GenerationRequest) -> Result<Completion> {
        let body = ChatRequest {
            model: &request.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut req = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(Self::transport_error)?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after_ms = Self::retry_after_ms(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            debug!(http_status = status, model = %request.model, "upstream returned error status");
            return Err(classify_status(status, retry_after_ms, &text));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| {
            if e.is_decode() {
                Error::transient("invalid_response", format!("undecodable completion body: {}", e))
            } else {
                Self::transport_error(e)
            }
        })?;

        // An empty completion is treated like a garbled response: another sample may work.
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::transient("invalid_response", "completion contained no text"))?;

        Ok(Completion {
            text,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            usage: parsed.usage,
            attempts: 1,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
