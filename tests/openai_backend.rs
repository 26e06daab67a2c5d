//! HTTP behaviour of the OpenAI-compatible backend against a mock server.

use mockito::{Matcher, Server};
use quizgate::resilience::retry::RetryPolicy;
use quizgate::upstream::{GenerationRequest, OpenAiBackend, UpstreamBackend, UpstreamClient};
use quizgate::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

const SUCCESS_BODY: &str = r#"{
  "id": "chatcmpl-1",
  "model": "gpt-3.5-turbo-0125",
  "choices": [{"index": 0, "message": {"role": "assistant", "content": "  Q1. What is H2O?\nAnswer: water  "}}],
  "usage": {"prompt_tokens": 12, "completion_tokens": 30, "total_tokens": 42}
}"#;

fn request() -> GenerationRequest {
    GenerationRequest {
        prompt: "Make a quiz about water".into(),
        model: "gpt-3.5-turbo".into(),
        max_tokens: 700,
        temperature: 0.7,
    }
}

fn backend(url: &str) -> OpenAiBackend {
    OpenAiBackend::new(url, Some("sk-test".into()), Duration::from_secs(5)).unwrap()
}

fn client(url: &str) -> UpstreamClient {
    UpstreamClient::new(
        Arc::new(backend(url)),
        RetryPolicy::new().with_backoff(Duration::from_millis(1), Duration::from_millis(5)),
    )
}

#[tokio::test]
async fn success_parses_text_and_usage() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "model": "gpt-3.5-turbo",
            "max_tokens": 700,
            "messages": [{"role": "user", "content": "Make a quiz about water"}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(SUCCESS_BODY)
        .create_async()
        .await;

    let completion = backend(&server.url()).complete(&request()).await.unwrap();
    assert_eq!(completion.text, "Q1. What is H2O?\nAnswer: water");
    assert_eq!(completion.model, "gpt-3.5-turbo-0125");
    assert_eq!(completion.usage.unwrap().total_tokens, 42);
    mock.assert_async().await;
}

#[tokio::test]
async fn persistent_server_error_exhausts_after_three_attempts() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body(r#"{"error": {"message": "overloaded"}}"#)
        .expect(3)
        .create_async()
        .await;

    let err = client(&server.url()).generate("q", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamExhausted);
    assert_eq!(err.attempts(), 3);
    mock.assert_async().await;
}

#[tokio::test]
async fn unauthorized_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(401)
        .with_body(r#"{"error": {"message": "Incorrect API key provided", "code": "invalid_api_key"}}"#)
        .expect(1)
        .create_async()
        .await;

    let err = client(&server.url()).generate("q", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamAuthFailure);
    assert!(err.to_string().contains("Incorrect API key"));
    mock.assert_async().await;
}

#[tokio::test]
async fn quota_exhaustion_is_an_auth_failure() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_body(r#"{"error": {"message": "You exceeded your current quota", "code": "insufficient_quota"}}"#)
        .expect(1)
        .create_async()
        .await;

    let err = client(&server.url()).generate("q", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamAuthFailure);
    mock.assert_async().await;
}

#[tokio::test]
async fn rate_limited_response_carries_retry_after() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_header("retry-after", "2")
        .with_body(r#"{"error": {"message": "Rate limit reached"}}"#)
        .create_async()
        .await;

    let err = backend(&server.url()).complete(&request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamTransient);
    assert!(err.is_retryable());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
}

#[tokio::test]
async fn bad_request_is_invalid_and_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(400)
        .with_body(r#"{"error": {"message": "maximum context length exceeded"}}"#)
        .expect(1)
        .create_async()
        .await;

    let err = client(&server.url()).generate("q", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamInvalidRequest);
    assert_eq!(err.kind().http_status(), 400);
    mock.assert_async().await;
}

#[tokio::test]
async fn empty_completion_is_transient() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "   "}}]}"#)
        .create_async()
        .await;

    let err = backend(&server.url()).complete(&request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamTransient);
}
