//! HTTP failure classification

use crate::Error;

/// Map a failed HTTP response to an upstream error.
///
/// - 408, 409, 429 and 5xx are transient
/// - 401/403 and quota exhaustion are credential/account problems, not retried
/// - any other 4xx is an invalid request
pub fn classify_status(status: u16, retry_after_ms: Option<u64>, body: &str) -> Error {
    let message = parse_error_message(body).unwrap_or_else(|| truncate(body, 512));
    let code = error_code_from_body(body);

    let class = match status {
        401 | 403 => return Error::UpstreamAuthFailure { status, message },
        // OpenAI reports a drained account as 429; retrying cannot help.
        429 if code.as_deref() == Some("insufficient_quota") => {
            return Error::UpstreamAuthFailure { status, message }
        }
        429 => "rate_limited",
        408 => "timeout",
        409 => "conflict",
        503 | 529 => "overloaded",
        500..=599 => "server_error",
        _ => return Error::UpstreamInvalidRequest { status, message },
    };

    Error::UpstreamTransient {
        status: Some(status),
        class: class.to_string(),
        message,
        retry_after_ms,
    }
}

/// Extract `error.message` from an OpenAI-style error body.
pub fn parse_error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn error_code_from_body(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let err = json.get("error")?;
    err.get("code")
        .or_else(|| err.get("type"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
