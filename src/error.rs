use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "upstream.base_url")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "coordinator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Coarse error category, stable across message changes.
///
/// Routing layers map this to a response status; see [`ErrorKind::http_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimited,
    UpstreamTransient,
    UpstreamAuthFailure,
    UpstreamInvalidRequest,
    UpstreamExhausted,
    Configuration,
    Serialization,
    Runtime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UpstreamTransient => "upstream_transient",
            ErrorKind::UpstreamAuthFailure => "upstream_auth_failure",
            ErrorKind::UpstreamInvalidRequest => "upstream_invalid_request",
            ErrorKind::UpstreamExhausted => "upstream_exhausted",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Runtime => "runtime",
        }
    }

    /// HTTP-equivalent status a routing layer should answer with.
    ///
    /// Rate limiting is "too many requests"; an exhausted or flaky upstream is
    /// "service unavailable", never an empty success.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::RateLimited => 429,
            ErrorKind::UpstreamTransient | ErrorKind::UpstreamExhausted => 503,
            ErrorKind::UpstreamAuthFailure => 502,
            ErrorKind::UpstreamInvalidRequest => 400,
            ErrorKind::Configuration | ErrorKind::Serialization | ErrorKind::Runtime => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the gateway.
///
/// Errors are `Clone` because a single upstream outcome is broadcast to every
/// caller waiting on the same fingerprint.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Rate limit exceeded for '{identity}'")]
    RateLimited {
        identity: String,
        retry_after: Option<Duration>,
    },

    #[error("Transient upstream failure ({class}): {message}")]
    UpstreamTransient {
        status: Option<u16>,
        class: String,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Upstream rejected credentials: HTTP {status}: {message}")]
    UpstreamAuthFailure { status: u16, message: String },

    #[error("Upstream rejected request: HTTP {status}: {message}")]
    UpstreamInvalidRequest { status: u16, message: String },

    #[error("Upstream unavailable after {attempts} attempts: {last_error}")]
    UpstreamExhausted {
        attempts: u32,
        last_error: Box<Error>,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    pub fn transient(class: impl Into<String>, message: impl Into<String>) -> Self {
        Error::UpstreamTransient {
            status: None,
            class: class.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::UpstreamTransient { .. } => ErrorKind::UpstreamTransient,
            Error::UpstreamAuthFailure { .. } => ErrorKind::UpstreamAuthFailure,
            Error::UpstreamInvalidRequest { .. } => ErrorKind::UpstreamInvalidRequest,
            Error::UpstreamExhausted { .. } => ErrorKind::UpstreamExhausted,
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Runtime { .. } => ErrorKind::Runtime,
        }
    }

    /// Whether another attempt against the upstream could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::UpstreamTransient { .. })
    }

    /// Provider-supplied wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::UpstreamTransient {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Number of upstream attempts spent before this error, when known.
    pub fn attempts(&self) -> u32 {
        match self {
            Error::UpstreamExhausted { attempts, .. } => *attempts,
            Error::UpstreamTransient { .. }
            | Error::UpstreamAuthFailure { .. }
            | Error::UpstreamInvalidRequest { .. } => 1,
            _ => 0,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}
