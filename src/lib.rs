//! # quizgate
//!
//! Request-shaping layer for AI quiz generation: every prompt that reaches the
//! text-generation service goes through per-client admission control, a
//! fingerprint-keyed cache and single-flight deduplication, with bounded
//! retries against the upstream.
//!
//! ## Overview
//!
//! A routing layer calls [`RequestCoordinator::resolve`] with the caller's
//! identity, the semantic inputs of the request and the rendered prompt. The
//! coordinator answers from cache when it can, attaches to an identical call
//! already in progress when there is one, and otherwise leads a new upstream
//! call whose result is cached and shared with everyone who joined it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quizgate::config::GatewayConfig;
//! use quizgate::tasks::QuizTasks;
//! use quizgate::RequestCoordinator;
//!
//! #[tokio::main]
//! async fn main() -> quizgate::Result<()> {
//!     let coordinator = RequestCoordinator::from_config(&GatewayConfig::from_env()?)?;
//!     let tasks = QuizTasks::new(coordinator);
//!
//!     let quiz = tasks.generate_quiz("203.0.113.9", "volcanoes", "medium", "MCQ").await?;
//!     println!("{} ({:?})", quiz.text, quiz.source);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Fingerprints, cache backends and the keyed cache |
//! | [`config`] | YAML and environment configuration |
//! | [`coordinator`] | Admission, cache and single-flight orchestration |
//! | [`resilience`] | Per-identity rate limiting and retry policy |
//! | [`tasks`] | Quiz prompt templates and helper tasks |
//! | [`telemetry`] | Structured resolve events and sinks |
//! | [`upstream`] | Generation backends and the retrying client |

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod resilience;
pub mod tasks;
pub mod telemetry;
pub mod upstream;

pub use coordinator::{CoordinatorBuilder, RequestCoordinator, ResolveOptions, Resolved, Source};
pub use telemetry::{EventKind, EventSink, ResolveEvent};
pub use upstream::{Completion, UpstreamBackend, UpstreamClient};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ErrorKind};
