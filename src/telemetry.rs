//! Structured resolve events.
//!
//! Every call through the coordinator produces one [`ResolveEvent`]. Events are
//! always written to `tracing`; an [`EventSink`] can forward them elsewhere
//! (metrics, request logs). The default sink discards them.

use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// How a request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CacheHit,
    CacheMiss,
    /// Attached to another caller's in-flight upstream call.
    Joined,
    RateLimited,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CacheHit => "cache_hit",
            EventKind::CacheMiss => "cache_miss",
            EventKind::Joined => "joined",
            EventKind::RateLimited => "rate_limited",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolveEvent {
    pub kind: EventKind,
    pub fingerprint: Option<String>,
    pub identity: String,
    pub latency_ms: u64,
    /// Upstream attempts beyond the first.
    pub retry_count: u32,
    /// `"ok"`, `"stale"`, or the error kind.
    pub outcome: String,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn report(&self, event: ResolveEvent) -> Result<()>;
}

pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn report(&self, _event: ResolveEvent) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoopEventSink)
}

/// In-memory sink for testing.
pub struct InMemoryEventSink {
    events: RwLock<Vec<ResolveEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    pub fn new(max: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            max_events: max,
        }
    }
    pub fn events(&self) -> Vec<ResolveEvent> {
        self.events
            .read()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn report(&self, event: ResolveEvent) -> Result<()> {
        if let Ok(mut events) = self.events.write() {
            events.push(event);
            if events.len() > self.max_events {
                events.remove(0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> ResolveEvent {
        ResolveEvent {
            kind,
            fingerprint: Some("abc".into()),
            identity: "10.0.0.1".into(),
            latency_ms: 3,
            retry_count: 0,
            outcome: "ok".into(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_sink_caps_events() {
        let sink = InMemoryEventSink::new(2);
        sink.report(event(EventKind::CacheMiss)).await.unwrap();
        sink.report(event(EventKind::CacheHit)).await.unwrap();
        sink.report(event(EventKind::CacheHit)).await.unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.count(EventKind::CacheHit), 2);
        assert_eq!(sink.count(EventKind::CacheMiss), 0);
    }

    #[test]
    fn test_event_serializes_snake_case() {
        let json = serde_json::to_value(event(EventKind::RateLimited)).unwrap();
        assert_eq!(json["kind"], "rate_limited");
        assert_eq!(json["identity"], "10.0.0.1");
    }
}
