//! Progress events and the sink that receives them.
//!
//! The engine runs fine headless: with no sink attached every emit is a
//! no-op. A sink that fails (returns `Err` or panics) is logged and then
//! ignored, so progress reporting can never abort a run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

/// Events emitted while a run is in flight.
///
/// Serialized with a `type` tag. Consumers should ignore tags they do not
/// recognize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A new iteration is about to call the model.
    IterationStart {
        iteration: usize,
        max_iterations: usize,
    },

    /// Free-form status line.
    Status { message: String },

    /// The model named a tool; its arguments are still streaming.
    ToolPreparing { id: String, name: String },

    /// A running tool reported progress.
    ToolProgress {
        id: String,
        name: String,
        message: String,
    },

    /// A batch of tool calls is about to run.
    ToolsStart { count: usize, skipped: usize },

    ToolStart {
        id: String,
        name: String,
        args: serde_json::Value,
    },

    ToolComplete {
        id: String,
        name: String,
        success: bool,
        duration_ms: u64,
    },

    /// Sanitized result of a tool call.
    ToolResult {
        id: String,
        name: String,
        result: serde_json::Value,
    },

    /// Reasoning text streamed by the model.
    Thinking { content: String },

    /// Partial assistant text.
    ResponseChunk { content: String },

    Info { message: String },

    Error { message: String },
}

impl AgentEvent {
    /// Wire name of this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IterationStart { .. } => "iteration_start",
            Self::Status { .. } => "status",
            Self::ToolPreparing { .. } => "tool_preparing",
            Self::ToolProgress { .. } => "tool_progress",
            Self::ToolsStart { .. } => "tools_start",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolComplete { .. } => "tool_complete",
            Self::ToolResult { .. } => "tool_result",
            Self::Thinking { .. } => "thinking",
            Self::ResponseChunk { .. } => "response_chunk",
            Self::Info { .. } => "info",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Event could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event consumer is gone")]
    Closed,

    #[error("Event sink failed: {0}")]
    Other(String),
}

/// A consumer of progress events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AgentEvent) -> Result<(), SinkError>;
}

/// Fail-safe handle the engine and adapters emit through.
#[derive(Clone, Default)]
pub struct EventEmitter {
    sink: Option<Arc<dyn EventSink>>,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// An emitter that drops every event.
    pub fn headless() -> Self {
        Self { sink: None }
    }

    pub fn from_option(sink: Option<Arc<dyn EventSink>>) -> Self {
        Self { sink }
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Deliver an event. Sink failures are logged and swallowed.
    pub fn emit(&self, event: AgentEvent) {
        let Some(sink) = &self.sink else {
            return;
        };

        match catch_unwind(AssertUnwindSafe(|| sink.emit(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(event = event.event_type(), error = %e, "Event sink failed, continuing");
            }
            Err(_) => {
                warn!(event = event.event_type(), "Event sink panicked, continuing");
            }
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Forwards events into an unbounded tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &AgentEvent) -> Result<(), SinkError> {
        self.tx.send(event.clone()).map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink {
        calls: AtomicUsize,
    }

    impl EventSink for FailingSink {
        fn emit(&self, _event: &AgentEvent) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Other("disk full".into()))
        }
    }

    struct PanickingSink;

    impl EventSink for PanickingSink {
        fn emit(&self, _event: &AgentEvent) -> Result<(), SinkError> {
            panic!("sink exploded");
        }
    }

    #[test]
    fn event_serialization_uses_type_tag() {
        let event = AgentEvent::IterationStart {
            iteration: 1,
            max_iterations: 75,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"iteration_start""#));
        assert!(json.contains(r#""max_iterations":75"#));
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let events = vec![
            AgentEvent::ToolsStart {
                count: 2,
                skipped: 0,
            },
            AgentEvent::ResponseChunk {
                content: "Hi".into(),
            },
            AgentEvent::Error {
                message: "boom".into(),
            },
        ];
        for event in events {
            let json: serde_json::Value = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn headless_emitter_is_noop() {
        let emitter = EventEmitter::headless();
        assert!(!emitter.is_attached());
        emitter.emit(AgentEvent::Info {
            message: "nobody listens".into(),
        });
    }

    #[test]
    fn failing_sink_does_not_propagate() {
        let sink = Arc::new(FailingSink {
            calls: AtomicUsize::new(0),
        });
        let emitter = EventEmitter::new(sink.clone());
        emitter.emit(AgentEvent::Status {
            message: "one".into(),
        });
        emitter.emit(AgentEvent::Status {
            message: "two".into(),
        });
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_sink_is_contained() {
        let emitter = EventEmitter::new(Arc::new(PanickingSink));
        emitter.emit(AgentEvent::Thinking {
            content: "hmm".into(),
        });
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        let emitter = EventEmitter::new(Arc::new(sink));
        emitter.emit(AgentEvent::Info {
            message: "hello".into(),
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.event_type(), "info");
    }

    #[test]
    fn channel_sink_reports_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let err = sink
            .emit(&AgentEvent::Info {
                message: "late".into(),
            })
            .unwrap_err();
        assert!(matches!(err, SinkError::Closed));
    }
}
