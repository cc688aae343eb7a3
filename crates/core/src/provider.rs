//! Provider adapter trait: the abstraction over LLM wire protocols.
//!
//! An adapter knows how to run exactly one model turn: translate the run's
//! transcript into its backend's request shape, stream the response, and
//! hand back text, tool calls, usage, and the next [`SessionState`].
//!
//! Implementations: Anthropic Messages (stateless streaming), OpenAI
//! Responses and Responses-compatible gateways (continuation), and
//! OpenAI-compatible chat completions on local runtimes.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::event::EventEmitter;
use crate::message::{Message, MessageToolCall};
use crate::tool::ToolCategory;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,

    /// Policy category, used by disable-by-category filtering. Never sent to a backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ToolCategory>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Per-provider bounds on the work a single iteration may schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceHints {
    /// Tool executions allowed in flight at once.
    pub max_concurrent_tools: usize,
    /// Tool calls executed per iteration; the rest are reported as skipped.
    pub max_tools_per_iteration: usize,
    /// Output token cap passed to the backend.
    pub max_output_tokens: u32,
    /// Set for slow or local backends.
    pub reduced_parallelism: bool,
}

impl Default for PerformanceHints {
    fn default() -> Self {
        Self {
            max_concurrent_tools: 4,
            max_tools_per_iteration: 16,
            max_output_tokens: 8192,
            reduced_parallelism: false,
        }
    }
}

impl PerformanceHints {
    /// Conservative hints for high-latency local runtimes.
    pub fn reduced() -> Self {
        Self {
            max_concurrent_tools: 1,
            max_tools_per_iteration: 8,
            max_output_tokens: 4096,
            reduced_parallelism: true,
        }
    }
}

/// Adapter-owned continuation state, threaded through every turn of a run.
///
/// Stateless adapters always return [`SessionState::Empty`]. Continuation
/// adapters record the backend's turn id and the ids of every message the
/// backend already holds, so the next turn only ships the delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Empty,
    Continuation {
        previous_turn_id: String,
        acknowledged: HashSet<String>,
    },
}

impl SessionState {
    pub fn previous_turn_id(&self) -> Option<&str> {
        match self {
            Self::Empty => None,
            Self::Continuation {
                previous_turn_id, ..
            } => Some(previous_turn_id),
        }
    }

    /// Whether the backend already holds the message with this id.
    pub fn is_acknowledged(&self, message_id: &str) -> bool {
        match self {
            Self::Empty => false,
            Self::Continuation { acknowledged, .. } => acknowledged.contains(message_id),
        }
    }
}

/// The wire-protocol family an adapter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    /// Full transcript per call, streamed content blocks.
    StatelessStreaming,
    /// Previous-turn id plus delta items per call.
    Continuation,
    /// Full transcript per call against a local runtime.
    Local,
}

/// Everything an adapter needs to run one turn.
pub struct TurnRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
    pub session: SessionState,
    pub hints: &'a PerformanceHints,
    /// Sink for `response_chunk` / `thinking` events while the turn streams.
    pub events: &'a EventEmitter,
}

/// The normalized outcome of one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOutput {
    /// Assistant text for this turn.
    pub text: String,
    /// Tool calls requested by the model, arguments already repaired to valid JSON.
    pub tool_calls: Vec<MessageToolCall>,
    /// State to pass into the next turn.
    pub session: SessionState,
    pub usage: Option<Usage>,
    /// Tool results stripped before transmission because their call was missing.
    pub orphans_dropped: usize,
}

/// The core adapter trait.
///
/// The engine calls `run_turn()` once per iteration without knowing which
/// protocol family is behind it.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable adapter id (e.g., "anthropic", "openai", "ollama").
    fn id(&self) -> &str;

    /// The protocol family this adapter speaks.
    fn family(&self) -> ProtocolFamily;

    /// Bounds the engine should apply when running this model.
    fn performance_hints(&self, _model: &str) -> PerformanceHints {
        PerformanceHints::default()
    }

    /// Whether tool calling is reliable for this model.
    fn supports_tools(&self, _model: &str) -> bool {
        true
    }

    /// Run a single model turn.
    async fn run_turn(
        &self,
        request: TurnRequest<'_>,
    ) -> Result<TurnOutput, ProviderError>;
}

/// A resolved provider for one model, as handed to the engine by the host.
#[derive(Clone)]
pub struct ProviderHandle {
    pub id: String,
    pub name: String,
    pub model: String,
    adapter: Arc<dyn ProviderAdapter>,
}

impl ProviderHandle {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Self {
        Self {
            id: adapter.id().to_string(),
            name: name.into(),
            model: model.into(),
            adapter,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    pub fn performance_hints(&self) -> PerformanceHints {
        self.adapter.performance_hints(&self.model)
    }

    /// Drop every tool when the model cannot call tools reliably.
    pub fn filter_tools_by_capability(&self, tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
        if self.adapter.supports_tools(&self.model) {
            tools.to_vec()
        } else {
            Vec::new()
        }
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("family", &self.adapter.family())
            .finish()
    }
}
