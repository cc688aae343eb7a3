//! Local runtime adapter (OpenAI-compatible chat completions).
//!
//! Works with Ollama, llama.cpp server, LM Studio, vLLM, and any endpoint
//! exposing `/chat/completions` with SSE streaming.
//!
//! Stateless like the Anthropic adapter, but tuned for slow local backends:
//! reduced parallelism hints, and tool calling switched off entirely for
//! models listed as unable to call tools reliably.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use turnwright_core::{
    AgentEvent, EventEmitter, Message, MessageToolCall, PerformanceHints, ProtocolFamily,
    ProviderAdapter, ProviderError, Role, SessionState, ToolDefinition, TurnOutput, TurnRequest,
    Usage, parse_arguments,
};

use crate::pairing::strip_orphans;
use crate::sse::{Flow, build_client, ensure_success, for_each_event};

const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

pub struct LocalAdapter {
    id: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    hints: PerformanceHints,
    /// Model-name prefixes without reliable tool calling.
    no_tool_models: Vec<String>,
}

impl LocalAdapter {
    pub fn new(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Ok(Self {
            id: "ollama".into(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: None,
            // Local models can take minutes on the first token.
            client: build_client(Duration::from_secs(600))?,
            hints: PerformanceHints::reduced(),
            no_tool_models: Vec::new(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_hints(mut self, hints: PerformanceHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_no_tool_models(mut self, prefixes: Vec<String>) -> Self {
        self.no_tool_models = prefixes;
        self
    }

    /// Convert our Message types to chat-completions format.
    fn to_api_messages(messages: &[&Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                    Role::Tool => "tool",
                },
                content: ApiContent::from_message(m),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function",
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function",
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }
}

#[async_trait]
impl ProviderAdapter for LocalAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Local
    }

    fn performance_hints(&self, _model: &str) -> PerformanceHints {
        self.hints.clone()
    }

    fn supports_tools(&self, model: &str) -> bool {
        let model = model.to_lowercase();
        let bare = model.rsplit('/').next().unwrap_or(&model);
        !self
            .no_tool_models
            .iter()
            .any(|prefix| bare.starts_with(&prefix.to_lowercase()))
    }

    async fn run_turn(&self, request: TurnRequest<'_>) -> Result<TurnOutput, ProviderError> {
        let (messages, orphans_dropped) = strip_orphans(request.messages);
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.hints.max_output_tokens,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !request.tools.is_empty() && self.supports_tools(request.model) {
            body["tools"] = serde_json::json!(Self::to_api_tools(request.tools));
        }

        debug!(provider = %self.id, model = %request.model, "Sending streaming request");

        let mut req = self.client.post(&url).header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let response = req
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = ensure_success(&self.id, response).await?;

        let mut stream = ChatStream::default();
        for_each_event(&self.id, response, |event| stream.handle(event, request.events)).await?;
        let (text, tool_calls, usage) = stream.finish();

        Ok(TurnOutput {
            text,
            tool_calls,
            session: SessionState::Empty,
            usage,
            orphans_dropped,
        })
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn to_tool_call(&self, index: u32) -> MessageToolCall {
        let parsed = parse_arguments(&self.arguments);
        if parsed.repaired {
            warn!(tool = %self.name, "Repaired streamed tool arguments");
        }
        MessageToolCall {
            // Some local runtimes omit call ids.
            id: if self.id.is_empty() {
                format!("call_{index}")
            } else {
                self.id.clone()
            },
            name: self.name.clone(),
            arguments: parsed.value.to_string(),
        }
    }
}

/// Decodes a streamed chat-completions turn.
#[derive(Debug, Default)]
pub(crate) struct ChatStream {
    text: String,
    // Keyed by delta index; ordered so calls come out as the model issued them.
    calls: BTreeMap<u32, ToolCallAccumulator>,
    usage: Option<Usage>,
}

impl ChatStream {
    pub(crate) fn handle(
        &mut self,
        event: &serde_json::Value,
        events: &EventEmitter,
    ) -> Result<Flow, ProviderError> {
        if let Some(message) = event["error"]["message"].as_str() {
            return Err(ProviderError::StreamInterrupted(message.to_string()));
        }

        let chunk: StreamResponse = serde_json::from_value(event.clone()).map_err(|e| {
            ProviderError::InvalidResponse(format!("malformed chat stream chunk: {e}"))
        })?;

        if let Some(u) = chunk.usage {
            self.usage = Some(Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.text.push_str(&content);
                events.emit(AgentEvent::ResponseChunk { content });
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let acc = self.calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    acc.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        if acc.name.is_empty() {
                            events.emit(AgentEvent::ToolPreparing {
                                id: acc.id.clone(),
                                name: name.clone(),
                            });
                        }
                        acc.name.push_str(&name);
                    }
                    if let Some(args) = function.arguments {
                        acc.arguments.push_str(&args);
                    }
                }
            }
        }

        Ok(Flow::Continue)
    }

    pub(crate) fn finish(self) -> (String, Vec<MessageToolCall>, Option<Usage>) {
        let calls = self
            .calls
            .iter()
            .map(|(index, acc)| acc.to_tool_call(*index))
            .collect();
        (self.text, calls, self.usage)
    }
}

// --- Chat completions API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<serde_json::Value>),
}

impl ApiContent {
    /// Images only travel on user messages; tool results stay text.
    fn from_message(m: &Message) -> Self {
        if m.images.is_empty() || m.role != Role::User {
            return Self::Text(m.content.clone());
        }
        let mut parts = vec![serde_json::json!({"type": "text", "text": m.content})];
        parts.extend(m.images.iter().map(|img| {
            serde_json::json!({"type": "image_url", "image_url": {"url": img.data_url()}})
        }));
        Self::Parts(parts)
    }
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: &'static str,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta, arriving incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
