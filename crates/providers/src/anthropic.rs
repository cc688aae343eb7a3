//! Anthropic Messages adapter (stateless streaming family).
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE; tool input assembled from `input_json_delta`
//!   fragments and validated when its block closes
//!
//! The full transcript is resent on every turn, so the session state is
//! always empty. Orphaned tool results are stripped first because the API
//! rejects mismatched pairs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};
use turnwright_core::{
    AgentEvent, EventEmitter, ImagePart, Message, MessageToolCall, PerformanceHints,
    ProtocolFamily, ProviderAdapter, ProviderError, Role, SessionState, ToolDefinition,
    TurnOutput, TurnRequest, Usage, parse_arguments,
};

use crate::pairing::strip_orphans;
use crate::sse::{Flow, build_client, ensure_success, for_each_event};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic native Messages API adapter.
pub struct AnthropicAdapter {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    hints: PerformanceHints,
}

impl AnthropicAdapter {
    /// Create a new Anthropic adapter.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            id: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            // Long tool-heavy turns stream for a while.
            client: build_client(Duration::from_secs(300))?,
            hints: PerformanceHints::default(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_hints(mut self, hints: PerformanceHints) -> Self {
        self.hints = hints;
        self
    }

    /// Anthropic puts the system prompt in a top-level field, not in messages.
    fn extract_system<'a>(messages: &[&'a Message]) -> (Option<String>, Vec<&'a Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to content-block form.
    ///
    /// Consecutive user-side messages (tool results, image manifests) are
    /// merged into one `user` message, as the API expects every result of an
    /// assistant turn in a single reply.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => {
                    let mut blocks: Vec<ContentBlock> =
                        msg.images.iter().map(ContentBlock::image).collect();
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    push_user_blocks(&mut result, blocks);
                }
                Role::Tool => {
                    let mut content = vec![ContentBlock::Text {
                        text: msg.content.clone(),
                    }];
                    content.extend(msg.images.iter().map(ContentBlock::image));
                    push_user_blocks(
                        &mut result,
                        vec![ContentBlock::ToolResult {
                            tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                            content,
                        }],
                    );
                }
                Role::Assistant => {
                    let mut blocks: Vec<ContentBlock> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    for tc in &msg.tool_calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: parse_arguments(&tc.arguments).value,
                        });
                    }
                    // The API rejects empty assistant turns.
                    if !blocks.is_empty() {
                        result.push(AnthropicMessage {
                            role: "assistant",
                            content: blocks,
                        });
                    }
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn build_body(&self, request: &TurnRequest<'_>, messages: &[&Message]) -> Value {
        let (system, messages) = Self::extract_system(messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.hints.max_output_tokens,
            "stream": true,
        });

        if let Some(sys) = system {
            body["system"] = Value::String(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(request.tools));
        }

        body
    }
}

fn push_user_blocks(result: &mut Vec<AnthropicMessage>, blocks: Vec<ContentBlock>) {
    if blocks.is_empty() {
        return;
    }
    match result.last_mut() {
        Some(last) if last.role == "user" => last.content.extend(blocks),
        _ => result.push(AnthropicMessage {
            role: "user",
            content: blocks,
        }),
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::StatelessStreaming
    }

    fn performance_hints(&self, _model: &str) -> PerformanceHints {
        self.hints.clone()
    }

    async fn run_turn(&self, request: TurnRequest<'_>) -> Result<TurnOutput, ProviderError> {
        let (messages, orphans_dropped) = strip_orphans(request.messages);
        let body = self.build_body(&request, &messages);
        let url = format!("{}/messages", self.base_url);

        debug!(
            provider = %self.id,
            model = %request.model,
            messages = messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = ensure_success(&self.id, response).await?;

        let mut assembler = StreamAssembler::default();
        for_each_event(&self.id, response, |event| {
            assembler.handle(event, request.events)
        })
        .await?;

        let (text, tool_calls, usage) = assembler.finish();
        Ok(TurnOutput {
            text,
            tool_calls,
            session: SessionState::Empty,
            usage: Some(usage),
            orphans_dropped,
        })
    }
}

/// A content block still receiving deltas.
#[derive(Debug)]
enum OpenBlock {
    Text,
    Thinking,
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
}

/// Assembles a streamed Messages response, one SSE payload at a time.
#[derive(Debug, Default)]
pub(crate) struct StreamAssembler {
    text: String,
    open: HashMap<u64, OpenBlock>,
    tool_calls: Vec<MessageToolCall>,
    usage: Usage,
}

impl StreamAssembler {
    pub(crate) fn handle(
        &mut self,
        event: &Value,
        events: &EventEmitter,
    ) -> Result<Flow, ProviderError> {
        let index = event["index"].as_u64().unwrap_or(0);
        let Some(kind) = event["type"].as_str() else {
            return Err(ProviderError::InvalidResponse(format!(
                "stream event without a type: {event}"
            )));
        };

        match kind {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.usage.prompt_tokens = token_count(&usage["input_tokens"]);
                self.usage.completion_tokens = token_count(&usage["output_tokens"]);
            }
            "content_block_start" => {
                let block = &event["content_block"];
                let open = match block["type"].as_str().unwrap_or("") {
                    "tool_use" => {
                        let id = block["id"].as_str().unwrap_or_default().to_string();
                        let name = block["name"].as_str().unwrap_or_default().to_string();
                        events.emit(AgentEvent::ToolPreparing {
                            id: id.clone(),
                            name: name.clone(),
                        });
                        OpenBlock::ToolUse {
                            id,
                            name,
                            json: String::new(),
                        }
                    }
                    "thinking" => OpenBlock::Thinking,
                    _ => OpenBlock::Text,
                };
                self.open.insert(index, open);
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta["text"].as_str() {
                            self.text.push_str(text);
                            events.emit(AgentEvent::ResponseChunk {
                                content: text.to_string(),
                            });
                        }
                    }
                    "thinking_delta" => {
                        if let Some(thinking) = delta["thinking"].as_str() {
                            events.emit(AgentEvent::Thinking {
                                content: thinking.to_string(),
                            });
                        }
                    }
                    "input_json_delta" => {
                        let partial = delta["partial_json"].as_str().unwrap_or_default();
                        match self.open.get_mut(&index) {
                            Some(OpenBlock::ToolUse { json, .. }) => json.push_str(partial),
                            _ => trace!(index, "input_json_delta for a non-tool block"),
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => self.close_block(index),
            "message_delta" => {
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.completion_tokens = out as u32;
                }
            }
            "message_stop" => return Ok(Flow::Stop),
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                return Err(ProviderError::StreamInterrupted(message));
            }
            _ => {}
        }

        Ok(Flow::Continue)
    }

    fn close_block(&mut self, index: u64) {
        if let Some(OpenBlock::ToolUse { id, name, json }) = self.open.remove(&index) {
            self.tool_calls.push(MessageToolCall {
                arguments: validated_input(&name, json),
                id,
                name,
            });
        }
    }

    /// Final text, tool calls in block order, and usage.
    pub(crate) fn finish(mut self) -> (String, Vec<MessageToolCall>, Usage) {
        let mut dangling: Vec<u64> = self.open.keys().copied().collect();
        dangling.sort_unstable();
        for index in dangling {
            self.close_block(index);
        }
        self.usage.total_tokens = self.usage.prompt_tokens + self.usage.completion_tokens;
        (self.text, self.tool_calls, self.usage)
    }
}

/// Tool input must be a JSON object; anything else becomes `{}`.
fn validated_input(tool: &str, json: String) -> String {
    if json.trim().is_empty() {
        return "{}".into();
    }
    match serde_json::from_str::<Value>(&json) {
        Ok(value) if value.is_object() => json,
        _ => {
            warn!(tool, raw = %json, "Invalid tool input JSON at block close, using {{}}");
            "{}".into()
        }
    }
}

fn token_count(value: &Value) -> u32 {
    value.as_u64().unwrap_or(0) as u32
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
    },
}

impl ContentBlock {
    fn image(part: &ImagePart) -> Self {
        Self::Image {
            source: ImageSource {
                kind: "base64",
                media_type: part.mime_type.clone(),
                data: part.data.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}
