//! OpenAI Responses adapter (continuation family).
//!
//! The first turn of a run ships the whole transcript as input items. Every
//! later turn sends `previous_response_id` plus only the items the backend
//! does not hold yet, so a long tool loop does not resend its history.
//!
//! Two variants:
//! - [`ResponsesVariant::Native`]: system prompt via the `instructions` side
//!   channel; the backend already holds its own `function_call` items, so
//!   only outputs and new user items form the delta.
//! - [`ResponsesVariant::Compat`]: gateways without `instructions` get a
//!   synthetic leading system item, and the delta carries `function_call`
//!   items alongside their outputs.
//!
//! Items the backend holds stay behind `previous_response_id` even after the
//! engine trims or retires them locally. The engine therefore hands this
//! adapter [`SessionState::Empty`] after any such change, which starts a
//! fresh chain from the local transcript.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};
use turnwright_core::{
    AgentEvent, EventEmitter, Message, MessageToolCall, PerformanceHints, ProtocolFamily,
    ProviderAdapter, ProviderError, Role, SessionState, ToolDefinition, TurnOutput, TurnRequest,
    Usage, parse_arguments,
};

use crate::sse::{Flow, build_client, ensure_success, for_each_event};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsesVariant {
    Native,
    Compat,
}

pub struct ResponsesAdapter {
    id: String,
    variant: ResponsesVariant,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    hints: PerformanceHints,
}

impl ResponsesAdapter {
    pub fn new(variant: ResponsesVariant, api_key: Option<String>) -> Result<Self, ProviderError> {
        let id = match variant {
            ResponsesVariant::Native => "openai",
            ResponsesVariant::Compat => "responses-compat",
        };
        Ok(Self {
            id: id.into(),
            variant,
            base_url: DEFAULT_BASE_URL.into(),
            api_key,
            client: build_client(Duration::from_secs(300))?,
            hints: PerformanceHints::default(),
        })
    }

    /// Native OpenAI Responses (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(ResponsesVariant::Native, Some(api_key.into()))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_hints(mut self, hints: PerformanceHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn variant(&self) -> ResponsesVariant {
        self.variant
    }

    /// Build the request body and the set of message ids the backend will
    /// hold once it accepts this request.
    fn build_request(&self, request: &TurnRequest<'_>) -> (Value, HashSet<String>) {
        let previous = request.session.previous_turn_id();
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let system = system.join("\n\n");

        let mut input: Vec<Value> = Vec::new();
        if self.variant == ResponsesVariant::Compat && !system.is_empty() {
            input.push(json!({"role": "system", "content": system}));
        }

        for msg in request.messages {
            if msg.role == Role::System || request.session.is_acknowledged(&msg.id) {
                continue;
            }
            // On a continued turn the native backend already holds its own output.
            if previous.is_some()
                && self.variant == ResponsesVariant::Native
                && msg.role == Role::Assistant
            {
                continue;
            }
            input.extend(message_items(msg));
        }

        let mut body = json!({
            "model": request.model,
            "input": input,
            "max_output_tokens": request.hints.max_output_tokens,
            "stream": true,
        });

        if self.variant == ResponsesVariant::Native {
            body["store"] = Value::Bool(true);
            if !system.is_empty() {
                body["instructions"] = Value::String(system);
            }
        }
        if let Some(previous) = previous {
            body["previous_response_id"] = Value::String(previous.to_string());
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(api_tool).collect());
        }

        let acknowledged = request.messages.iter().map(|m| m.id.clone()).collect();
        (body, acknowledged)
    }
}

/// Translate one transcript message into input items.
fn message_items(msg: &Message) -> Vec<Value> {
    let mut items = Vec::new();
    match msg.role {
        Role::User => items.push(user_item(&msg.content, msg)),
        Role::Assistant => {
            if !msg.content.is_empty() {
                items.push(json!({"role": "assistant", "content": msg.content}));
            }
            for tc in &msg.tool_calls {
                items.push(json!({
                    "type": "function_call",
                    "call_id": tc.id,
                    "name": tc.name,
                    "arguments": tc.arguments,
                }));
            }
        }
        Role::Tool => {
            items.push(json!({
                "type": "function_call_output",
                "call_id": msg.tool_call_id.clone().unwrap_or_default(),
                "output": msg.content,
            }));
            // Outputs are text-only; images ride along in a user item.
            if !msg.images.is_empty() {
                items.push(user_item("", msg));
            }
        }
        Role::System => {}
    }
    items
}

fn user_item(text: &str, msg: &Message) -> Value {
    let mut content: Vec<Value> = Vec::new();
    if !text.is_empty() {
        content.push(json!({"type": "input_text", "text": text}));
    }
    for image in &msg.images {
        content.push(json!({"type": "input_image", "image_url": image.data_url()}));
    }
    json!({"role": "user", "content": content})
}

fn api_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.parameters,
    })
}

#[async_trait]
impl ProviderAdapter for ResponsesAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Continuation
    }

    fn performance_hints(&self, _model: &str) -> PerformanceHints {
        self.hints.clone()
    }

    async fn run_turn(&self, request: TurnRequest<'_>) -> Result<TurnOutput, ProviderError> {
        let (body, acknowledged) = self.build_request(&request);
        let url = format!("{}/responses", self.base_url);

        debug!(
            provider = %self.id,
            model = %request.model,
            items = body["input"].as_array().map_or(0, Vec::len),
            continued = request.session.previous_turn_id().is_some(),
            "Sending streaming request"
        );

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let response = req
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = ensure_success(&self.id, response).await?;

        let mut stream = ResponseStream::default();
        for_each_event(&self.id, response, |event| stream.handle(event, request.events)).await?;

        let (text, tool_calls, usage, response_id) = stream.finish();
        let session = match response_id {
            Some(previous_turn_id) => SessionState::Continuation {
                previous_turn_id,
                acknowledged,
            },
            None => {
                warn!(
                    provider = %self.id,
                    "Response carried no id, next turn resends the transcript"
                );
                SessionState::Empty
            }
        };

        Ok(TurnOutput {
            text,
            tool_calls,
            session,
            usage,
            orphans_dropped: 0,
        })
    }
}

/// A function call being assembled from stream items.
#[derive(Debug, Clone)]
struct PendingCall {
    item_id: Option<String>,
    call_id: String,
    name: String,
    arguments: String,
}

/// Decodes a streamed Responses turn, one SSE payload at a time.
#[derive(Debug, Default)]
pub(crate) struct ResponseStream {
    response_id: Option<String>,
    text: String,
    /// Text recovered from completed message items, used when no deltas arrived.
    item_text: String,
    calls: Vec<PendingCall>,
    by_item: HashMap<String, usize>,
    usage: Option<Usage>,
}

impl ResponseStream {
    pub(crate) fn handle(
        &mut self,
        event: &Value,
        events: &EventEmitter,
    ) -> Result<Flow, ProviderError> {
        let Some(kind) = event["type"].as_str() else {
            return Err(ProviderError::InvalidResponse(format!(
                "stream event without a type: {event}"
            )));
        };

        match kind {
            "response.created" | "response.in_progress" => {
                if let Some(id) = event["response"]["id"].as_str() {
                    self.response_id = Some(id.to_string());
                }
            }
            "response.output_text.delta" => {
                if let Some(delta) = event["delta"].as_str() {
                    self.text.push_str(delta);
                    events.emit(AgentEvent::ResponseChunk {
                        content: delta.to_string(),
                    });
                }
            }
            "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
                if let Some(delta) = event["delta"].as_str() {
                    events.emit(AgentEvent::Thinking {
                        content: delta.to_string(),
                    });
                }
            }
            "response.output_item.added" => {
                let item = &event["item"];
                if item["type"] == "function_call" {
                    events.emit(AgentEvent::ToolPreparing {
                        id: item["call_id"].as_str().unwrap_or_default().to_string(),
                        name: item["name"].as_str().unwrap_or_default().to_string(),
                    });
                    self.upsert_call(item);
                }
            }
            "response.function_call_arguments.delta" => {
                let item_id = event["item_id"].as_str().unwrap_or_default();
                if let Some(&idx) = self.by_item.get(item_id) {
                    self.calls[idx]
                        .arguments
                        .push_str(event["delta"].as_str().unwrap_or_default());
                }
            }
            "response.output_item.done" => self.absorb_item(&event["item"]),
            "response.completed" | "response.incomplete" => {
                let response = &event["response"];
                if event["type"] == "response.incomplete" {
                    warn!(
                        reason = response["incomplete_details"]["reason"]
                            .as_str()
                            .unwrap_or("unknown"),
                        "Response ended incomplete"
                    );
                }
                if let Some(id) = response["id"].as_str() {
                    self.response_id = Some(id.to_string());
                }
                if let Some(output) = response["output"].as_array() {
                    for item in output {
                        self.absorb_item(item);
                    }
                }
                self.usage = parse_usage(&response["usage"]);
                return Ok(Flow::Stop);
            }
            "response.failed" => {
                let message = event["response"]["error"]["message"]
                    .as_str()
                    .unwrap_or("response failed")
                    .to_string();
                return Err(ProviderError::StreamInterrupted(message));
            }
            "error" => {
                let message = event["message"]
                    .as_str()
                    .or_else(|| event["error"]["message"].as_str())
                    .unwrap_or("unknown stream error")
                    .to_string();
                return Err(ProviderError::StreamInterrupted(message));
            }
            _ => {}
        }
        Ok(Flow::Continue)
    }

    /// A completed item is authoritative: it replaces whatever was streamed
    /// for the same call id.
    fn absorb_item(&mut self, item: &Value) {
        match item["type"].as_str().unwrap_or("") {
            "function_call" => self.upsert_call(item),
            "message" => {
                if !self.item_text.is_empty() {
                    return;
                }
                if let Some(parts) = item["content"].as_array() {
                    for part in parts {
                        if part["type"] == "output_text" {
                            self.item_text
                                .push_str(part["text"].as_str().unwrap_or_default());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn upsert_call(&mut self, item: &Value) {
        let call_id = item["call_id"].as_str().unwrap_or_default().to_string();
        let item_id = item["id"].as_str().map(str::to_string);
        let name = item["name"].as_str().unwrap_or_default().to_string();
        let arguments = item["arguments"].as_str().unwrap_or_default().to_string();

        let existing = self
            .calls
            .iter()
            .position(|c| !call_id.is_empty() && c.call_id == call_id)
            .or_else(|| item_id.as_ref().and_then(|id| self.by_item.get(id).copied()));

        match existing {
            Some(idx) => {
                let call = &mut self.calls[idx];
                if !name.is_empty() {
                    call.name = name;
                }
                if !arguments.is_empty() {
                    call.arguments = arguments;
                }
                if !call_id.is_empty() {
                    call.call_id = call_id;
                }
                if let Some(id) = item_id {
                    self.by_item.insert(id.clone(), idx);
                    call.item_id = Some(id);
                }
            }
            None => {
                if let Some(id) = &item_id {
                    self.by_item.insert(id.clone(), self.calls.len());
                }
                self.calls.push(PendingCall {
                    item_id,
                    call_id,
                    name,
                    arguments,
                });
            }
        }
    }

    pub(crate) fn finish(self) -> (String, Vec<MessageToolCall>, Option<Usage>, Option<String>) {
        let text = if self.text.is_empty() {
            self.item_text
        } else {
            self.text
        };

        let tool_calls = self
            .calls
            .into_iter()
            .map(|c| {
                let parsed = parse_arguments(&c.arguments);
                let arguments = if parsed.repaired {
                    warn!(tool = %c.name, call_id = %c.call_id, "Repaired streamed tool arguments");
                    parsed.value.to_string()
                } else if c.arguments.trim().is_empty() {
                    "{}".into()
                } else {
                    c.arguments
                };
                let id = if c.call_id.is_empty() {
                    c.item_id.unwrap_or_default()
                } else {
                    c.call_id
                };
                MessageToolCall {
                    id,
                    name: c.name,
                    arguments,
                }
            })
            .collect();

        (text, tool_calls, self.usage, self.response_id)
    }
}

fn parse_usage(usage: &Value) -> Option<Usage> {
    let input = usage["input_tokens"].as_u64()?;
    let output = usage["output_tokens"].as_u64().unwrap_or(0);
    let total = usage["total_tokens"].as_u64().unwrap_or(input + output);
    Some(Usage {
        prompt_tokens: input as u32,
        completion_tokens: output as u32,
        total_tokens: total as u32,
    })
}
