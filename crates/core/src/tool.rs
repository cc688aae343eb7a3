//! Tool contract: what the engine hands to the host's tool runtime.
//!
//! The engine never executes a tool itself. It normalizes the model's calls
//! into [`ToolCall`]s, hands them to a [`ToolExecutor`], and treats whatever
//! comes back as an untrusted [`ToolValue`] that must be sanitized before it
//! re-enters the conversation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::ToolError;
use crate::event::{AgentEvent, EventEmitter};
use crate::message::MessageToolCall;

/// Coarse policy category of a tool, used by disable-by-category filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    File,
    Search,
    Terminal,
    Document,
    Knowledge,
    Image,
    Other,
}

/// Arguments recovered from a raw argument string.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArguments {
    /// Always a JSON object.
    pub value: Value,
    /// Set when the raw text was not a valid JSON object as received.
    pub repaired: bool,
}

/// Parse a tool-argument string, repairing truncated JSON where possible.
///
/// Never fails: anything that cannot be recovered as an object becomes `{}`.
pub fn parse_arguments(raw: &str) -> ParsedArguments {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ParsedArguments {
            value: Value::Object(Default::default()),
            repaired: false,
        };
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return ParsedArguments {
                value,
                repaired: false,
            };
        }
        return ParsedArguments {
            value: Value::Object(Default::default()),
            repaired: true,
        };
    }

    let value = close_truncated_json(trimmed)
        .and_then(|fixed| serde_json::from_str::<Value>(&fixed).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Default::default()));

    ParsedArguments {
        value,
        repaired: true,
    }
}

/// Close open strings, arrays, and objects at the end of a cut-off fragment.
fn close_truncated_json(fragment: &str) -> Option<String> {
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in fragment.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                if closers.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }

    if closers.is_empty() && !in_string {
        return None;
    }

    let mut fixed = fragment.to_string();
    if in_string {
        if escaped {
            fixed.pop();
        }
        fixed.push('"');
    }
    let tail = fixed.trim_end();
    if tail.ends_with(',') {
        fixed = tail[..tail.len() - 1].to_string();
    } else if tail.ends_with(':') {
        fixed = format!("{tail} null");
    }
    fixed.extend(closers.iter().rev());
    Some(fixed)
}

/// A normalized request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool call id)
    pub id: String,

    /// Name of the tool to execute; `"unknown"` for malformed calls
    pub name: String,

    /// Arguments exactly as the model produced them
    pub raw_arguments: String,

    /// Parsed arguments, always a JSON object
    pub arguments: Value,
}

impl ToolCall {
    pub const UNKNOWN: &'static str = "unknown";

    /// Normalize a model-issued call. Malformed calls degrade, never fail.
    pub fn normalize(call: &MessageToolCall) -> Self {
        let name = call.name.trim();
        if name.is_empty() {
            warn!(call_id = %call.id, "Tool call without a name, treating as unknown");
            return Self {
                id: call.id.clone(),
                name: Self::UNKNOWN.into(),
                raw_arguments: call.arguments.clone(),
                arguments: Value::Object(Default::default()),
            };
        }

        let parsed = parse_arguments(&call.arguments);
        if parsed.repaired {
            warn!(tool = %name, call_id = %call.id, "Repaired malformed tool arguments");
        }

        Self {
            id: call.id.clone(),
            name: name.to_string(),
            raw_arguments: call.arguments.clone(),
            arguments: parsed.value,
        }
    }
}

/// An untrusted value produced by a tool.
///
/// Plain JSON covers most tools. The other variants exist for executors that
/// bridge dynamic runtimes, where results can hold error objects, dates,
/// patterns, callables, or shared (possibly cyclic) nodes.
#[derive(Debug, Clone)]
pub enum ToolValue {
    Json(Value),
    Float(f64),
    Array(Vec<ToolValue>),
    Object(Vec<(String, ToolValue)>),
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },
    Timestamp(DateTime<Utc>),
    Pattern(String),
    /// A callable or symbol; carries only a label and is dropped on sanitize.
    Opaque(String),
    /// A node that may be referenced from several places, including itself.
    Shared(Arc<RwLock<ToolValue>>),
}

impl ToolValue {
    /// The canonical `{error: message}` result.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Json(serde_json::json!({ "error": message.into() }))
    }

    pub fn shared(value: ToolValue) -> Arc<RwLock<ToolValue>> {
        Arc::new(RwLock::new(value))
    }
}

impl From<Value> for ToolValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<ToolError> for ToolValue {
    fn from(err: ToolError) -> Self {
        Self::error(err.to_string())
    }
}

/// An edit proposed by a tool; accumulated by the engine, never applied by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEdit {
    pub file_path: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    /// The tool call that proposed this edit.
    #[serde(default)]
    pub tool_call_id: String,
}

impl PendingEdit {
    /// Recognize `{action: "queue_edit", filePath, instructions, patch}`.
    pub fn from_result(tool_call_id: &str, value: &Value) -> Option<Self> {
        if value.get("action").and_then(Value::as_str) != Some("queue_edit") {
            return None;
        }
        let file_path = value.get("filePath").and_then(Value::as_str)?;
        let patch = match value.get("patch") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        Some(Self {
            file_path: file_path.to_string(),
            instructions: value
                .get("instructions")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            patch,
            tool_call_id: tool_call_id.to_string(),
        })
    }

    /// Recognize an edit in a raw tool value, before any sanitizing.
    ///
    /// Only plain JSON and flat objects of JSON fields can carry an edit.
    pub fn from_tool_value(tool_call_id: &str, value: &ToolValue) -> Option<Self> {
        match value {
            ToolValue::Json(json) => Self::from_result(tool_call_id, json),
            ToolValue::Object(fields) => {
                let plain: serde_json::Map<String, Value> = fields
                    .iter()
                    .filter_map(|(key, field)| match field {
                        ToolValue::Json(json) => Some((key.clone(), json.clone())),
                        _ => None,
                    })
                    .collect();
                Self::from_result(tool_call_id, &Value::Object(plain))
            }
            _ => None,
        }
    }
}

/// Per-call context handed to the executor.
#[derive(Clone)]
pub struct ToolContext {
    pub call_id: String,
    pub tool_name: String,
    events: EventEmitter,
}

impl ToolContext {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        events: EventEmitter,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            events,
        }
    }

    /// Emit a `tool_progress` event for this call.
    pub fn report_progress(&self, message: impl Into<String>) {
        self.events.emit(AgentEvent::ToolProgress {
            id: self.call_id.clone(),
            name: self.tool_name.clone(),
            message: message.into(),
        });
    }
}

/// The host's tool runtime.
///
/// Implementations enforce their own security boundary. Returning `Err` (or
/// panicking) only affects the call at hand: the engine turns it into an
/// `{error}` result and keeps going.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        arguments: Value,
        ctx: &ToolContext,
    ) -> Result<ToolValue, ToolError>;
}
