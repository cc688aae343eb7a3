//! Tool result sanitizing.
//!
//! Tool output is untrusted and unbounded. Everything a tool returns passes
//! through [`Sanitizer::sanitize`] before it is appended to the transcript,
//! producing plain JSON with bounded arrays, bounded strings, no encoded
//! image bodies, and no cycles.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Number, Value, json};
use turnwright_config::SanitizerConfig;
use turnwright_core::ToolValue;

use crate::text::smart_truncate;

/// Stands in for a value already being serialized further up the tree.
pub const CIRCULAR_SENTINEL: &str = "[Circular]";

/// Stands in for a subtree nested deeper than `max_depth`.
pub const MAX_DEPTH_SENTINEL: &str = "[Max depth exceeded]";

const STACK_PREFIX_CHARS: usize = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SanitizerLimits {
    pub max_array_items: usize,
    pub max_string_chars: usize,
    pub max_depth: usize,
}

impl Default for SanitizerLimits {
    fn default() -> Self {
        Self::from(&SanitizerConfig::default())
    }
}

impl From<&SanitizerConfig> for SanitizerLimits {
    fn from(c: &SanitizerConfig) -> Self {
        Self {
            max_array_items: c.max_array_items,
            max_string_chars: c.max_string_chars,
            max_depth: c.max_depth,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    limits: SanitizerLimits,
}

type Visiting = HashSet<usize>;

impl Sanitizer {
    pub fn new(limits: SanitizerLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SanitizerLimits {
        &self.limits
    }

    /// Deep-clean a tool result into JSON.
    ///
    /// Never fails. Values that cannot be represented (callables, symbols)
    /// are dropped from objects and become `null` inside arrays; a top-level
    /// one becomes `null`.
    pub fn sanitize(&self, value: &ToolValue) -> Value {
        let mut visiting = Visiting::new();
        match self.walk(value, &mut visiting, 0) {
            Some(Value::String(s)) => Value::String(self.clip(s).0),
            Some(v) => v,
            None => Value::Null,
        }
    }

    fn walk(&self, value: &ToolValue, visiting: &mut Visiting, depth: usize) -> Option<Value> {
        if depth > self.limits.max_depth {
            return Some(Value::String(MAX_DEPTH_SENTINEL.into()));
        }
        let v = match value {
            ToolValue::Json(v) => self.walk_json(v, depth),
            ToolValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            ToolValue::Array(items) => {
                let kept = items
                    .iter()
                    .take(self.limits.max_array_items)
                    .map(|item| {
                        self.walk(item, visiting, depth + 1)
                            .map_or(Value::Null, |v| self.clip_value(v))
                    })
                    .collect();
                self.finish_array(kept, items.len())
            }
            ToolValue::Object(fields) => {
                if let Some(image) = image_placeholder_fields(fields) {
                    return Some(image);
                }
                let mut map = Map::new();
                for (key, field) in fields {
                    if let Some(v) = self.walk(field, visiting, depth + 1) {
                        self.insert_field(&mut map, key.clone(), v);
                    }
                }
                Value::Object(map)
            }
            ToolValue::Error {
                name,
                message,
                stack,
            } => error_value(name, message, stack.as_deref()),
            ToolValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
            ToolValue::Pattern(p) => Value::String(p.clone()),
            ToolValue::Opaque(_) => return None,
            ToolValue::Shared(node) => return self.walk_shared(node, visiting, depth),
        };
        Some(v)
    }

    fn walk_shared(
        &self,
        node: &Arc<RwLock<ToolValue>>,
        visiting: &mut Visiting,
        depth: usize,
    ) -> Option<Value> {
        let identity = Arc::as_ptr(node) as *const () as usize;
        if !visiting.insert(identity) {
            return Some(Value::String(CIRCULAR_SENTINEL.into()));
        }
        let out = {
            let guard = node.read().unwrap_or_else(PoisonError::into_inner);
            self.walk(&guard, visiting, depth)
        };
        visiting.remove(&identity);
        out
    }

    fn walk_json(&self, value: &Value, depth: usize) -> Value {
        if depth > self.limits.max_depth {
            return Value::String(MAX_DEPTH_SENTINEL.into());
        }
        match value {
            Value::Array(items) => {
                let kept = items
                    .iter()
                    .take(self.limits.max_array_items)
                    .map(|item| self.clip_value(self.walk_json(item, depth + 1)))
                    .collect();
                self.finish_array(kept, items.len())
            }
            Value::Object(obj) => {
                if let Some(image) = image_placeholder(obj) {
                    return image;
                }
                let mut map = Map::new();
                for (key, field) in obj {
                    let v = self.walk_json(field, depth + 1);
                    self.insert_field(&mut map, key.clone(), v);
                }
                Value::Object(map)
            }
            other => other.clone(),
        }
    }

    fn finish_array(&self, kept: Vec<Value>, original_len: usize) -> Value {
        if original_len > self.limits.max_array_items {
            json!({
                "_truncatedArray": true,
                "items": kept,
                "originalLength": original_len,
            })
        } else {
            Value::Array(kept)
        }
    }

    fn insert_field(&self, map: &mut Map<String, Value>, key: String, value: Value) {
        match value {
            Value::String(s) => {
                let (s, cut) = self.clip(s);
                if cut {
                    map.insert(format!("{key}_truncated"), Value::Bool(true));
                }
                map.insert(key, Value::String(s));
            }
            other => {
                map.insert(key, other);
            }
        }
    }

    fn clip_value(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.clip(s).0),
            other => other,
        }
    }

    fn clip(&self, s: String) -> (String, bool) {
        match smart_truncate(&s, self.limits.max_string_chars) {
            std::borrow::Cow::Borrowed(_) => (s, false),
            std::borrow::Cow::Owned(cut) => (cut, true),
        }
    }
}

fn error_value(name: &str, message: &str, stack: Option<&str>) -> Value {
    let mut map = Map::new();
    map.insert("message".into(), Value::String(message.to_string()));
    map.insert("name".into(), Value::String(name.to_string()));
    if let Some(stack) = stack {
        let prefix: String = stack.chars().take(STACK_PREFIX_CHARS).collect();
        map.insert("stackPrefix".into(), Value::String(prefix));
    }
    Value::Object(map)
}

/// `{type: "image", data, mimeType}` with the body replaced by its length.
fn image_placeholder(obj: &Map<String, Value>) -> Option<Value> {
    if obj.get("type").and_then(Value::as_str) != Some("image") {
        return None;
    }
    let data = obj.get("data").and_then(Value::as_str)?;
    let mime = obj
        .get("mimeType")
        .or_else(|| obj.get("mime_type"))
        .and_then(Value::as_str);
    let path = obj
        .get("path")
        .or_else(|| obj.get("filePath"))
        .and_then(Value::as_str);
    Some(image_shape(mime, data.len(), path))
}

fn image_placeholder_fields(fields: &[(String, ToolValue)]) -> Option<Value> {
    let str_field = |name: &str| {
        fields.iter().find_map(|(k, v)| match v {
            ToolValue::Json(Value::String(s)) if k == name => Some(s.as_str()),
            _ => None,
        })
    };
    if str_field("type") != Some("image") {
        return None;
    }
    let data = str_field("data")?;
    let mime = str_field("mimeType").or_else(|| str_field("mime_type"));
    let path = str_field("path").or_else(|| str_field("filePath"));
    Some(image_shape(mime, data.len(), path))
}

fn image_shape(mime: Option<&str>, data_len: usize, path: Option<&str>) -> Value {
    let mut map = Map::new();
    map.insert("type".into(), Value::String("image".into()));
    if let Some(mime) = mime {
        map.insert("mimeType".into(), Value::String(mime.into()));
    }
    map.insert("dataOmitted".into(), Value::Bool(true));
    map.insert("dataLengthChars".into(), Value::from(data_len));
    if let Some(path) = path {
        map.insert("path".into(), Value::String(path.into()));
    }
    Value::Object(map)
}

/// Render a sanitized result as tool message content.
pub fn render_tool_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|e| {
            json!({ "error": format!("Tool result could not be serialized: {e}") }).to_string()
        }),
    }
}
