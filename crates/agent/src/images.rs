//! Image results.
//!
//! Tool results shaped like `{type: "image", data, mimeType}` are pulled out
//! before sanitizing and re-attached as one ephemeral user message per
//! iteration. Small batches are inlined; anything over the limits becomes a
//! textual manifest so the transcript never carries oversized bodies.

use serde_json::Value;
use turnwright_config::ImageConfig;
use turnwright_core::{ImagePart, Message, ToolValue};

pub const IMAGE_CONTEXT_HEADER: &str = "[Image context]";

#[derive(Debug, Clone, PartialEq)]
pub struct ImageLimits {
    /// Aggregate encoded size must stay below this to inline.
    pub max_inline_chars: usize,
    pub max_inline_count: usize,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self::from(&ImageConfig::default())
    }
}

impl From<&ImageConfig> for ImageLimits {
    fn from(c: &ImageConfig) -> Self {
        Self {
            max_inline_chars: c.max_inline_chars,
            max_inline_count: c.max_inline_count,
        }
    }
}

/// Pull the image payload out of a raw tool result, if it is one.
pub fn extract_image(value: &ToolValue) -> Option<ImagePart> {
    let ToolValue::Json(Value::Object(obj)) = value else {
        return None;
    };
    if obj.get("type").and_then(Value::as_str) != Some("image") {
        return None;
    }
    let data = obj.get("data").and_then(Value::as_str)?;
    let mime_type = obj
        .get("mimeType")
        .or_else(|| obj.get("mime_type"))
        .and_then(Value::as_str)
        .unwrap_or("image/png");
    let source = obj
        .get("path")
        .or_else(|| obj.get("filePath"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(ImagePart {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
        source,
    })
}

/// Build the ephemeral message carrying this iteration's images.
///
/// Returns `None` for an empty batch.
pub fn image_context_message(
    images: Vec<ImagePart>,
    epoch: u32,
    limits: &ImageLimits,
) -> Option<Message> {
    if images.is_empty() {
        return None;
    }
    let total: usize = images.iter().map(ImagePart::encoded_len).sum();
    let inline = total < limits.max_inline_chars && images.len() <= limits.max_inline_count;

    let mut text = if inline {
        format!(
            "{IMAGE_CONTEXT_HEADER} {} image(s) returned by tools in the previous step:",
            images.len()
        )
    } else {
        format!(
            "{IMAGE_CONTEXT_HEADER} {} image(s) returned by tools were too large to attach \
             ({total} encoded chars). Manifest:",
            images.len()
        )
    };
    for (i, image) in images.iter().enumerate() {
        let label = image.source.as_deref().unwrap_or("(unnamed)");
        text.push_str(&format!(
            "\n{}. {label} ({}, {} chars)",
            i + 1,
            image.mime_type,
            image.encoded_len()
        ));
    }

    let mut msg = Message::user(text).ephemeral(epoch);
    if inline {
        msg.images = images;
    }
    Some(msg)
}

/// Drop image bodies from ephemeral messages older than `current_epoch`.
///
/// Returns the number of images retired.
pub fn retire_stale_images(messages: &mut [Message], current_epoch: u32) -> usize {
    let mut retired = 0;
    for msg in messages
        .iter_mut()
        .filter(|m| m.ephemeral_epoch.is_some_and(|e| e < current_epoch))
    {
        if !msg.images.is_empty() {
            retired += msg.images.len();
            msg.images.clear();
            msg.content.push_str("\n(image data no longer attached)");
        }
    }
    retired
}
