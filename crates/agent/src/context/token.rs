//! Token estimation utilities.
//!
//! Uses a character-based heuristic of [`CHARS_PER_TOKEN`] characters per
//! token. Within ~10% for BPE tokenizers on English text and code; the
//! engine only needs bounded estimates, never exact counts.

use turnwright_core::{Message, ToolDefinition};

/// Bytes of text per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Flat per-image estimate; encoded image bodies are not billed by length.
pub const IMAGE_TOKENS: usize = 1_600;

/// Role name, delimiters, and formatting markers per message.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments))
        .sum();
    MESSAGE_OVERHEAD_TOKENS
        + estimate_tokens(&message.content)
        + calls
        + message.images.len() * IMAGE_TOKENS
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a slice of tool definitions (serialized as JSON).
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnwright_core::{ImagePart, MessageToolCall};

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn rounding_up() {
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("hello"), 2);
        assert_eq!(estimate_tokens(&"a".repeat(100)), 25);
    }

    #[test]
    fn estimate_is_bounded_by_length() {
        let text = "fn main() { println!(\"hi\"); }".repeat(40);
        let tokens = estimate_tokens(&text);
        assert!(tokens * CHARS_PER_TOKEN >= text.len());
        assert!(tokens * CHARS_PER_TOKEN < text.len() + CHARS_PER_TOKEN);
    }

    #[test]
    fn message_includes_overhead() {
        assert_eq!(estimate_message_tokens(&Message::user("test")), 5);
    }

    #[test]
    fn tool_calls_and_images_count() {
        let mut msg = Message::assistant_with_tools(
            "",
            vec![MessageToolCall {
                id: "c".into(),
                name: "grep".into(),
                arguments: r#"{"q":"x"}"#.into(),
            }],
        );
        assert_eq!(estimate_message_tokens(&msg), 4 + 1 + 3);
        msg.images.push(ImagePart {
            mime_type: "image/png".into(),
            data: "A".repeat(100_000),
            source: None,
        });
        assert_eq!(estimate_message_tokens(&msg), 8 + IMAGE_TOKENS);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![Message::user("hello"), Message::assistant("world")];
        assert_eq!(estimate_messages_tokens(&msgs), 12);
    }

    #[test]
    fn empty_tools_is_zero() {
        assert_eq!(estimate_tools_tokens(&[]), 0);
    }
}
