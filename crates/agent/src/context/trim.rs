//! Token-budget trimming for a run's message list.
//!
//! Two phases, each stopping as soon as the estimate fits:
//!
//! 1. Older tool results are cut down, oldest first. The two most recent
//!    tool results are never touched.
//! 2. The oldest units after the leading system block are dropped, including
//!    tool rounds of the current user turn. A unit is an assistant turn
//!    together with its tool results, or a single message, so call/result
//!    pairing survives.
//!
//! Never dropped: system messages, the last real user message, and the
//! assistant turns owning the two most recent tool results (with everything
//! after them).

use tracing::debug;
use turnwright_config::ContextConfig;
use turnwright_core::{Message, Role};

use super::token::{estimate_message_tokens, estimate_messages_tokens};
use crate::text::smart_truncate;

/// Tool results at the tail that trimming never shortens or drops.
pub const PROTECTED_TOOL_RESULTS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct TrimLimits {
    /// Ceiling for the estimated prompt size.
    pub max_tokens: usize,
    /// Size older tool results are cut down to in phase 1.
    pub trimmed_tool_result_chars: usize,
}

impl Default for TrimLimits {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

impl From<&ContextConfig> for TrimLimits {
    fn from(c: &ContextConfig) -> Self {
        Self {
            max_tokens: c.max_context_tokens,
            trimmed_tool_result_chars: c.trimmed_tool_result_chars,
        }
    }
}

/// What a trimming pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub truncated_results: usize,
    pub dropped_messages: usize,
}

impl TrimReport {
    pub fn changed(&self) -> bool {
        self.truncated_results > 0 || self.dropped_messages > 0
    }
}

/// Shrink `messages` until its estimate is at or below `limits.max_tokens`,
/// or nothing more can be removed.
pub fn trim_to_budget(messages: &mut Vec<Message>, limits: &TrimLimits) -> TrimReport {
    let mut total = estimate_messages_tokens(messages);
    let mut report = TrimReport {
        tokens_before: total,
        tokens_after: total,
        ..Default::default()
    };
    if total <= limits.max_tokens {
        return report;
    }

    // Phase 1: older tool results.
    let tool_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::Tool)
        .map(|(i, _)| i)
        .collect();
    let older = tool_indices.len().saturating_sub(PROTECTED_TOOL_RESULTS);

    for &idx in &tool_indices[..older] {
        if total <= limits.max_tokens {
            break;
        }
        let msg = &mut messages[idx];
        let shortened = match smart_truncate(&msg.content, limits.trimmed_tool_result_chars) {
            std::borrow::Cow::Borrowed(_) => continue,
            std::borrow::Cow::Owned(s) => s,
        };
        let before = estimate_message_tokens(msg);
        msg.content = shortened;
        total = total - before + estimate_message_tokens(msg);
        report.truncated_results += 1;
    }

    // Phase 2: oldest unprotected units.
    if total > limits.max_tokens {
        let mut tail_start = protected_tail_start(messages, &tool_indices);
        let mut last_user = last_user_index(messages);
        let mut idx = 0;

        while total > limits.max_tokens && idx < tail_start {
            if messages[idx].role == Role::System || Some(idx) == last_user {
                idx += 1;
                continue;
            }
            let len = unit_len(messages, idx);
            if idx + len > tail_start {
                break;
            }
            let removed: usize = messages
                .drain(idx..idx + len)
                .map(|m| estimate_message_tokens(&m))
                .sum();
            total -= removed;
            tail_start -= len;
            last_user = last_user.map(|u| if u > idx { u - len } else { u });
            report.dropped_messages += len;
        }
    }

    report.tokens_after = total;
    if report.changed() {
        debug!(
            before = report.tokens_before,
            after = report.tokens_after,
            truncated = report.truncated_results,
            dropped = report.dropped_messages,
            "Trimmed context to budget"
        );
    }
    report
}

fn last_user_index(messages: &[Message]) -> Option<usize> {
    messages
        .iter()
        .rposition(|m| m.role == Role::User && m.ephemeral_epoch.is_none())
}

/// Start of the tail phase 2 may not touch: the earliest assistant turn
/// owning one of the most recent tool results.
fn protected_tail_start(messages: &[Message], tool_indices: &[usize]) -> usize {
    tool_indices
        .iter()
        .rev()
        .take(PROTECTED_TOOL_RESULTS)
        .filter_map(|&idx| messages[..idx].iter().rposition(Message::has_tool_calls))
        .min()
        .unwrap_or(messages.len())
}

fn unit_len(messages: &[Message], start: usize) -> usize {
    if !messages[start].has_tool_calls() {
        return 1;
    }
    1 + messages[start + 1..]
        .iter()
        .take_while(|m| m.role == Role::Tool)
        .count()
}
