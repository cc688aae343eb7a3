//! Tool-call / tool-result pairing checks.
//!
//! Pairing-validating backends reject a tool result whose call id is not
//! among the calls of the immediately preceding assistant turn. Such orphans
//! are dropped before a request is built.

use std::collections::HashSet;

use tracing::warn;
use turnwright_core::{Message, Role};

/// Return the transmittable messages and the number of orphans dropped.
pub fn strip_orphans(messages: &[Message]) -> (Vec<&Message>, usize) {
    let mut kept = Vec::with_capacity(messages.len());
    let mut open_calls: HashSet<&str> = HashSet::new();
    let mut dropped = 0;

    for msg in messages {
        match msg.role {
            Role::Tool => {
                let paired = msg
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| open_calls.remove(id));
                if paired {
                    kept.push(msg);
                } else {
                    dropped += 1;
                    warn!(
                        tool_call_id = msg.tool_call_id.as_deref().unwrap_or("<none>"),
                        "Dropping orphaned tool result"
                    );
                }
            }
            Role::Assistant => {
                open_calls = msg.tool_calls.iter().map(|c| c.id.as_str()).collect();
                kept.push(msg);
            }
            Role::User | Role::System => {
                // A result after an interleaved turn is no longer paired.
                if msg.ephemeral_epoch.is_none() {
                    open_calls.clear();
                }
                kept.push(msg);
            }
        }
    }

    if dropped > 0 {
        warn!(count = dropped, "Orphaned tool results removed before transmission");
    }
    (kept, dropped)
}
