//! Initial context construction.
//!
//! A pure function from the caller's inputs to the first messages of a run.
//! Every input is bounded here so a single oversized file, history entry, or
//! selection cannot blow the context window before the first turn.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use turnwright_config::ContextConfig;
use turnwright_core::Message;

use crate::text::{smart_truncate, truncate_head};

static DATA_URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"data:[A-Za-z0-9.+/-]+;base64,[A-Za-z0-9+/=]+").ok());

/// A file the user has open in the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenFile {
    pub path: String,
    pub content: String,
}

/// The document currently focused in the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
}

/// Everything the builder reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextInput<'a> {
    pub system_prompt: &'a str,
    /// Pre-built knowledge-base block, appended verbatim to the system prompt.
    pub knowledge_context: Option<&'a str>,
    pub open_files: &'a [OpenFile],
    pub summary: Option<&'a str>,
    pub history: &'a [Message],
    pub user_message: &'a str,
    pub selection: Option<&'a str>,
    pub document: Option<&'a DocumentContext>,
}

/// Size bounds applied while building.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextLimits {
    pub max_system_chars: usize,
    pub max_open_files: usize,
    pub max_open_file_chars: usize,
    pub max_history_chars: usize,
    pub max_data_url_chars: usize,
    pub max_selection_chars: usize,
    pub max_document_chars: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

impl From<&ContextConfig> for ContextLimits {
    fn from(c: &ContextConfig) -> Self {
        Self {
            max_system_chars: c.max_system_chars,
            max_open_files: c.max_open_files,
            max_open_file_chars: c.max_open_file_chars,
            max_history_chars: c.max_history_chars,
            max_data_url_chars: c.max_data_url_chars,
            max_selection_chars: c.max_selection_chars,
            max_document_chars: c.max_document_chars,
        }
    }
}

/// Build the bounded initial message list.
///
/// Order: system prompt, open files, summary, history, then the user turn
/// with its selection or document block. Performs no I/O.
pub fn build_initial_messages(input: &ContextInput<'_>, limits: &ContextLimits) -> Vec<Message> {
    let mut messages = Vec::with_capacity(input.history.len() + 4);

    let mut system = smart_truncate(input.system_prompt, limits.max_system_chars).into_owned();
    if let Some(knowledge) = input.knowledge_context.filter(|k| !k.trim().is_empty()) {
        system.push_str("\n\n");
        system.push_str(knowledge);
    }
    messages.push(Message::system(system));

    if let Some(block) = open_files_block(input.open_files, limits) {
        messages.push(Message::system(block));
    }

    if let Some(summary) = input.summary.filter(|s| !s.trim().is_empty()) {
        messages.push(Message::system(format!(
            "Summary of the earlier conversation:\n{summary}"
        )));
    }

    for entry in input.history {
        let mut msg = entry.clone();
        let shrunk = truncate_data_urls(&msg.content, limits.max_data_url_chars);
        msg.content = smart_truncate(&shrunk, limits.max_history_chars).into_owned();
        messages.push(msg);
    }

    messages.push(Message::user(user_turn(input, limits)));
    messages
}

fn open_files_block(files: &[OpenFile], limits: &ContextLimits) -> Option<String> {
    if files.is_empty() || limits.max_open_files == 0 {
        return None;
    }

    let mut block = String::from("Files currently open in the workspace:");
    for file in files.iter().take(limits.max_open_files) {
        let content = smart_truncate(&file.content, limits.max_open_file_chars);
        block.push_str(&format!("\n\n--- {} ---\n{}", file.path, content));
    }
    let omitted = files.len().saturating_sub(limits.max_open_files);
    if omitted > 0 {
        block.push_str(&format!("\n\n({omitted} more open files not shown)"));
    }
    Some(block)
}

fn user_turn(input: &ContextInput<'_>, limits: &ContextLimits) -> String {
    if let Some(selection) = input.selection.filter(|s| !s.is_empty()) {
        let selection = smart_truncate(selection, limits.max_selection_chars);
        return format!("Selected:\n```\n{selection}\n```\n\n{}", input.user_message);
    }

    if let Some(doc) = input.document {
        let label = doc
            .name
            .as_deref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default();
        let size = doc.content.chars().count();
        if size < limits.max_document_chars {
            return format!(
                "Current document{label}:\n```\n{}\n```\n\n{}",
                doc.content, input.user_message
            );
        }
        return format!(
            "[Current document{label}: {size} characters, too large to include]\n\n{}",
            input.user_message
        );
    }

    input.user_message.to_string()
}

/// Shorten every embedded `data:` URL longer than `max_chars`.
pub fn truncate_data_urls(text: &str, max_chars: usize) -> String {
    let Some(re) = DATA_URL.as_ref() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let url = &caps[0];
        let marker = format!("...[data URL truncated, {} chars]", url.len());
        truncate_head(url, max_chars, &marker).into_owned()
    })
    .into_owned()
}
