//! Head/tail text truncation.

use std::borrow::Cow;

/// Inserted where the middle of an oversized text was cut.
pub const TRUNCATION_MARKER: &str = "\n\n[...truncated...]\n\n";

/// Share of the kept characters taken from the head; the rest come from the tail.
const HEAD_SHARE_PERCENT: usize = 60;

/// Cut `text` to at most `max_chars` characters, keeping 60% head and 40% tail.
///
/// Lengths are counted in chars and cuts land on char boundaries. Text that
/// already fits is returned borrowed. When `max_chars` is smaller than the
/// marker itself, only the marker is returned.
pub fn smart_truncate(text: &str, max_chars: usize) -> Cow<'_, str> {
    let total = text.chars().count();
    if total <= max_chars {
        return Cow::Borrowed(text);
    }

    let budget = max_chars.saturating_sub(TRUNCATION_MARKER.chars().count());
    let head = budget * HEAD_SHARE_PERCENT / 100;
    let tail = budget - head;

    let head_end = byte_offset(text, head);
    let tail_start = byte_offset(text, total - tail);

    let mut out =
        String::with_capacity(head_end + TRUNCATION_MARKER.len() + text.len() - tail_start);
    out.push_str(&text[..head_end]);
    out.push_str(TRUNCATION_MARKER);
    out.push_str(&text[tail_start..]);
    Cow::Owned(out)
}

/// Keep only the first `max_chars` characters, then append `marker`.
pub fn truncate_head<'a>(text: &'a str, max_chars: usize, marker: &str) -> Cow<'a, str> {
    if text.chars().count() <= max_chars {
        return Cow::Borrowed(text);
    }
    let end = byte_offset(text, max_chars);
    Cow::Owned(format!("{}{marker}", &text[..end]))
}

fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map_or(text.len(), |(i, _)| i)
}
