// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Valid-user-context validation.
//!
//! A grep hit alone is not evidence: logs can contain terminal captures
//! as tool output that incidentally quote another session's prompts.
//! A candidate only survives when the message occurs where user speech
//! legitimately lives: a `"text"` or `"message"` field value, or a
//! `"content"` value on a line that is not tool output.

use regex::Regex;

const TOOL_RESULT_MARKERS: [&str; 3] = [
    "\"type\":\"tool_result\"",
    "\"type\":\"custom_tool_call_output\"",
    "\"toolUseResult\":",
];

const TEXT_FIELD: &str = "\"text\":";
const MESSAGE_FIELD: &str = "\"message\":";
const CONTENT_FIELD: &str = "\"content\":";

/// Whether any line of `text` contains a match of `re` in a valid user
/// context.
pub fn has_message_in_valid_user_context(text: &str, re: &Regex) -> bool {
    text.lines().any(|line| line_has_valid_match(line, re))
}

fn line_has_valid_match(line: &str, re: &Regex) -> bool {
    let mut start = 0;
    while let Some(m) = re.find_at(line, start) {
        match nearest_field_before(line, m.start()) {
            Some(FieldKind::Text | FieldKind::Message) => return true,
            Some(FieldKind::Content) if !line_is_tool_result(line) => return true,
            _ => {}
        }
        // Advance past this match; overlapping retries are pointless
        start = m.start() + 1;
        if start >= line.len() {
            break;
        }
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Message,
    Content,
}

/// The JSON field whose value the match position sits in, approximated
/// by the nearest field name to its left.
fn nearest_field_before(line: &str, pos: usize) -> Option<FieldKind> {
    let prefix = &line[..pos];
    let candidates = [
        (FieldKind::Text, prefix.rfind(TEXT_FIELD)),
        (FieldKind::Message, prefix.rfind(MESSAGE_FIELD)),
        (FieldKind::Content, prefix.rfind(CONTENT_FIELD)),
    ];
    candidates
        .into_iter()
        .filter_map(|(kind, at)| at.map(|at| (kind, at)))
        .max_by_key(|(_, at)| *at)
        .map(|(kind, _)| kind)
}

fn line_is_tool_result(line: &str) -> bool {
    TOOL_RESULT_MARKERS.iter().any(|m| line.contains(m))
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
