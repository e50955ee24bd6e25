// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metadata extraction from JSONL log heads and tails.
//!
//! Session identity and project path live in the first few records of a
//! log; the most recent user message lives near the end. Lines that fail
//! to parse are skipped; agents occasionally write partial lines while
//! the poller is reading.

use serde_json::Value;

/// Markers that identify a line as tool output rather than user speech.
const TOOL_RESULT_MARKERS: [&str; 3] = [
    "\"type\":\"tool_result\"",
    "\"type\":\"custom_tool_call_output\"",
    "\"toolUseResult\":",
];

/// Metadata parsed from the head of a JSONL log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadMeta {
    pub session_id: Option<String>,
    pub project_path: Option<String>,
    pub is_codex_subagent: bool,
    pub is_codex_exec: bool,
    /// Whitespace-token count over user-visible text in the head window.
    pub token_count: usize,
}

impl HeadMeta {
    /// Parse head text (one JSON value per line).
    ///
    /// Session id sources, in order: top-level `sessionId`/`session_id`,
    /// `payload.id`/`payload.sessionId`, or a Pi-style first line
    /// `{type:"session", id:...}`. Project path: top-level `cwd`, or
    /// `payload.cwd`/`payload.working_directory`.
    pub fn parse(head: &str) -> Self {
        let mut meta = HeadMeta::default();

        for line in head.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(json) = serde_json::from_str::<Value>(trimmed) else {
                continue;
            };

            if meta.session_id.is_none() {
                meta.session_id = extract_session_id(&json);
            }
            if meta.project_path.is_none() {
                meta.project_path = extract_project_path(&json);
            }

            // Codex session_meta carries the spawn source: an object means
            // a subagent session, the string "exec" a headless exec run.
            if let Some(source) = json
                .get("payload")
                .and_then(|p| p.get("source"))
                .filter(|_| get_str(&json, "type") == Some("session_meta"))
            {
                match source {
                    Value::Object(_) => meta.is_codex_subagent = true,
                    Value::String(s) if s == "exec" => meta.is_codex_exec = true,
                    _ => {}
                }
            }
            if json.get("payload").and_then(|p| get_str(p, "source")) == Some("exec") {
                meta.is_codex_exec = true;
            }

            if !line_has_tool_result(trimmed) {
                meta.token_count += count_text_tokens(&json);
            }
        }

        meta
    }
}

/// Extract the most recent user message from tail text, skipping tool
/// results and notification-style entries.
pub fn extract_last_user_message(tail: &str) -> Option<String> {
    for line in tail.lines().rev() {
        let trimmed = line.trim();
        if trimmed.is_empty() || line_has_tool_result(trimmed) {
            continue;
        }
        let Ok(json) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        if !is_user_record(&json) {
            continue;
        }
        if let Some(text) = user_text(&json) {
            let text = text.trim();
            if !text.is_empty() && !is_tool_notification(text) {
                return Some(text.to_string());
            }
        }
    }
    None
}

/// Whether a stored message is a tool/system notification rather than
/// something the user typed.
pub fn is_tool_notification(message: &str) -> bool {
    let m = message.trim_start();
    m.starts_with('<') || m.starts_with("[Request interrupted") || m.starts_with("Caveat:")
}

fn get_str<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(|v| v.as_str())
}

fn extract_session_id(json: &Value) -> Option<String> {
    if let Some(id) = get_str(json, "sessionId").or_else(|| get_str(json, "session_id")) {
        return Some(id.to_string());
    }
    if let Some(payload) = json.get("payload") {
        if let Some(id) = get_str(payload, "id").or_else(|| get_str(payload, "sessionId")) {
            return Some(id.to_string());
        }
    }
    // Pi writes a dedicated first line: {"type":"session","id":...}
    if get_str(json, "type") == Some("session") {
        if let Some(id) = get_str(json, "id") {
            return Some(id.to_string());
        }
    }
    None
}

fn extract_project_path(json: &Value) -> Option<String> {
    if let Some(cwd) = get_str(json, "cwd") {
        return Some(cwd.to_string());
    }
    let payload = json.get("payload")?;
    get_str(payload, "cwd")
        .or_else(|| get_str(payload, "working_directory"))
        .map(String::from)
}

fn line_has_tool_result(line: &str) -> bool {
    TOOL_RESULT_MARKERS.iter().any(|m| line.contains(m))
}

/// Whether a record represents user input (as opposed to assistant output
/// or tool traffic).
fn is_user_record(json: &Value) -> bool {
    if get_str(json, "type") == Some("user") {
        return true;
    }
    if json.get("message").and_then(|m| get_str(m, "role")) == Some("user") {
        return true;
    }
    if let Some(payload) = json.get("payload") {
        if get_str(payload, "type") == Some("user_message")
            || get_str(payload, "role") == Some("user")
        {
            return true;
        }
    }
    false
}

/// Pull the text of a user record from its common shapes: a plain string
/// `message`/`content`, a `text` field, or a content array of text blocks.
fn user_text(json: &Value) -> Option<String> {
    if let Some(text) = get_str(json, "text") {
        return Some(text.to_string());
    }
    if let Some(payload) = json.get("payload") {
        if let Some(text) = get_str(payload, "message").or_else(|| get_str(payload, "text")) {
            return Some(text.to_string());
        }
    }
    let message = json.get("message")?;
    match message.get("content") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(items)) => {
            let parts: Vec<&str> = items
                .iter()
                .filter(|item| get_str(item, "type") == Some("text"))
                .filter_map(|item| get_str(item, "text"))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => get_str(message, "text").map(String::from),
    }
}

/// Count whitespace-separated tokens in the user-visible text of a record.
///
/// Deterministic and cheap; only used for the creation floor and the
/// match-eligibility gate, never for analytics.
fn count_text_tokens(json: &Value) -> usize {
    let mut count = 0;
    collect_text(json, &mut |text| {
        count += text.split_whitespace().count();
    });
    count
}

fn collect_text(value: &Value, f: &mut impl FnMut(&str)) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                match v {
                    Value::String(s) if key == "text" || key == "content" || key == "message" => {
                        f(s)
                    }
                    _ => collect_text(v, f),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_text(item, f);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[path = "head_tests.rs"]
mod tests;
