// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-message extraction from tmux scrollback.
//!
//! Claude and Codex mark submitted prompts with a glyph at the start of
//! the line (`❯` / `›`); Pi paints user messages with a fixed background
//! color, so its extraction walks the ANSI-preserved capture. When no
//! prompts are found at all, a trace-line fallback harvests the agent's
//! `•` activity lines, which is enough to re-identify a session even
//! though the user never typed.

/// Maximum prompt messages recovered from one capture.
const MAX_PROMPTS: usize = 25;

/// Maximum trace lines recovered by the fallback.
const MAX_TRACE_LINES: usize = 12;

/// Pi's user-message background color span.
const PI_SPAN_START: &str = "\u{1b}[48;2;52;53;65m";
const PI_SPAN_END: &str = "\u{1b}[49m";

/// Messages recovered from one window's scrollback, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMessages {
    pub messages: Vec<String>,
    /// Set when the trace fallback produced the messages; trace lines
    /// also appear in Codex subagent logs, so such matches are blocked.
    pub from_trace_fallback: bool,
}

/// Extract user messages from a plain (ANSI-stripped) capture.
///
/// Most recent first, de-duplicated, capped at 25.
pub fn extract_prompt_messages(scrollback: &str) -> Vec<String> {
    let lines: Vec<&str> = scrollback.lines().collect();
    let mut messages: Vec<String> = Vec::new();

    for (i, line) in lines.iter().enumerate().rev() {
        if messages.len() >= MAX_PROMPTS {
            break;
        }
        // The send glyph marks a queued-but-unsent draft line
        if line.contains('↵') {
            continue;
        }
        let Some(message) = prompt_line_text(line) else {
            continue;
        };
        if message.is_empty() {
            continue;
        }
        if is_current_input_field(&lines, i) {
            continue;
        }
        if !messages.iter().any(|m| m == &message) {
            messages.push(message);
        }
    }

    messages
}

/// Strip TUI chrome and return the text of a prompt line, if it is one.
fn prompt_line_text(line: &str) -> Option<String> {
    let stripped = line.trim_start_matches([' ', '\t', '│', '┃', '|']);
    let rest = stripped
        .strip_prefix('❯')
        .or_else(|| stripped.strip_prefix('›'))?;
    Some(rest.trim().to_string())
}

/// Whether the prompt line at `index` is the live input field rather
/// than a submitted message.
///
/// The input box is followed within three lines by a context meter
/// ("NN% context left" / "[NN%]") or the shortcuts hint.
fn is_current_input_field(lines: &[&str], index: usize) -> bool {
    lines
        .iter()
        .skip(index + 1)
        .take(3)
        .any(|l| is_input_field_trailer(l))
}

fn is_input_field_trailer(line: &str) -> bool {
    if line.contains("for shortcuts") {
        return true;
    }
    if line.contains("context left") || line.contains("% context") {
        return true;
    }
    percent_bracket(line)
}

/// `[n%]` anywhere in the line.
fn percent_bracket(line: &str) -> bool {
    let mut rest = line;
    while let Some(start) = rest.find('[') {
        let after = &rest[start + 1..];
        if let Some(end) = after.find(']') {
            let inner = &after[..end];
            if let Some(digits) = inner.strip_suffix('%') {
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                    return true;
                }
            }
            rest = &after[end + 1..];
        } else {
            break;
        }
    }
    false
}

/// Extract Pi user messages from an ANSI-preserved capture.
///
/// User messages sit in `ESC[48;2;52;53;65m ... ESC[49m` spans; residual
/// ANSI inside a span is stripped.
pub fn extract_pi_messages(ansi_scrollback: &str) -> Vec<String> {
    let mut spans = Vec::new();
    let mut rest = ansi_scrollback;
    while let Some(start) = rest.find(PI_SPAN_START) {
        let after = &rest[start + PI_SPAN_START.len()..];
        let (span, next) = match after.find(PI_SPAN_END) {
            Some(end) => (&after[..end], &after[end + PI_SPAN_END.len()..]),
            None => (after, ""),
        };
        let text = strip_ansi(span);
        let text = text.trim();
        if !text.is_empty() {
            spans.push(text.to_string());
        }
        rest = next;
    }

    // Most recent first, distinct, capped
    let mut messages: Vec<String> = Vec::new();
    for text in spans.into_iter().rev() {
        if messages.len() >= MAX_PROMPTS {
            break;
        }
        if !messages.iter().any(|m| m == &text) {
            messages.push(text);
        }
    }
    messages
}

/// Remove ANSI escape sequences (CSI and OSC forms).
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                // CSI: parameters then a final byte in @..~
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                // OSC: terminated by BEL or ST
                while let Some(c) = chars.next() {
                    if c == '\u{7}' {
                        break;
                    }
                    if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// Fallback: harvest agent trace lines (`•` bullets) when no prompts
/// were found, excluding tool-status trailers.
pub fn extract_trace_lines(scrollback: &str) -> Vec<String> {
    let mut messages: Vec<String> = Vec::new();
    for line in scrollback.lines().rev() {
        if messages.len() >= MAX_TRACE_LINES {
            break;
        }
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix('•') else {
            continue;
        };
        let text = rest.trim();
        if text.is_empty() || is_status_trace(text) {
            continue;
        }
        let text = text.to_string();
        if !messages.iter().any(|m| m == &text) {
            messages.push(text);
        }
    }
    messages
}

/// Trace lines whose parenthesized suffix is a live status hint, not
/// conversation content.
fn is_status_trace(text: &str) -> bool {
    let Some(open) = text.rfind('(') else {
        return false;
    };
    let Some(close) = text[open..].find(')') else {
        return false;
    };
    let inner = &text[open + 1..open + close];
    if inner.contains("esc to interrupt") {
        return true;
    }
    if inner.contains("context left") {
        return true;
    }
    // Durations like "12ms" / "3s"
    let inner = inner.trim();
    let digits: String = inner.chars().take_while(|c| c.is_ascii_digit()).collect();
    if !digits.is_empty() {
        let unit = inner[digits.len()..].trim();
        if unit == "ms" || unit == "s" || unit == "m" {
            return true;
        }
    }
    false
}

/// Combined extraction: prompts from the plain capture, Pi spans from
/// the ANSI capture, trace fallback last.
pub fn extract_messages(plain: &str, ansi: Option<&str>) -> ExtractedMessages {
    let prompts = extract_prompt_messages(plain);
    if !prompts.is_empty() {
        return ExtractedMessages {
            messages: prompts,
            from_trace_fallback: false,
        };
    }
    if let Some(ansi) = ansi {
        let pi = extract_pi_messages(ansi);
        if !pi.is_empty() {
            return ExtractedMessages {
                messages: pi,
                from_trace_fallback: false,
            };
        }
    }
    ExtractedMessages {
        messages: extract_trace_lines(plain),
        from_trace_fallback: true,
    }
}

#[cfg(test)]
#[path = "prompts_tests.rs"]
mod tests;
