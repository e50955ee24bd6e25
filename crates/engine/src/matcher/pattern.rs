// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flexible-whitespace pattern construction.
//!
//! Scrollback and log store the same message with different whitespace
//! (the terminal re-wraps, the log JSON-escapes), so messages become
//! regexes that tolerate both.

/// Convert a user message into a whitespace- and quote-tolerant regex.
///
/// Whitespace runs collapse to single spaces, the result is
/// regex-escaped, spaces become `\s+`, and each `"` becomes `(?:\\?")?`
/// so the pattern matches the JSON-escaped form in the log as well as
/// the raw form on screen.
pub fn flexible_pattern(message: &str) -> String {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    let escaped = regex::escape(&collapsed);
    escaped.replace(' ', r"\s+").replace('"', "(?:\\\\?\")?")
}

/// Compile a message pattern, or None when the regex is somehow invalid.
pub fn compile_pattern(message: &str) -> Option<regex::Regex> {
    regex::Regex::new(&flexible_pattern(message)).ok()
}

#[cfg(test)]
#[path = "pattern_tests.rs"]
mod tests;
