// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn collapses_whitespace_to_flexible_runs() {
    let pattern = flexible_pattern("fix  the\tparser   bug");
    assert_eq!(pattern, r"fix\s+the\s+parser\s+bug");
}

#[test]
fn escapes_regex_metacharacters() {
    let pattern = flexible_pattern("what does foo(x) * 2 mean?");
    let re = regex::Regex::new(&pattern).unwrap();
    assert!(re.is_match("what does foo(x) * 2 mean?"));
    assert!(!re.is_match("what does fooXxX * 2 meanZ"));
}

#[test]
fn quotes_tolerate_json_escaping() {
    let re = compile_pattern(r#"rename "old" to "new""#).unwrap();
    // Raw form, as on screen
    assert!(re.is_match(r#"rename "old" to "new""#));
    // JSON-escaped form, as in the log
    assert!(re.is_match(r#"{"text":"rename \"old\" to \"new\""}"#));
}

#[parameterized(
    rewrapped_line = { "first line second line", "first line\nsecond line", true },
    wrapped_spaces = { "a b", "a     b", true },
    tab_on_screen = { "a b", "a\tb", true },
    different_words = { "a b", "a c", false },
)]
fn whitespace_matching(message: &str, haystack: &str, matches: bool) {
    let re = compile_pattern(message).unwrap();
    assert_eq!(re.is_match(haystack), matches);
}

#[test]
fn multiline_messages_collapse_before_escaping() {
    let re = compile_pattern("line one\nline two").unwrap();
    assert!(re.is_match("line one line two"));
}
