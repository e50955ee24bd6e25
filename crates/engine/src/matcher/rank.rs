// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered-match scoring.
//!
//! A candidate log is scored by walking the window's recent user
//! messages in chronological order and advancing a cursor through the
//! log: each message must match at or after the previous hit. A log
//! that contains the same messages in the same order as the terminal
//! outranks one that merely contains some of them.

use crate::matcher::pattern::compile_pattern;

/// Score pair: compared by matched count, then total matched length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderedScore {
    pub matched_count: usize,
    pub matched_length: usize,
}

/// Minimum message length considered for scoring; shorter fragments
/// match everything and add noise.
const MIN_SCORING_LEN: usize = 5;

/// Filter to scoring-eligible messages and reverse most-recent-first
/// input into chronological order.
pub fn scoring_messages(most_recent_first: &[String]) -> Vec<&str> {
    most_recent_first
        .iter()
        .filter(|m| m.chars().count() >= MIN_SCORING_LEN)
        .rev()
        .map(|m| m.as_str())
        .collect()
}

/// Score messages against tail text by byte position.
pub fn score_against_text(chronological: &[&str], text: &str) -> OrderedScore {
    let mut score = OrderedScore::default();
    let mut cursor = 0usize;
    for message in chronological {
        let Some(re) = compile_pattern(message) else {
            continue;
        };
        if cursor > text.len() {
            break;
        }
        if let Some(m) = re.find_at(text, cursor) {
            score.matched_count += 1;
            score.matched_length += message.len();
            cursor = m.end();
        }
    }
    score
}

/// Score messages against a full file via per-message match line numbers
/// (as reported by ripgrep).
pub fn score_against_lines(chronological: &[&str], lines_per_message: &[Vec<u64>]) -> OrderedScore {
    let mut score = OrderedScore::default();
    let mut next_min = 1u64;
    for (message, lines) in chronological.iter().zip(lines_per_message) {
        if let Some(line) = lines.iter().find(|l| **l >= next_min) {
            score.matched_count += 1;
            score.matched_length += message.len();
            next_min = line + 1;
        }
    }
    score
}

#[cfg(test)]
#[path = "rank_tests.rs"]
mod tests;
