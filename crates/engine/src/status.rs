// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session status heuristics.
//!
//! Derived from the last few scrollback lines the same way prompt
//! detection works: the agents print a stable interrupt hint while
//! generating, a numbered dialog while asking for permission, and an
//! empty prompt line while idle.

use ab_core::SessionStatus;

/// Lines of scrollback needed for a status read.
pub const STATUS_CAPTURE_LINES: u32 = 40;

/// Derive a coarse status from recent scrollback.
pub fn derive_status(scrollback: &str) -> SessionStatus {
    let tail: Vec<&str> = scrollback
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .take(15)
        .collect();

    if tail.iter().any(|l| l.contains("esc to interrupt")) {
        return SessionStatus::Working;
    }

    if tail.iter().any(|l| is_permission_line(l)) {
        return SessionStatus::Permission;
    }

    if tail.iter().any(|l| {
        let t = l.trim_start_matches([' ', '│', '┃', '|']);
        t.starts_with('❯') || t.starts_with('›')
    }) {
        return SessionStatus::Waiting;
    }

    SessionStatus::Unknown
}

/// Permission dialogs show numbered yes/no options.
fn is_permission_line(line: &str) -> bool {
    let t = line.trim();
    if t.contains("Do you want") || t.contains("(y/n)") {
        return true;
    }
    let numbered_yes = t.starts_with("1.") && t.contains("Yes");
    let numbered_no = (t.starts_with("2.") || t.starts_with("3.")) && t.contains("No");
    numbered_yes || numbered_no
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
