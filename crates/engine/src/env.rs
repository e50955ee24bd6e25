// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the engine crate.

use ab_core::AgentType;
use std::time::Duration;

/// Floor for the poll interval; faster polling hammers tmux and rg.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

/// Poll interval (`REFRESH_INTERVAL_MS`, default 5000ms, floor 2000ms).
pub fn refresh_interval() -> Duration {
    let ms = std::env::var("REFRESH_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(5000);
    Duration::from_millis(ms).max(MIN_REFRESH_INTERVAL)
}

/// Scrollback capture depth (`AGENTBOARD_SCROLLBACK_LINES`, default 10000).
pub fn scrollback_lines() -> u32 {
    std::env::var("AGENTBOARD_SCROLLBACK_LINES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10_000)
}

/// Resume command template for a pinned orphan of the given agent.
///
/// `{sessionId}` is substituted with the record's session id. Pi has no
/// resume command.
pub fn resume_command(agent: AgentType) -> Option<String> {
    let (var, default) = match agent {
        AgentType::Claude => ("CLAUDE_RESUME_CMD", "claude --resume {sessionId}"),
        AgentType::Codex => ("CODEX_RESUME_CMD", "codex resume {sessionId}"),
        AgentType::Pi => return None,
    };
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => Some(default.to_string()),
    }
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
