// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

#[test]
#[serial(env)]
fn refresh_interval_has_floor() {
    std::env::set_var("REFRESH_INTERVAL_MS", "500");
    assert_eq!(refresh_interval(), MIN_REFRESH_INTERVAL);
    std::env::set_var("REFRESH_INTERVAL_MS", "8000");
    assert_eq!(refresh_interval(), Duration::from_secs(8));
    std::env::remove_var("REFRESH_INTERVAL_MS");
    assert_eq!(refresh_interval(), Duration::from_secs(5));
}

#[test]
#[serial(env)]
fn resume_commands_have_defaults_except_pi() {
    std::env::remove_var("CLAUDE_RESUME_CMD");
    std::env::remove_var("CODEX_RESUME_CMD");
    assert_eq!(
        resume_command(AgentType::Claude).as_deref(),
        Some("claude --resume {sessionId}")
    );
    assert_eq!(
        resume_command(AgentType::Codex).as_deref(),
        Some("codex resume {sessionId}")
    );
    assert_eq!(resume_command(AgentType::Pi), None);

    std::env::set_var("CLAUDE_RESUME_CMD", "claude -r {sessionId} --fork");
    assert_eq!(
        resume_command(AgentType::Claude).as_deref(),
        Some("claude -r {sessionId} --fork")
    );
    std::env::remove_var("CLAUDE_RESUME_CMD");
}
