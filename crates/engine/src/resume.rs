// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resurrection of pinned orphans.
//!
//! A pinned record whose window is gone gets a fresh tmux window running
//! the agent's resume command, so the conversation continues where the
//! log left off. The next poll's matcher then re-associates the window
//! with the log through the normal evidence path.

use crate::env;
use ab_adapters::TmuxClient;
use ab_core::AgentSessionRecord;

/// Substitute the session id into a resume command template.
pub fn build_resume_command(template: &str, session_id: &str) -> String {
    template.replace("{sessionId}", session_id)
}

/// Sanitize a display name for use as a tmux window name.
///
/// tmux window names cannot contain colons or periods; everything else
/// odd becomes a hyphen, collapsed and truncated.
pub fn window_name_for(record: &AgentSessionRecord) -> String {
    let sanitized: String = record
        .display_name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '-',
        })
        .collect();
    let collapsed = sanitized
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let name = if collapsed.is_empty() {
        "session".to_string()
    } else {
        collapsed
    };
    if name.len() <= 30 {
        name
    } else {
        name[..30].trim_end_matches('-').to_string()
    }
}

/// Spawn a resume window for a pinned orphan.
///
/// Returns the new window address, or a human-readable error to store
/// in `last_resume_error`.
pub async fn resurrect_session<T: TmuxClient>(
    tmux: &T,
    tmux_session: &str,
    record: &AgentSessionRecord,
) -> Result<String, String> {
    let Some(template) = env::resume_command(record.agent_type) else {
        return Err(format!(
            "no resume command configured for {}",
            record.agent_type
        ));
    };
    let command = build_resume_command(&template, &record.session_id);
    let name = window_name_for(record);
    let cwd = if record.project_path.is_empty() {
        None
    } else {
        Some(record.project_path.as_str())
    };

    match tmux.new_window(tmux_session, &name, cwd, Some(&command)).await {
        Ok(target) => {
            tracing::info!(
                session_id = %record.session_id,
                window = %target,
                "resurrected pinned session"
            );
            Ok(target)
        }
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
#[path = "resume_tests.rs"]
mod tests;
