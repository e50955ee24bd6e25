// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transient per-poll snapshots of logs and tmux windows.

use crate::agent::AgentType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata harvested from one JSONL log during a poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntrySnapshot {
    pub log_path: String,
    pub mtime: DateTime<Utc>,
    pub birthtime: DateTime<Utc>,
    pub session_id: Option<String>,
    pub project_path: Option<String>,
    pub agent_type: Option<AgentType>,
    /// Codex logs spawned by another session; never matched to windows.
    pub is_codex_subagent: bool,
    /// Headless `codex exec` logs; recorded but hidden from the UI.
    pub is_codex_exec: bool,
    pub log_token_count: usize,
    pub last_user_message: Option<String>,
}

/// A tmux window observed during enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    /// Window address, e.g. `agentboard:@1`.
    pub tmux_window: String,
    pub name: String,
    pub pane_current_path: String,
    /// `#{window_activity}` epoch seconds.
    pub activity: i64,
}

impl WindowSnapshot {
    pub fn activity_time(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.activity, 0)
    }
}
