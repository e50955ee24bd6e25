// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ephemeral registry projection of a live tmux window.

use crate::agent::AgentType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse activity state derived from the window's scrollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The agent is producing output.
    Working,
    /// The agent is idle at its input prompt.
    Waiting,
    /// The agent is blocked on a permission dialog.
    Permission,
    Unknown,
}

/// Whether the window was created by this server or found already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    Managed,
    External,
}

/// A live tmux window as shown to clients.
///
/// Sessions exist only while their window does; persistent identity lives
/// in [`crate::AgentSessionRecord`], linked through `agent_session_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    /// Window address, e.g. `agentboard:@1`.
    pub tmux_window: String,
    pub project_path: String,
    pub status: SessionStatus,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub source: SessionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
