// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The persistent agent-session record.

use crate::agent::AgentType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One discovered agent session, keyed by the session id extracted from
/// the head of its JSONL log.
///
/// Invariants (enforced by the database layer):
/// - `session_id` and `log_file_path` are unique; the pair is 1:1.
/// - At most one record holds a given `current_window` at a time.
/// - `display_name` is unique across all records.
/// - `current_window` is only ever set from match evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSessionRecord {
    pub session_id: String,
    pub log_file_path: String,
    /// The cwd recorded in the log head; normalized, may be empty.
    pub project_path: String,
    pub agent_type: AgentType,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Most recent non-tool-notification user message, used as a UI hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_user_message: Option<String>,
    /// Tmux window address when attached to a live window; None = orphaned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_window: Option<String>,
    pub is_pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_resume_error: Option<String>,
    /// Log size at the last poll; None triggers a one-time rescan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_log_size: Option<i64>,
    /// Headless codex exec logs are kept but excluded from the UI.
    pub is_codex_exec: bool,
}

impl AgentSessionRecord {
    /// Whether the record currently owns a live tmux window.
    pub fn is_active(&self) -> bool {
        self.current_window.is_some()
    }
}

/// Field-level patch applied to an existing record.
///
/// `Some(..)` sets a field; `None` leaves it untouched. Nullable columns
/// use a nested option so `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub project_path: Option<String>,
    pub display_name: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_user_message: Option<Option<String>>,
    pub current_window: Option<Option<String>>,
    pub is_pinned: Option<bool>,
    pub last_resume_error: Option<Option<String>>,
    pub last_known_log_size: Option<Option<i64>>,
}

impl RecordPatch {
    /// True when the patch would not change anything.
    pub fn is_empty(&self) -> bool {
        *self == RecordPatch::default()
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
