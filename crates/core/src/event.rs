// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events emitted by the session registry and poller.

use crate::record::AgentSessionRecord;
use crate::session::Session;
use serde::{Deserialize, Serialize};

/// Typed registry event delivered to gateway connections.
///
/// Within one `replace_sessions` call, `SessionRemoved` events are emitted
/// before the bulk `Sessions` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// Full replacement of the live session slice.
    Sessions(Vec<Session>),
    /// One session changed in place.
    SessionUpdate(Session),
    /// A managed session was just created.
    SessionCreated(Session),
    /// A window disappeared.
    SessionRemoved { id: String },
    /// Refreshed snapshot of persistent agent-session records.
    AgentSessions(Vec<AgentSessionRecord>),
    /// An orphaned record re-acquired a window.
    SessionActivated { session_id: String, tmux_window: String },
}

/// Per-cycle poll diagnostics, logged as `log_poll`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStats {
    pub logs_scanned: usize,
    pub new_sessions: usize,
    pub matches: usize,
    pub orphans: usize,
    pub errors: usize,
    pub duration_ms: u64,
}

impl PollStats {
    /// The result reported when a poll is skipped by single-flight.
    pub fn skipped() -> Self {
        Self::default()
    }
}
