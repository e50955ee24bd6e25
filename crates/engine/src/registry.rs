// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory registry of live tmux windows.
//!
//! The registry is the projection clients see; it holds no persistent
//! state. Mutations serialize on an internal lock and fan events out
//! over a broadcast channel, so every subscriber observes the same
//! ordered sequence. Within one `replace_sessions` call, removal events
//! fire before the bulk `sessions` event.

use ab_core::{AgentSessionRecord, RegistryEvent, Session, SessionStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::broadcast;

/// Capacity of the event fan-out channel; slow clients miss events
/// rather than stalling the registry.
const EVENT_CAPACITY: usize = 256;

/// Patch applied to one session in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub name: Option<String>,
    pub status: Option<SessionStatus>,
    pub last_activity: Option<DateTime<Utc>>,
    pub agent_session_id: Option<Option<String>>,
}

struct RegistryState {
    sessions: BTreeMap<String, Session>,
    managed: HashSet<String>,
    agent_records: Vec<AgentSessionRecord>,
}

/// Event-emitting view of currently known tmux windows.
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    tx: broadcast::Sender<RegistryEvent>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(RegistryState {
                sessions: BTreeMap::new(),
                managed: HashSet::new(),
                agent_records: Vec::new(),
            }),
            tx,
        }
    }

    /// Subscribe to registry events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.tx.subscribe()
    }

    /// Current sessions, ordered by window address.
    pub fn sessions(&self) -> Vec<Session> {
        self.state.lock().sessions.values().cloned().collect()
    }

    pub fn get(&self, tmux_window: &str) -> Option<Session> {
        self.state.lock().sessions.get(tmux_window).cloned()
    }

    /// Whether this server created the window.
    pub fn is_managed(&self, tmux_window: &str) -> bool {
        self.state.lock().managed.contains(tmux_window)
    }

    /// Remember a window as managed (created by us).
    pub fn mark_managed(&self, tmux_window: &str) {
        self.state.lock().managed.insert(tmux_window.to_string());
    }

    /// Replace the full session slice with a fresh enumeration.
    ///
    /// Emits `SessionRemoved` for disappeared windows first, then a
    /// single `Sessions` event, and only if the slice actually changed.
    /// A session whose incoming `last_activity` would regress keeps the
    /// strictly-later value it already had.
    pub fn replace_sessions(&self, incoming: Vec<Session>) {
        let events = {
            let mut state = self.state.lock();
            let mut events: Vec<RegistryEvent> = Vec::new();

            let mut next: BTreeMap<String, Session> = BTreeMap::new();
            for mut session in incoming {
                if let Some(existing) = state.sessions.get(&session.tmux_window) {
                    if existing.last_activity > session.last_activity {
                        session.last_activity = existing.last_activity;
                    }
                }
                next.insert(session.tmux_window.clone(), session);
            }

            for window in state.sessions.keys() {
                if !next.contains_key(window) {
                    events.push(RegistryEvent::SessionRemoved {
                        id: window.clone(),
                    });
                }
            }
            state.managed.retain(|w| next.contains_key(w));

            if next != state.sessions {
                state.sessions = next;
                events.push(RegistryEvent::Sessions(
                    state.sessions.values().cloned().collect(),
                ));
            }
            events
        };

        for event in events {
            let _ = self.tx.send(event);
        }
    }

    /// Merge a patch into one session; emits `SessionUpdate` only when
    /// something changed.
    pub fn update_session(&self, tmux_window: &str, patch: SessionPatch) {
        let event = {
            let mut state = self.state.lock();
            let Some(session) = state.sessions.get_mut(tmux_window) else {
                return;
            };
            let before = session.clone();
            if let Some(name) = patch.name {
                session.name = name;
            }
            if let Some(status) = patch.status {
                session.status = status;
            }
            if let Some(last_activity) = patch.last_activity {
                if last_activity > session.last_activity {
                    session.last_activity = last_activity;
                }
            }
            if let Some(agent_session_id) = patch.agent_session_id {
                session.agent_session_id = agent_session_id;
            }
            if *session == before {
                None
            } else {
                Some(RegistryEvent::SessionUpdate(session.clone()))
            }
        };
        if let Some(event) = event {
            let _ = self.tx.send(event);
        }
    }

    /// Register a freshly created managed session.
    pub fn insert_created(&self, session: Session) {
        let event = {
            let mut state = self.state.lock();
            state.managed.insert(session.tmux_window.clone());
            state
                .sessions
                .insert(session.tmux_window.clone(), session.clone());
            RegistryEvent::SessionCreated(session)
        };
        let _ = self.tx.send(event);
    }

    /// Broadcast a refreshed agent-session snapshot, if it changed.
    pub fn emit_agent_sessions(&self, records: Vec<AgentSessionRecord>) {
        {
            let mut state = self.state.lock();
            if state.agent_records == records {
                return;
            }
            state.agent_records = records.clone();
        }
        let _ = self.tx.send(RegistryEvent::AgentSessions(records));
    }

    /// Last broadcast agent-session snapshot.
    pub fn agent_sessions(&self) -> Vec<AgentSessionRecord> {
        self.state.lock().agent_records.clone()
    }

    /// Announce that an orphaned record re-acquired a window.
    pub fn emit_session_activated(&self, session_id: &str, tmux_window: &str) {
        let _ = self.tx.send(RegistryEvent::SessionActivated {
            session_id: session_id.to_string(),
            tmux_window: tmux_window.to_string(),
        });
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
