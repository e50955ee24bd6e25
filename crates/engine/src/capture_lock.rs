// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Enter-key capture lock.
//!
//! When a client submits input (a write ending in a newline), the text
//! the user just sent is fresher than anything the log will say for a
//! few seconds. The gateway records the capture here; the poller checks
//! it before overwriting `last_user_message` from log content, avoiding
//! UI flicker from stale logs.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a capture suppresses log-driven overwrites.
const DEFAULT_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CaptureEntry {
    captured_text: String,
    at: Instant,
}

/// Shared map of recent Enter-key captures, keyed by tmux window.
pub struct CaptureLock {
    entries: Mutex<HashMap<String, CaptureEntry>>,
    ttl: Duration,
}

impl Default for CaptureLock {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureLock {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Record the text a client just submitted to a window.
    pub fn record(&self, tmux_window: &str, captured_text: &str) {
        self.entries.lock().insert(
            tmux_window.to_string(),
            CaptureEntry {
                captured_text: captured_text.to_string(),
                at: Instant::now(),
            },
        );
    }

    /// Whether log-driven `last_user_message` updates for this window
    /// are currently suppressed.
    pub fn is_locked(&self, tmux_window: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(tmux_window) {
            Some(entry) if entry.at.elapsed() < self.ttl => true,
            Some(_) => {
                entries.remove(tmux_window);
                false
            }
            None => false,
        }
    }

    /// The captured text, while the lock is held.
    pub fn captured_text(&self, tmux_window: &str) -> Option<String> {
        let entries = self.entries.lock();
        entries
            .get(tmux_window)
            .filter(|e| e.at.elapsed() < self.ttl)
            .map(|e| e.captured_text.clone())
    }
}

#[cfg(test)]
#[path = "capture_lock_tests.rs"]
mod tests;
