// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tmux adapter: every tmux invocation the daemon makes goes through the
//! [`TmuxClient`] trait so the engine and gateway can be tested against a
//! fake.

mod real;

pub use real::TmuxAdapter;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeTmuxAdapter, FakeWindow, TmuxCall};

use ab_core::WindowSnapshot;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from tmux operations
#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("target not found: {0}")]
    NotFound(String),
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
}

/// Adapter over the tmux command surface.
#[async_trait]
pub trait TmuxClient: Clone + Send + Sync + 'static {
    /// Dump up to `lines` of joined scrollback for a target.
    ///
    /// `with_ansi` preserves escape sequences (needed to find Pi's
    /// background-color message markers).
    async fn capture_scrollback(
        &self,
        target: &str,
        lines: u32,
        with_ansi: bool,
    ) -> Result<String, TmuxError>;

    /// List windows of a session as `session:@id` snapshots.
    async fn list_windows(&self, session: &str) -> Result<Vec<WindowSnapshot>, TmuxError>;

    /// Pane ids of a target window; the liveness probe.
    async fn list_panes(&self, target: &str) -> Result<Vec<String>, TmuxError>;

    /// Send literal text (no key-name interpretation).
    async fn send_literal(&self, target: &str, text: &str) -> Result<(), TmuxError>;

    /// Send the Enter key.
    async fn send_enter(&self, target: &str) -> Result<(), TmuxError>;

    /// Leave copy-mode, if active.
    async fn cancel_copy_mode(&self, target: &str) -> Result<(), TmuxError>;

    async fn resize_pane(&self, target: &str, cols: u16, rows: u16) -> Result<(), TmuxError>;

    /// Create the server's session if it does not exist yet.
    async fn ensure_session(&self, session: &str) -> Result<(), TmuxError>;

    /// Spawn a new window, returning its `session:@id` address.
    async fn new_window(
        &self,
        session: &str,
        name: &str,
        cwd: Option<&str>,
        command: Option<&str>,
    ) -> Result<String, TmuxError>;

    async fn kill_window(&self, target: &str) -> Result<(), TmuxError>;

    async fn rename_window(&self, target: &str, name: &str) -> Result<(), TmuxError>;

    /// Attach or detach (`command: None`) a pipe-pane output tap.
    async fn pipe_pane(&self, target: &str, command: Option<&str>) -> Result<(), TmuxError>;

    /// Whether a window address currently resolves.
    async fn window_exists(&self, target: &str) -> bool {
        self.list_panes(target).await.is_ok()
    }
}

/// Parse one `list-windows` format line:
/// `#{session_name}:#{window_id}\t#{window_name}\t#{pane_current_path}\t#{window_activity}`
pub(crate) fn parse_window_line(line: &str) -> Option<WindowSnapshot> {
    let mut parts = line.splitn(4, '\t');
    let tmux_window = parts.next()?.trim();
    if tmux_window.is_empty() {
        return None;
    }
    let name = parts.next()?.to_string();
    let pane_current_path = parts.next()?.to_string();
    let activity = parts.next()?.trim().parse().unwrap_or(0);
    Some(WindowSnapshot {
        tmux_window: tmux_window.to_string(),
        name,
        pane_current_path,
        activity,
    })
}
