// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake tmux client for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{TmuxClient, TmuxError};
use ab_core::WindowSnapshot;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Recorded tmux call
#[derive(Debug, Clone, PartialEq)]
pub enum TmuxCall {
    CaptureScrollback {
        target: String,
        lines: u32,
        with_ansi: bool,
    },
    ListWindows {
        session: String,
    },
    ListPanes {
        target: String,
    },
    SendLiteral {
        target: String,
        text: String,
    },
    SendEnter {
        target: String,
    },
    CancelCopyMode {
        target: String,
    },
    ResizePane {
        target: String,
        cols: u16,
        rows: u16,
    },
    EnsureSession {
        session: String,
    },
    NewWindow {
        session: String,
        name: String,
        cwd: Option<String>,
        command: Option<String>,
    },
    KillWindow {
        target: String,
    },
    RenameWindow {
        target: String,
        name: String,
    },
    PipePane {
        target: String,
        command: Option<String>,
    },
}

/// Fake window state
#[derive(Debug, Clone, Default)]
pub struct FakeWindow {
    pub name: String,
    pub pane_current_path: String,
    pub activity: i64,
    pub scrollback: String,
    pub scrollback_ansi: String,
}

struct FakeTmuxState {
    windows: BTreeMap<String, FakeWindow>,
    calls: Vec<TmuxCall>,
    next_window_id: u64,
}

/// Fake tmux client for testing. Windows are keyed by their full address
/// (`session:@id`); scrollback is canned per window.
#[derive(Clone)]
pub struct FakeTmuxAdapter {
    inner: Arc<Mutex<FakeTmuxState>>,
}

impl Default for FakeTmuxAdapter {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeTmuxState {
                windows: BTreeMap::new(),
                calls: Vec::new(),
                next_window_id: 0,
            })),
        }
    }
}

impl FakeTmuxAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<TmuxCall> {
        self.inner.lock().calls.clone()
    }

    /// Add a window with the given address.
    pub fn add_window(&self, target: &str, name: &str, path: &str) {
        self.inner.lock().windows.insert(
            target.to_string(),
            FakeWindow {
                name: name.to_string(),
                pane_current_path: path.to_string(),
                activity: 0,
                ..Default::default()
            },
        );
    }

    pub fn remove_window(&self, target: &str) {
        self.inner.lock().windows.remove(target);
    }

    pub fn set_scrollback(&self, target: &str, text: &str) {
        if let Some(w) = self.inner.lock().windows.get_mut(target) {
            w.scrollback = text.to_string();
        }
    }

    pub fn set_scrollback_ansi(&self, target: &str, text: &str) {
        if let Some(w) = self.inner.lock().windows.get_mut(target) {
            w.scrollback_ansi = text.to_string();
        }
    }

    pub fn set_activity(&self, target: &str, activity: i64) {
        if let Some(w) = self.inner.lock().windows.get_mut(target) {
            w.activity = activity;
        }
    }

    pub fn window(&self, target: &str) -> Option<FakeWindow> {
        self.inner.lock().windows.get(target).cloned()
    }
}

#[async_trait]
impl TmuxClient for FakeTmuxAdapter {
    async fn capture_scrollback(
        &self,
        target: &str,
        lines: u32,
        with_ansi: bool,
    ) -> Result<String, TmuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TmuxCall::CaptureScrollback {
            target: target.to_string(),
            lines,
            with_ansi,
        });
        match inner.windows.get(target) {
            Some(w) => Ok(if with_ansi {
                w.scrollback_ansi.clone()
            } else {
                w.scrollback.clone()
            }),
            None => Err(TmuxError::NotFound(target.to_string())),
        }
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowSnapshot>, TmuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TmuxCall::ListWindows {
            session: session.to_string(),
        });
        let prefix = format!("{}:", session);
        Ok(inner
            .windows
            .iter()
            .filter(|(target, _)| target.starts_with(&prefix))
            .map(|(target, w)| WindowSnapshot {
                tmux_window: target.clone(),
                name: w.name.clone(),
                pane_current_path: w.pane_current_path.clone(),
                activity: w.activity,
            })
            .collect())
    }

    async fn list_panes(&self, target: &str) -> Result<Vec<String>, TmuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TmuxCall::ListPanes {
            target: target.to_string(),
        });
        if inner.windows.contains_key(target) {
            Ok(vec!["%0".to_string()])
        } else {
            Err(TmuxError::NotFound(target.to_string()))
        }
    }

    async fn send_literal(&self, target: &str, text: &str) -> Result<(), TmuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TmuxCall::SendLiteral {
            target: target.to_string(),
            text: text.to_string(),
        });
        if !inner.windows.contains_key(target) {
            return Err(TmuxError::NotFound(target.to_string()));
        }
        Ok(())
    }

    async fn send_enter(&self, target: &str) -> Result<(), TmuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TmuxCall::SendEnter {
            target: target.to_string(),
        });
        if !inner.windows.contains_key(target) {
            return Err(TmuxError::NotFound(target.to_string()));
        }
        Ok(())
    }

    async fn cancel_copy_mode(&self, target: &str) -> Result<(), TmuxError> {
        self.inner.lock().calls.push(TmuxCall::CancelCopyMode {
            target: target.to_string(),
        });
        Ok(())
    }

    async fn resize_pane(&self, target: &str, cols: u16, rows: u16) -> Result<(), TmuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TmuxCall::ResizePane {
            target: target.to_string(),
            cols,
            rows,
        });
        if !inner.windows.contains_key(target) {
            return Err(TmuxError::NotFound(target.to_string()));
        }
        Ok(())
    }

    async fn ensure_session(&self, session: &str) -> Result<(), TmuxError> {
        self.inner.lock().calls.push(TmuxCall::EnsureSession {
            session: session.to_string(),
        });
        Ok(())
    }

    async fn new_window(
        &self,
        session: &str,
        name: &str,
        cwd: Option<&str>,
        command: Option<&str>,
    ) -> Result<String, TmuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TmuxCall::NewWindow {
            session: session.to_string(),
            name: name.to_string(),
            cwd: cwd.map(String::from),
            command: command.map(String::from),
        });
        inner.next_window_id += 1;
        let target = format!("{}:@{}", session, 100 + inner.next_window_id);
        inner.windows.insert(
            target.clone(),
            FakeWindow {
                name: name.to_string(),
                pane_current_path: cwd.unwrap_or("").to_string(),
                activity: 0,
                ..Default::default()
            },
        );
        Ok(target)
    }

    async fn kill_window(&self, target: &str) -> Result<(), TmuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TmuxCall::KillWindow {
            target: target.to_string(),
        });
        if inner.windows.remove(target).is_none() {
            return Err(TmuxError::NotFound(target.to_string()));
        }
        Ok(())
    }

    async fn rename_window(&self, target: &str, name: &str) -> Result<(), TmuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TmuxCall::RenameWindow {
            target: target.to_string(),
            name: name.to_string(),
        });
        match inner.windows.get_mut(target) {
            Some(w) => {
                w.name = name.to_string();
                Ok(())
            }
            None => Err(TmuxError::NotFound(target.to_string())),
        }
    }

    async fn pipe_pane(&self, target: &str, command: Option<&str>) -> Result<(), TmuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(TmuxCall::PipePane {
            target: target.to_string(),
            command: command.map(String::from),
        });
        if !inner.windows.contains_key(target) {
            return Err(TmuxError::NotFound(target.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
