// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-client terminal proxy.
//!
//! One proxy tails one tmux window at a time: `pipe-pane` appends the
//! pane's raw byte stream to a spool file, and a `tail -f` child follows
//! it, its stdout forwarded chunk by chunk to the connection. Input goes
//! the other way through `send-keys -l` with an Enter per newline.

use ab_adapters::{TmuxClient, TmuxError};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Machine-readable proxy error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyErrorCode {
    SwitchFailed,
    InvalidWindow,
    PipeFailed,
    WriteFailed,
    ResizeFailed,
}

impl ProxyErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyErrorCode::SwitchFailed => "ERR_TMUX_SWITCH_FAILED",
            ProxyErrorCode::InvalidWindow => "ERR_INVALID_WINDOW",
            ProxyErrorCode::PipeFailed => "ERR_PIPE_FAILED",
            ProxyErrorCode::WriteFailed => "ERR_TMUX_WRITE_FAILED",
            ProxyErrorCode::ResizeFailed => "ERR_TMUX_RESIZE_FAILED",
        }
    }
}

impl fmt::Display for ProxyErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from terminal proxy operations
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct TerminalProxyError {
    pub code: ProxyErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl TerminalProxyError {
    fn new(code: ProxyErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
        }
    }
}

struct Tail {
    window: String,
    pipe_path: PathBuf,
    child: tokio::process::Child,
    reader: tokio::task::JoinHandle<()>,
}

struct ProxyState {
    current_window: Option<String>,
    tail: Option<Tail>,
    seq: u64,
}

/// Tmux adapter for one client connection.
pub struct TerminalProxy<T: TmuxClient> {
    tmux: T,
    connection_id: String,
    output_tx: mpsc::Sender<String>,
    state: Mutex<ProxyState>,
}

impl<T: TmuxClient> TerminalProxy<T> {
    pub fn new(tmux: T, connection_id: &str, output_tx: mpsc::Sender<String>) -> Self {
        Self {
            tmux,
            connection_id: connection_id.to_string(),
            output_tx,
            state: Mutex::new(ProxyState {
                current_window: None,
                tail: None,
                seq: 0,
            }),
        }
    }

    pub fn current_window(&self) -> Option<String> {
        self.state.lock().current_window.clone()
    }

    /// Attach to `target`, tearing down any previous tail first.
    ///
    /// Idempotent for the current target. Returns false when the target
    /// window does not exist.
    pub async fn switch_to(&self, target: &str) -> Result<bool, TerminalProxyError> {
        if self.state.lock().current_window.as_deref() == Some(target) {
            return Ok(true);
        }
        if !self.tmux.window_exists(target).await {
            return Ok(false);
        }

        let previous = {
            let mut state = self.state.lock();
            state.current_window = None;
            state.tail.take()
        };
        if let Some(tail) = previous {
            self.teardown_tail(tail).await;
        }

        let pipe_path = {
            let mut state = self.state.lock();
            state.seq += 1;
            std::env::temp_dir().join(format!(
                "agentboard-{}-{}.pipe",
                self.connection_id, state.seq
            ))
        };
        if let Err(e) = std::fs::write(&pipe_path, b"") {
            return Err(TerminalProxyError::new(
                ProxyErrorCode::PipeFailed,
                format!("cannot create pipe file: {}", e),
                true,
            ));
        }

        let pipe_command = format!("cat >> '{}'", pipe_path.display());
        if let Err(e) = self.tmux.pipe_pane(target, Some(&pipe_command)).await {
            let _ = std::fs::remove_file(&pipe_path);
            return Err(TerminalProxyError::new(
                ProxyErrorCode::SwitchFailed,
                format!("pipe-pane failed: {}", e),
                true,
            ));
        }

        let mut child = match tokio::process::Command::new("tail")
            .args(["-f", "-c", "+1"])
            .arg(&pipe_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let _ = self.tmux.pipe_pane(target, None).await;
                let _ = std::fs::remove_file(&pipe_path);
                return Err(TerminalProxyError::new(
                    ProxyErrorCode::PipeFailed,
                    format!("tail spawn failed: {}", e),
                    false,
                ));
            }
        };

        let reader = spawn_reader(child.stdout.take(), self.output_tx.clone());

        let mut state = self.state.lock();
        state.current_window = Some(target.to_string());
        state.tail = Some(Tail {
            window: target.to_string(),
            pipe_path,
            child,
            reader,
        });
        tracing::debug!(
            connection_id = %self.connection_id,
            target,
            "terminal proxy attached"
        );
        Ok(true)
    }

    /// Send input: literal chunks, with an Enter for each newline.
    ///
    /// Silently a no-op while no window is attached.
    pub async fn write(&self, data: &str) -> Result<(), TerminalProxyError> {
        let Some(window) = self.current_window() else {
            return Ok(());
        };

        let parts: Vec<&str> = data.split('\n').collect();
        let last = parts.len() - 1;
        for (i, part) in parts.iter().enumerate() {
            if !part.is_empty() {
                self.map_write_error(self.tmux.send_literal(&window, part).await)?;
            }
            if i < last {
                self.map_write_error(self.tmux.send_enter(&window).await)?;
            }
        }
        Ok(())
    }

    fn map_write_error(&self, result: Result<(), TmuxError>) -> Result<(), TerminalProxyError> {
        match result {
            Ok(()) => Ok(()),
            Err(TmuxError::NotFound(window)) => {
                self.state.lock().current_window = None;
                Err(TerminalProxyError::new(
                    ProxyErrorCode::InvalidWindow,
                    format!("window gone: {}", window),
                    true,
                ))
            }
            Err(e) => Err(TerminalProxyError::new(
                ProxyErrorCode::WriteFailed,
                e.to_string(),
                false,
            )),
        }
    }

    /// Forwarded only while a window is attached.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalProxyError> {
        let Some(window) = self.current_window() else {
            return Ok(());
        };
        self.tmux
            .resize_pane(&window, cols, rows)
            .await
            .map_err(|e| {
                TerminalProxyError::new(ProxyErrorCode::ResizeFailed, e.to_string(), true)
            })
    }

    /// Kill the tail and forget the window.
    pub async fn dispose(&self) {
        let tail = {
            let mut state = self.state.lock();
            state.current_window = None;
            state.tail.take()
        };
        if let Some(tail) = tail {
            self.teardown_tail(tail).await;
        }
    }

    /// Periodic liveness probe; clears the window when it disappears.
    ///
    /// The task stops when the proxy is dropped.
    pub fn spawn_liveness(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(proxy) = weak.upgrade() else {
                    return;
                };
                let Some(window) = proxy.current_window() else {
                    continue;
                };
                if proxy.tmux.list_panes(&window).await.is_err() {
                    tracing::debug!(window, "attached window disappeared");
                    proxy.dispose().await;
                }
            }
        })
    }

    async fn teardown_tail(&self, mut tail: Tail) {
        let _ = self.tmux.pipe_pane(&tail.window, None).await;
        let _ = tail.child.kill().await;
        tail.reader.abort();
        let _ = std::fs::remove_file(&tail.pipe_path);
    }
}

/// Forward the tail child's stdout to the connection in chunks.
fn spawn_reader(
    stdout: Option<tokio::process::ChildStdout>,
    output_tx: mpsc::Sender<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut stdout) = stdout else { return };
        let mut buf = vec![0u8; 8192];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if output_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
