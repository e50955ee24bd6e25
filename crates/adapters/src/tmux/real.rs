// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tmux adapter backed by the real `tmux` binary.

use super::{parse_window_line, TmuxClient, TmuxError};
use crate::subprocess::{run_with_timeout, TMUX_TIMEOUT};
use ab_core::WindowSnapshot;
use async_trait::async_trait;
use tokio::process::Command;

/// Tmux-backed client. Arguments are always passed as vectors, never a
/// shell string; stdout is decoded lossily.
#[derive(Clone, Copy, Default)]
pub struct TmuxAdapter;

impl TmuxAdapter {
    pub fn new() -> Self {
        Self
    }
}

async fn tmux(args: &[&str], description: &str) -> Result<std::process::Output, TmuxError> {
    let mut cmd = Command::new("tmux");
    cmd.args(args);
    run_with_timeout(cmd, TMUX_TIMEOUT, description)
        .await
        .map_err(TmuxError::CommandFailed)
}

/// Run tmux, mapping a non-zero exit to `NotFound` for the given target.
async fn tmux_on_target(
    args: &[&str],
    target: &str,
    description: &str,
) -> Result<std::process::Output, TmuxError> {
    let output = tmux(args, description).await?;
    if !output.status.success() {
        return Err(TmuxError::NotFound(target.to_string()));
    }
    Ok(output)
}

#[async_trait]
impl TmuxClient for TmuxAdapter {
    async fn capture_scrollback(
        &self,
        target: &str,
        lines: u32,
        with_ansi: bool,
    ) -> Result<String, TmuxError> {
        let from = format!("-{}", lines);
        let mut args = vec!["capture-pane", "-t", target, "-p", "-J", "-S", from.as_str()];
        if with_ansi {
            args.push("-e");
        }
        let output = tmux_on_target(&args, target, "tmux capture-pane").await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowSnapshot>, TmuxError> {
        let format = "#{session_name}:#{window_id}\t#{window_name}\t#{pane_current_path}\t#{window_activity}";
        let output = tmux(
            &["list-windows", "-t", session, "-F", format],
            "tmux list-windows",
        )
        .await?;
        if !output.status.success() {
            // No such session: an empty fleet, not an error
            return Ok(Vec::new());
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().filter_map(parse_window_line).collect())
    }

    async fn list_panes(&self, target: &str) -> Result<Vec<String>, TmuxError> {
        let output = tmux_on_target(
            &["list-panes", "-t", target, "-F", "#{pane_id}"],
            target,
            "tmux list-panes",
        )
        .await?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().map(|l| l.trim().to_string()).collect())
    }

    async fn send_literal(&self, target: &str, text: &str) -> Result<(), TmuxError> {
        // -l = literal mode (no key name interpretation)
        // -- = end of options (handles text starting with -)
        tmux_on_target(
            &["send-keys", "-t", target, "-l", "--", text],
            target,
            "tmux send-keys",
        )
        .await?;
        Ok(())
    }

    async fn send_enter(&self, target: &str) -> Result<(), TmuxError> {
        tmux_on_target(
            &["send-keys", "-t", target, "Enter"],
            target,
            "tmux send-keys",
        )
        .await?;
        Ok(())
    }

    async fn cancel_copy_mode(&self, target: &str) -> Result<(), TmuxError> {
        let output = tmux(
            &["send-keys", "-t", target, "-X", "cancel"],
            "tmux send-keys -X cancel",
        )
        .await?;
        // Fails when the pane is not in copy-mode; that is the desired state
        if !output.status.success() {
            tracing::debug!(target, "cancel-copy-mode on pane not in copy-mode");
        }
        Ok(())
    }

    async fn resize_pane(&self, target: &str, cols: u16, rows: u16) -> Result<(), TmuxError> {
        let x = cols.to_string();
        let y = rows.to_string();
        tmux_on_target(
            &["resize-pane", "-t", target, "-x", x.as_str(), "-y", y.as_str()],
            target,
            "tmux resize-pane",
        )
        .await?;
        Ok(())
    }

    async fn ensure_session(&self, session: &str) -> Result<(), TmuxError> {
        let check = tmux(&["has-session", "-t", session], "tmux has-session").await?;
        if check.status.success() {
            return Ok(());
        }
        let output = tmux(
            &["new-session", "-d", "-s", session],
            "tmux new-session",
        )
        .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TmuxError::SpawnFailed(stderr.into_owned()));
        }
        Ok(())
    }

    async fn new_window(
        &self,
        session: &str,
        name: &str,
        cwd: Option<&str>,
        command: Option<&str>,
    ) -> Result<String, TmuxError> {
        self.ensure_session(session).await?;

        let target = format!("{}:", session);
        let mut args = vec![
            "new-window",
            "-t",
            target.as_str(),
            "-n",
            name,
            "-P",
            "-F",
            "#{session_name}:#{window_id}",
        ];
        if let Some(cwd) = cwd {
            args.push("-c");
            args.push(cwd);
        }
        if let Some(command) = command {
            args.push(command);
        }

        let output = tmux(&args, "tmux new-window").await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(session, name, stderr = %stderr, "tmux new-window failed");
            return Err(TmuxError::SpawnFailed(stderr.into_owned()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn kill_window(&self, target: &str) -> Result<(), TmuxError> {
        tmux_on_target(
            &["kill-window", "-t", target],
            target,
            "tmux kill-window",
        )
        .await?;
        Ok(())
    }

    async fn rename_window(&self, target: &str, name: &str) -> Result<(), TmuxError> {
        tmux_on_target(
            &["rename-window", "-t", target, name],
            target,
            "tmux rename-window",
        )
        .await?;
        Ok(())
    }

    async fn pipe_pane(&self, target: &str, command: Option<&str>) -> Result<(), TmuxError> {
        let mut args = vec!["pipe-pane", "-t", target];
        if let Some(command) = command {
            args.push("-o");
            args.push(command);
        }
        tmux_on_target(&args, target, "tmux pipe-pane").await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "real_tests.rs"]
mod tests;
