// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the adapters crate.

use std::path::PathBuf;

/// Expand a leading `~` or `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn path_var(var: &str, default_under_home: &str) -> PathBuf {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => expand_tilde(&v),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(default_under_home),
    }
}

/// Claude configuration directory (default: `~/.claude`).
///
/// Logs live under `<dir>/projects/`.
pub fn claude_config_dir() -> PathBuf {
    path_var("CLAUDE_CONFIG_DIR", ".claude")
}

/// Codex home directory (default: `~/.codex`). Logs live under `<dir>/sessions/`.
pub fn codex_home() -> PathBuf {
    path_var("CODEX_HOME", ".codex")
}

/// Pi home directory (default: `~/.pi`). Logs live under `<dir>/agent/sessions/`.
pub fn pi_home() -> PathBuf {
    path_var("PI_HOME", ".pi")
}

/// Ripgrep thread count override (`AGENTBOARD_RG_THREADS`).
pub fn rg_threads() -> Option<usize> {
    std::env::var("AGENTBOARD_RG_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
