// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration from the environment.

use ab_adapters::env::expand_tilde;
use std::path::PathBuf;

/// Default listen port.
const DEFAULT_PORT: u16 = 3030;

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Listen port (`PORT`), bound on 127.0.0.1.
    pub port: u16,
    /// Tmux session hosting the fleet (`TMUX_SESSION`).
    pub tmux_session: String,
    /// Database file (`AGENTBOARD_DB_PATH`).
    pub db_path: PathBuf,
    /// Daemon log file, next to the database.
    pub log_path: PathBuf,
    /// Whether `session-kill` may target external windows
    /// (`ALLOW_KILL_EXTERNAL`).
    pub allow_kill_external: bool,
}

impl Config {
    pub fn load() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let tmux_session = std::env::var("TMUX_SESSION")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "agentboard".to_string());

        let db_path = match std::env::var("AGENTBOARD_DB_PATH") {
            Ok(p) if !p.is_empty() => expand_tilde(&p),
            _ => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".agentboard")
                .join("agentboard.db"),
        };

        let log_path = db_path
            .parent()
            .map(|d| d.join("daemon.log"))
            .unwrap_or_else(|| PathBuf::from("daemon.log"));

        let allow_kill_external = std::env::var("ALLOW_KILL_EXTERNAL")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            port,
            tmux_session,
            db_path,
            log_path,
            allow_kill_external,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
