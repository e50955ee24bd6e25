// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agentboard daemon (agentboardd)
//!
//! Correlates agent JSONL logs with tmux windows and serves the session
//! registry and terminal streams to clients over the wire protocol.
//!
//! Architecture:
//! - Gateway: spawned task per client connection, socket I/O only
//! - Poller: timer-driven scan+match cycles, reconciled into the database
//! - Match worker: isolated task doing the heavy log/scrollback work

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;

use ab_adapters::{LogRoots, LogStore, RipgrepAdapter, TmuxAdapter};
use ab_daemon::{Config, Gateway, GatewayCtx};
use ab_engine::{CaptureLock, LogMatcher, LogPoller, MatchWorker, PollerConfig, SessionRegistry};
use ab_storage::SessionDatabase;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before touching config or state
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("agentboardd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("agentboardd {}", env!("CARGO_PKG_VERSION"));
                println!("Agentboard daemon - correlates AI-agent logs with tmux windows");
                println!();
                println!("USAGE:");
                println!("    agentboardd");
                println!();
                println!("Configuration is environment-driven: PORT, TMUX_SESSION,");
                println!("REFRESH_INTERVAL_MS, CLAUDE_CONFIG_DIR, CODEX_HOME, PI_HOME,");
                println!("AGENTBOARD_DB_PATH, ALLOW_KILL_EXTERNAL, CLAUDE_RESUME_CMD,");
                println!("CODEX_RESUME_CMD.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: agentboardd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load();

    rotate_log_if_needed(&config.log_path);
    let _log_guard = setup_logging(&config);

    info!(
        port = config.port,
        tmux_session = %config.tmux_session,
        db = %config.db_path.display(),
        "starting agentboard daemon"
    );

    let tmux = TmuxAdapter::new();
    let grep = RipgrepAdapter::new();
    let store = LogStore::new(LogRoots::from_env());
    let db = Arc::new(SessionDatabase::open(&config.db_path)?);
    let registry = Arc::new(SessionRegistry::new());
    let capture_lock = Arc::new(CaptureLock::new());

    let matcher = LogMatcher::new(tmux, grep, store.clone());
    let worker = MatchWorker::spawn(store.clone(), matcher);

    let poller_config = PollerConfig {
        tmux_session: config.tmux_session.clone(),
        ..Default::default()
    };
    let poller = Arc::new(LogPoller::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        worker.clone(),
        tmux,
        store,
        Arc::clone(&capture_lock),
        poller_config,
    ));
    tokio::spawn(Arc::clone(&poller).run());

    let listener = TcpListener::bind(("127.0.0.1", config.port)).await?;
    info!("listening on 127.0.0.1:{}", config.port);

    let ctx = Arc::new(GatewayCtx::new(tmux, db, registry, capture_lock, config));
    let gateway = Gateway::new(listener, ctx);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = gateway.run() => {}
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
        }
    }

    worker.dispose();
    info!("daemon stopped");
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (daemon.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `daemon.log` → `daemon.log.1` → `daemon.log.2` → `daemon.log.3`,
/// deleting the oldest. Best-effort: rotation failures are silently
/// ignored so the daemon still starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();

    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Set up tracing to a non-blocking file appender, falling back to
/// stderr when the log directory cannot be created.
fn setup_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = config
        .log_path
        .parent()
        .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        .zip(config.log_path.file_name());

    match file_layer {
        Some((dir, file_name)) => {
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
    }
}
