// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway: the session-oriented wire dispatcher.
//!
//! Accepts TCP connections and handles each in its own task without
//! blocking the poller. Per connection: an outbound queue drained by a
//! writer task (per-connection message order is preserved end-to-end),
//! a registry subscription relayed as events, and a lazily constructed
//! terminal proxy whose output is filtered by the currently attached
//! session.

use crate::config::Config;
use crate::protocol::{
    self, parse_client_message, ClientMessage, ProtocolError, ServerMessage,
};
use crate::terminal::TerminalProxy;
use ab_adapters::TmuxClient;
use ab_core::{RegistryEvent, Session, SessionSource, SessionStatus};
use ab_engine::{CaptureLock, SessionRegistry};
use ab_storage::SessionDatabase;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Outbound queue depth per connection.
const OUTBOUND_CAPACITY: usize = 256;

/// Liveness probe period for attached terminals.
const LIVENESS_PERIOD: Duration = Duration::from_secs(5);

/// Shared daemon context for all connections.
pub struct GatewayCtx<T: TmuxClient> {
    pub tmux: T,
    pub db: Arc<SessionDatabase>,
    pub registry: Arc<SessionRegistry>,
    pub capture_lock: Arc<CaptureLock>,
    pub config: Config,
    /// Fan-out for messages every client should see (kill failures,
    /// rename errors).
    broadcast: tokio::sync::broadcast::Sender<ServerMessage>,
}

impl<T: TmuxClient> GatewayCtx<T> {
    pub fn new(
        tmux: T,
        db: Arc<SessionDatabase>,
        registry: Arc<SessionRegistry>,
        capture_lock: Arc<CaptureLock>,
        config: Config,
    ) -> Self {
        let (broadcast, _) = tokio::sync::broadcast::channel(OUTBOUND_CAPACITY);
        Self {
            tmux,
            db,
            registry,
            capture_lock,
            config,
            broadcast,
        }
    }

    fn broadcast_message(&self, message: ServerMessage) {
        let _ = self.broadcast.send(message);
    }
}

/// Accept loop over the wire protocol listener.
pub struct Gateway<T: TmuxClient> {
    listener: TcpListener,
    ctx: Arc<GatewayCtx<T>>,
}

impl<T: TmuxClient> Gateway<T> {
    pub fn new(listener: TcpListener, ctx: Arc<GatewayCtx<T>>) -> Self {
        Self { listener, ctx }
    }

    /// Run until the process exits, spawning a task per connection.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "client connected");
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, ctx).await {
                            match e {
                                ProtocolError::ConnectionClosed => debug!("client disconnected"),
                                _ => warn!(error = %e, "connection error"),
                            }
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
    }
}

/// Per-connection mutable state.
struct Connection<T: TmuxClient> {
    id: String,
    ctx: Arc<GatewayCtx<T>>,
    out_tx: mpsc::Sender<ServerMessage>,
    proxy: Mutex<Option<Arc<TerminalProxy<T>>>>,
    current_session_id: Arc<Mutex<Option<String>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

async fn handle_connection<T: TmuxClient>(
    stream: TcpStream,
    ctx: Arc<GatewayCtx<T>>,
) -> Result<(), ProtocolError> {
    let (mut reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    let writer_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if protocol::write_server_message(&mut writer, &message)
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let conn = Connection {
        id: uuid::Uuid::new_v4().to_string(),
        ctx: Arc::clone(&ctx),
        out_tx: out_tx.clone(),
        proxy: Mutex::new(None),
        current_session_id: Arc::new(Mutex::new(None)),
        tasks: Mutex::new(Vec::new()),
    };

    // Initial snapshots, then relayed registry events
    conn.send(ServerMessage::Sessions {
        sessions: ctx.registry.sessions(),
    })
    .await;
    let records = ctx
        .db
        .list_all()
        .map(|rs| rs.into_iter().filter(|r| !r.is_codex_exec).collect())
        .unwrap_or_default();
    conn.send(ServerMessage::AgentSessions { sessions: records })
        .await;

    {
        let mut events = ctx.registry.subscribe();
        let out_tx = out_tx.clone();
        conn.tasks.lock().push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(message) = registry_event_message(event) else {
                            continue;
                        };
                        if out_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "slow client skipped registry events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    {
        let mut messages = ctx.broadcast.subscribe();
        let out_tx = out_tx.clone();
        conn.tasks.lock().push(tokio::spawn(async move {
            loop {
                match messages.recv().await {
                    Ok(message) => {
                        if out_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    let result = read_loop(&mut reader, &conn).await;

    // Teardown: stop the tail, drop pending output
    let proxy = conn.proxy.lock().clone();
    if let Some(proxy) = proxy {
        proxy.dispose().await;
    }
    for task in conn.tasks.lock().drain(..) {
        task.abort();
    }
    drop(out_tx);
    writer_task.abort();

    result
}

async fn read_loop<T: TmuxClient>(
    reader: &mut (impl tokio::io::AsyncReadExt + Unpin),
    conn: &Connection<T>,
) -> Result<(), ProtocolError> {
    loop {
        let bytes = protocol::read_message(reader).await?;
        match parse_client_message(&bytes) {
            Err(reply) => conn.send(reply).await,
            Ok(message) => conn.dispatch(message).await,
        }
    }
}

/// Map a registry event onto the wire; activation is internal only (the
/// agent-sessions snapshot carries the result).
fn registry_event_message(event: RegistryEvent) -> Option<ServerMessage> {
    match event {
        RegistryEvent::Sessions(sessions) => Some(ServerMessage::Sessions { sessions }),
        RegistryEvent::SessionUpdate(session) => Some(ServerMessage::SessionUpdate { session }),
        RegistryEvent::SessionCreated(session) => Some(ServerMessage::SessionCreated { session }),
        RegistryEvent::SessionRemoved { id } => {
            Some(ServerMessage::SessionRemoved { session_id: id })
        }
        RegistryEvent::AgentSessions(sessions) => {
            Some(ServerMessage::AgentSessions { sessions })
        }
        RegistryEvent::SessionActivated { .. } => None,
    }
}

impl<T: TmuxClient> Connection<T> {
    async fn send(&self, message: ServerMessage) {
        if self.out_tx.send(message).await.is_err() {
            debug!(connection_id = %self.id, "outbound queue closed");
        }
    }

    async fn dispatch(&self, message: ClientMessage) {
        match message {
            ClientMessage::TerminalAttach {
                session_id,
                tmux_target,
                cols,
                rows,
            } => self.terminal_attach(session_id, tmux_target, cols, rows).await,
            ClientMessage::TerminalInput { session_id, data } => {
                self.terminal_input(session_id, data).await
            }
            ClientMessage::TerminalResize {
                session_id,
                cols,
                rows,
            } => self.terminal_resize(session_id, cols, rows).await,
            ClientMessage::TerminalDetach { session_id } => self.terminal_detach(session_id),
            ClientMessage::TmuxCancelCopyMode { session_id } => {
                self.cancel_copy_mode(session_id).await
            }
            ClientMessage::SessionCreate {
                project_path,
                name,
                command,
            } => self.session_create(project_path, name, command).await,
            ClientMessage::SessionKill { session_id } => self.session_kill(session_id).await,
            ClientMessage::SessionRename {
                session_id,
                new_name,
            } => self.session_rename(session_id, new_name).await,
            ClientMessage::SessionRefresh => self.session_refresh().await,
            ClientMessage::SessionPin {
                session_id,
                is_pinned,
            } => self.session_pin(session_id, is_pinned).await,
        }
    }

    /// Lazily build the proxy bound to this connection, with its output
    /// task and liveness probe.
    fn ensure_proxy(&self) -> Arc<TerminalProxy<T>> {
        if let Some(proxy) = self.proxy.lock().clone() {
            return proxy;
        }
        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let proxy = Arc::new(TerminalProxy::new(self.ctx.tmux.clone(), &self.id, tx));

        let out_tx = self.out_tx.clone();
        let current = Arc::clone(&self.current_session_id);
        self.tasks.lock().push(tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                let Some(session_id) = current.lock().clone() else {
                    // Detached: pending output is dropped
                    continue;
                };
                if out_tx
                    .send(ServerMessage::TerminalOutput { session_id, data })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
        self.tasks
            .lock()
            .push(proxy.spawn_liveness(LIVENESS_PERIOD));

        *self.proxy.lock() = Some(Arc::clone(&proxy));
        proxy
    }

    async fn terminal_attach(
        &self,
        session_id: String,
        tmux_target: String,
        cols: u16,
        rows: u16,
    ) {
        if self.ctx.registry.get(&session_id).is_none() {
            self.send(ServerMessage::TerminalError {
                session_id,
                code: "ERR_INVALID_WINDOW".to_string(),
                message: "unknown session".to_string(),
                retryable: false,
            })
            .await;
            return;
        }

        let proxy = self.ensure_proxy();
        match proxy.switch_to(&tmux_target).await {
            Ok(true) => {
                if let Err(e) = proxy.resize(cols, rows).await {
                    debug!(error = %e, "initial resize failed");
                }
                *self.current_session_id.lock() = Some(session_id.clone());
                self.send(ServerMessage::TerminalReady { session_id }).await;
            }
            Ok(false) => {
                self.send(ServerMessage::TerminalError {
                    session_id,
                    code: "ERR_INVALID_WINDOW".to_string(),
                    message: format!("window not found: {}", tmux_target),
                    retryable: false,
                })
                .await;
            }
            Err(e) => {
                self.send(ServerMessage::TerminalError {
                    session_id,
                    code: e.code.as_str().to_string(),
                    message: e.message,
                    retryable: e.retryable,
                })
                .await;
            }
        }
    }

    async fn terminal_input(&self, session_id: String, data: String) {
        if self.current_session_id.lock().as_deref() != Some(session_id.as_str()) {
            return;
        }
        let Some(proxy) = self.proxy.lock().clone() else {
            return;
        };

        // A submitted line locks last_user_message against stale logs
        if data.ends_with('\n') {
            if let Some(window) = proxy.current_window() {
                let text = data.trim_end_matches('\n').trim();
                if !text.is_empty() {
                    self.ctx.capture_lock.record(&window, text);
                }
            }
        }

        if let Err(e) = proxy.write(&data).await {
            self.send(ServerMessage::TerminalError {
                session_id,
                code: e.code.as_str().to_string(),
                message: e.message,
                retryable: e.retryable,
            })
            .await;
        }
    }

    async fn terminal_resize(&self, session_id: String, cols: u16, rows: u16) {
        let Some(proxy) = self.proxy.lock().clone() else {
            return;
        };
        if let Err(e) = proxy.resize(cols, rows).await {
            self.send(ServerMessage::TerminalError {
                session_id,
                code: e.code.as_str().to_string(),
                message: e.message,
                retryable: e.retryable,
            })
            .await;
        }
    }

    fn terminal_detach(&self, session_id: String) {
        let mut current = self.current_session_id.lock();
        if current.as_deref() == Some(session_id.as_str()) {
            *current = None;
        }
        // The proxy stays warm for the next attach
    }

    async fn cancel_copy_mode(&self, session_id: String) {
        let target = self
            .proxy
            .lock()
            .clone()
            .and_then(|p| p.current_window())
            .unwrap_or(session_id);
        if let Err(e) = self.ctx.tmux.cancel_copy_mode(&target).await {
            debug!(error = %e, target, "cancel copy-mode failed");
        }
    }

    async fn session_create(
        &self,
        project_path: String,
        name: Option<String>,
        command: Option<String>,
    ) {
        let name = name
            .filter(|n| !n.is_empty())
            .or_else(|| {
                project_path
                    .rsplit('/')
                    .find(|s| !s.is_empty())
                    .map(String::from)
            })
            .unwrap_or_else(|| "session".to_string());
        let cwd = if project_path.is_empty() {
            None
        } else {
            Some(project_path.as_str())
        };

        match self
            .ctx
            .tmux
            .new_window(
                &self.ctx.config.tmux_session,
                &name,
                cwd,
                command.as_deref(),
            )
            .await
        {
            Ok(target) => {
                let now = Utc::now();
                let session = Session {
                    id: target.clone(),
                    name,
                    tmux_window: target,
                    project_path,
                    status: SessionStatus::Unknown,
                    last_activity: now,
                    created_at: now,
                    source: SessionSource::Managed,
                    agent_type: None,
                    agent_session_id: None,
                };
                self.ctx.registry.insert_created(session);
            }
            Err(e) => {
                self.send(ServerMessage::error(format!("session create failed: {}", e)))
                    .await;
            }
        }
    }

    async fn session_kill(&self, session_id: String) {
        let Some(session) = self.ctx.registry.get(&session_id) else {
            self.send(ServerMessage::error(format!(
                "unknown session: {}",
                session_id
            )))
            .await;
            return;
        };

        if session.source == SessionSource::External && !self.ctx.config.allow_kill_external {
            self.ctx.broadcast_message(ServerMessage::KillFailed {
                session_id,
                message: "refusing to kill external session".to_string(),
            });
            return;
        }

        if let Err(e) = self.ctx.tmux.kill_window(&session.tmux_window).await {
            self.ctx.broadcast_message(ServerMessage::KillFailed {
                session_id,
                message: e.to_string(),
            });
            return;
        }

        // Drop it from the registry now rather than waiting for a poll
        let remaining: Vec<Session> = self
            .ctx
            .registry
            .sessions()
            .into_iter()
            .filter(|s| s.tmux_window != session.tmux_window)
            .collect();
        self.ctx.registry.replace_sessions(remaining);
    }

    async fn session_rename(&self, session_id: String, new_name: String) {
        let Some(session) = self.ctx.registry.get(&session_id) else {
            self.send(ServerMessage::error(format!(
                "unknown session: {}",
                session_id
            )))
            .await;
            return;
        };
        match self
            .ctx
            .tmux
            .rename_window(&session.tmux_window, &new_name)
            .await
        {
            Ok(()) => {
                self.ctx.registry.update_session(
                    &session.tmux_window,
                    ab_engine::SessionPatch {
                        name: Some(new_name),
                        ..Default::default()
                    },
                );
            }
            Err(e) => {
                self.ctx
                    .broadcast_message(ServerMessage::error(format!("rename failed: {}", e)));
            }
        }
    }

    /// Re-enumerate windows immediately; statuses refresh on the next
    /// poll.
    async fn session_refresh(&self) {
        let windows = match self
            .ctx
            .tmux
            .list_windows(&self.ctx.config.tmux_session)
            .await
        {
            Ok(w) => w,
            Err(e) => {
                self.send(ServerMessage::error(format!("refresh failed: {}", e)))
                    .await;
                return;
            }
        };

        let now = Utc::now();
        let list: Vec<Session> = windows
            .into_iter()
            .map(|w| match self.ctx.registry.get(&w.tmux_window) {
                Some(mut existing) => {
                    existing.name = w.name;
                    existing.project_path = w.pane_current_path;
                    existing
                }
                None => Session {
                    id: w.tmux_window.clone(),
                    name: w.name.clone(),
                    tmux_window: w.tmux_window.clone(),
                    project_path: w.pane_current_path.clone(),
                    status: SessionStatus::Unknown,
                    last_activity: w.activity_time().unwrap_or(now),
                    created_at: now,
                    source: SessionSource::External,
                    agent_type: None,
                    agent_session_id: None,
                },
            })
            .collect();
        self.ctx.registry.replace_sessions(list);
    }

    async fn session_pin(&self, session_id: String, is_pinned: bool) {
        let ok = match self.ctx.db.set_pinned(&session_id, is_pinned) {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, session_id, "pin update failed");
                false
            }
        };
        self.send(ServerMessage::SessionPinResult { ok, session_id })
            .await;
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
