// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::protocol::{encode, read_message, write_message};
use ab_adapters::{FakeTmuxAdapter, TmuxCall};
use ab_core::AgentSessionRecord;
use tokio::net::TcpStream;

struct Harness {
    tmux: FakeTmuxAdapter,
    db: Arc<SessionDatabase>,
    registry: Arc<SessionRegistry>,
    capture_lock: Arc<CaptureLock>,
    port: u16,
}

async fn harness(allow_kill_external: bool) -> Harness {
    let tmux = FakeTmuxAdapter::new();
    let db = Arc::new(SessionDatabase::open_in_memory().unwrap());
    let registry = Arc::new(SessionRegistry::new());
    let capture_lock = Arc::new(CaptureLock::new());

    let config = Config {
        port: 0,
        tmux_session: "agentboard".to_string(),
        db_path: std::path::PathBuf::from(":memory:"),
        log_path: std::path::PathBuf::from("/tmp/agentboard-test.log"),
        allow_kill_external,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let ctx = Arc::new(GatewayCtx::new(
        tmux.clone(),
        Arc::clone(&db),
        Arc::clone(&registry),
        Arc::clone(&capture_lock),
        config,
    ));
    tokio::spawn(Gateway::new(listener, ctx).run());

    Harness {
        tmux,
        db,
        registry,
        capture_lock,
        port,
    }
}

fn live_session(window: &str, name: &str, source: SessionSource) -> Session {
    let now = Utc::now();
    Session {
        id: window.to_string(),
        name: name.to_string(),
        tmux_window: window.to_string(),
        project_path: "/tmp/p".to_string(),
        status: SessionStatus::Waiting,
        last_activity: now,
        created_at: now,
        source,
        agent_type: None,
        agent_session_id: None,
    }
}

async fn connect(h: &Harness) -> TcpStream {
    TcpStream::connect(("127.0.0.1", h.port)).await.unwrap()
}

async fn send_raw(stream: &mut TcpStream, bytes: &[u8]) {
    write_message(stream, bytes).await.unwrap();
}

async fn send(stream: &mut TcpStream, message: &ClientMessage) {
    let bytes = encode(message).unwrap();
    send_raw(stream, &bytes).await;
}

async fn recv(stream: &mut TcpStream) -> ServerMessage {
    let bytes = tokio::time::timeout(Duration::from_secs(3), read_message(stream))
        .await
        .expect("timed out waiting for server message")
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Receive until a message satisfies the predicate, skipping others.
async fn recv_until(
    stream: &mut TcpStream,
    mut pred: impl FnMut(&ServerMessage) -> bool,
) -> ServerMessage {
    for _ in 0..20 {
        let message = recv(stream).await;
        if pred(&message) {
            return message;
        }
    }
    panic!("expected message never arrived");
}

/// Consume the initial sessions + agent-sessions snapshots.
async fn skip_snapshots(stream: &mut TcpStream) {
    let first = recv(stream).await;
    assert!(matches!(first, ServerMessage::Sessions { .. }));
    let second = recv(stream).await;
    assert!(matches!(second, ServerMessage::AgentSessions { .. }));
}

#[tokio::test]
async fn connection_opens_with_snapshots() {
    let h = harness(false).await;
    h.registry
        .replace_sessions(vec![live_session("agentboard:@1", "one", SessionSource::External)]);

    let mut stream = connect(&h).await;
    let first = recv(&mut stream).await;
    match first {
        ServerMessage::Sessions { sessions } => {
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0].tmux_window, "agentboard:@1");
        }
        other => panic!("expected sessions snapshot, got {:?}", other),
    }
    assert!(matches!(
        recv(&mut stream).await,
        ServerMessage::AgentSessions { .. }
    ));
}

#[tokio::test]
async fn unknown_and_malformed_messages_get_error_replies() {
    let h = harness(false).await;
    let mut stream = connect(&h).await;
    skip_snapshots(&mut stream).await;

    send_raw(&mut stream, br#"{"type":"make-coffee"}"#).await;
    assert_eq!(
        recv(&mut stream).await,
        ServerMessage::error("Unknown message type")
    );

    send_raw(&mut stream, b"{definitely not json").await;
    assert_eq!(
        recv(&mut stream).await,
        ServerMessage::error("Invalid message payload")
    );
}

#[tokio::test]
async fn attach_input_detach_flow() {
    let h = harness(false).await;
    h.tmux.add_window("agentboard:@1", "one", "/tmp/p");
    h.registry
        .replace_sessions(vec![live_session("agentboard:@1", "one", SessionSource::External)]);

    let mut stream = connect(&h).await;
    skip_snapshots(&mut stream).await;

    send(
        &mut stream,
        &ClientMessage::TerminalAttach {
            session_id: "agentboard:@1".to_string(),
            tmux_target: "agentboard:@1".to_string(),
            cols: 80,
            rows: 24,
        },
    )
    .await;
    let ready = recv_until(&mut stream, |m| {
        matches!(m, ServerMessage::TerminalReady { .. })
    })
    .await;
    assert_eq!(
        ready,
        ServerMessage::TerminalReady {
            session_id: "agentboard:@1".to_string()
        }
    );

    send(
        &mut stream,
        &ClientMessage::TerminalInput {
            session_id: "agentboard:@1".to_string(),
            data: "echo hi\n".to_string(),
        },
    )
    .await;

    // Wait for the input to reach the fake adapter
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if h.tmux
                .calls()
                .iter()
                .any(|c| matches!(c, TmuxCall::SendLiteral { text, .. } if text == "echo hi"))
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // The Enter-terminated input armed the capture lock
    assert!(h.capture_lock.is_locked("agentboard:@1"));
    assert_eq!(
        h.capture_lock.captured_text("agentboard:@1").as_deref(),
        Some("echo hi")
    );

    // Detached input is ignored
    send(
        &mut stream,
        &ClientMessage::TerminalDetach {
            session_id: "agentboard:@1".to_string(),
        },
    )
    .await;
    send(
        &mut stream,
        &ClientMessage::TerminalInput {
            session_id: "agentboard:@1".to_string(),
            data: "ignored\n".to_string(),
        },
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h
        .tmux
        .calls()
        .iter()
        .any(|c| matches!(c, TmuxCall::SendLiteral { text, .. } if text == "ignored")));
}

#[tokio::test]
async fn attach_to_unknown_session_errors() {
    let h = harness(false).await;
    let mut stream = connect(&h).await;
    skip_snapshots(&mut stream).await;

    send(
        &mut stream,
        &ClientMessage::TerminalAttach {
            session_id: "agentboard:@9".to_string(),
            tmux_target: "agentboard:@9".to_string(),
            cols: 80,
            rows: 24,
        },
    )
    .await;
    let reply = recv_until(&mut stream, |m| {
        matches!(m, ServerMessage::TerminalError { .. })
    })
    .await;
    assert!(matches!(
        reply,
        ServerMessage::TerminalError { code, .. } if code == "ERR_INVALID_WINDOW"
    ));
}

#[tokio::test]
async fn attach_to_missing_window_errors() {
    let h = harness(false).await;
    // Session known to the registry, but the tmux window is gone
    h.registry
        .replace_sessions(vec![live_session("agentboard:@1", "one", SessionSource::External)]);

    let mut stream = connect(&h).await;
    skip_snapshots(&mut stream).await;

    send(
        &mut stream,
        &ClientMessage::TerminalAttach {
            session_id: "agentboard:@1".to_string(),
            tmux_target: "agentboard:@1".to_string(),
            cols: 80,
            rows: 24,
        },
    )
    .await;
    let reply = recv_until(&mut stream, |m| {
        matches!(m, ServerMessage::TerminalError { .. })
    })
    .await;
    assert!(matches!(
        reply,
        ServerMessage::TerminalError { code, retryable: false, .. }
            if code == "ERR_INVALID_WINDOW"
    ));
}

#[tokio::test]
async fn session_create_broadcasts_managed_session() {
    let h = harness(false).await;
    let mut stream = connect(&h).await;
    skip_snapshots(&mut stream).await;

    send(
        &mut stream,
        &ClientMessage::SessionCreate {
            project_path: "/tmp/newproj".to_string(),
            name: None,
            command: Some("claude".to_string()),
        },
    )
    .await;

    let created = recv_until(&mut stream, |m| {
        matches!(m, ServerMessage::SessionCreated { .. })
    })
    .await;
    let ServerMessage::SessionCreated { session } = created else {
        unreachable!()
    };
    assert_eq!(session.name, "newproj");
    assert_eq!(session.source, SessionSource::Managed);
    assert!(h.registry.is_managed(&session.tmux_window));

    assert!(h.tmux.calls().iter().any(|c| matches!(
        c,
        TmuxCall::NewWindow { session, name, command, .. }
            if session == "agentboard" && name == "newproj"
                && command.as_deref() == Some("claude")
    )));
}

#[tokio::test]
async fn kill_external_session_is_refused_by_default() {
    let h = harness(false).await;
    h.tmux.add_window("agentboard:@1", "ext", "/tmp");
    h.registry
        .replace_sessions(vec![live_session("agentboard:@1", "ext", SessionSource::External)]);

    let mut stream = connect(&h).await;
    skip_snapshots(&mut stream).await;

    send(
        &mut stream,
        &ClientMessage::SessionKill {
            session_id: "agentboard:@1".to_string(),
        },
    )
    .await;
    let reply = recv_until(&mut stream, |m| {
        matches!(m, ServerMessage::KillFailed { .. })
    })
    .await;
    assert!(matches!(reply, ServerMessage::KillFailed { .. }));
    assert!(h.tmux.window("agentboard:@1").is_some());
}

#[tokio::test]
async fn kill_external_session_allowed_by_flag() {
    let h = harness(true).await;
    h.tmux.add_window("agentboard:@1", "ext", "/tmp");
    h.registry
        .replace_sessions(vec![live_session("agentboard:@1", "ext", SessionSource::External)]);

    let mut stream = connect(&h).await;
    skip_snapshots(&mut stream).await;

    send(
        &mut stream,
        &ClientMessage::SessionKill {
            session_id: "agentboard:@1".to_string(),
        },
    )
    .await;

    let removed = recv_until(&mut stream, |m| {
        matches!(m, ServerMessage::SessionRemoved { .. })
    })
    .await;
    assert_eq!(
        removed,
        ServerMessage::SessionRemoved {
            session_id: "agentboard:@1".to_string()
        }
    );
    assert!(h.tmux.window("agentboard:@1").is_none());
}

#[tokio::test]
async fn rename_updates_window_and_registry() {
    let h = harness(false).await;
    h.tmux.add_window("agentboard:@1", "old", "/tmp");
    h.registry
        .replace_sessions(vec![live_session("agentboard:@1", "old", SessionSource::External)]);

    let mut stream = connect(&h).await;
    skip_snapshots(&mut stream).await;

    send(
        &mut stream,
        &ClientMessage::SessionRename {
            session_id: "agentboard:@1".to_string(),
            new_name: "renamed".to_string(),
        },
    )
    .await;

    let update = recv_until(&mut stream, |m| {
        matches!(m, ServerMessage::SessionUpdate { .. })
    })
    .await;
    let ServerMessage::SessionUpdate { session } = update else {
        unreachable!()
    };
    assert_eq!(session.name, "renamed");
    assert_eq!(h.tmux.window("agentboard:@1").unwrap().name, "renamed");
}

#[tokio::test]
async fn refresh_enumerates_new_windows() {
    let h = harness(false).await;
    let mut stream = connect(&h).await;
    skip_snapshots(&mut stream).await;

    h.tmux.add_window("agentboard:@4", "fresh", "/tmp/x");
    send(&mut stream, &ClientMessage::SessionRefresh).await;

    let sessions = recv_until(&mut stream, |m| {
        matches!(m, ServerMessage::Sessions { .. })
    })
    .await;
    let ServerMessage::Sessions { sessions } = sessions else {
        unreachable!()
    };
    assert!(sessions.iter().any(|s| s.tmux_window == "agentboard:@4"));
}

#[tokio::test]
async fn pin_round_trips_through_database() {
    let h = harness(false).await;
    let now = Utc::now();
    h.db.insert(&AgentSessionRecord {
        session_id: "claude-1".to_string(),
        log_file_path: "/logs/one.jsonl".to_string(),
        project_path: String::new(),
        agent_type: ab_core::AgentType::Claude,
        display_name: "one".to_string(),
        created_at: now,
        last_activity_at: now,
        last_user_message: None,
        current_window: None,
        is_pinned: false,
        last_resume_error: None,
        last_known_log_size: None,
        is_codex_exec: false,
    })
    .unwrap();

    let mut stream = connect(&h).await;
    skip_snapshots(&mut stream).await;

    send(
        &mut stream,
        &ClientMessage::SessionPin {
            session_id: "claude-1".to_string(),
            is_pinned: true,
        },
    )
    .await;
    let reply = recv_until(&mut stream, |m| {
        matches!(m, ServerMessage::SessionPinResult { .. })
    })
    .await;
    assert_eq!(
        reply,
        ServerMessage::SessionPinResult {
            ok: true,
            session_id: "claude-1".to_string()
        }
    );
    assert!(h.db.get("claude-1").unwrap().unwrap().is_pinned);

    // Unknown record id reports ok: false
    send(
        &mut stream,
        &ClientMessage::SessionPin {
            session_id: "nope".to_string(),
            is_pinned: true,
        },
    )
    .await;
    let reply = recv_until(&mut stream, |m| {
        matches!(m, ServerMessage::SessionPinResult { .. })
    })
    .await;
    assert_eq!(
        reply,
        ServerMessage::SessionPinResult {
            ok: false,
            session_id: "nope".to_string()
        }
    );
}
