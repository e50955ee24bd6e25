// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ab_core::{SessionSource, SessionStatus};
use chrono::TimeZone;

fn t(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 8, minute, 0).single().unwrap()
}

fn session(window: &str, minute: u32) -> Session {
    Session {
        id: window.to_string(),
        name: format!("w-{}", window),
        tmux_window: window.to_string(),
        project_path: "/tmp/p".to_string(),
        status: SessionStatus::Unknown,
        last_activity: t(minute),
        created_at: t(0),
        source: SessionSource::External,
        agent_type: None,
        agent_session_id: None,
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<RegistryEvent>) -> Vec<RegistryEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

#[test]
fn replace_emits_sessions_only_on_change() {
    let registry = SessionRegistry::new();
    let mut rx = registry.subscribe();

    registry.replace_sessions(vec![session("agentboard:@1", 1)]);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], RegistryEvent::Sessions(ref s) if s.len() == 1));

    // Identical slice: no event
    registry.replace_sessions(vec![session("agentboard:@1", 1)]);
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn removed_fires_before_bulk_sessions() {
    let registry = SessionRegistry::new();
    registry.replace_sessions(vec![session("agentboard:@1", 1), session("agentboard:@2", 1)]);
    let mut rx = registry.subscribe();

    registry.replace_sessions(vec![session("agentboard:@1", 1)]);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        RegistryEvent::SessionRemoved { ref id } if id == "agentboard:@2"
    ));
    assert!(matches!(events[1], RegistryEvent::Sessions(_)));
}

#[test]
fn later_last_activity_is_preserved() {
    let registry = SessionRegistry::new();
    registry.replace_sessions(vec![session("agentboard:@1", 30)]);

    // Incoming enumeration carries an older activity timestamp
    registry.replace_sessions(vec![session("agentboard:@1", 10)]);
    let got = registry.get("agentboard:@1").unwrap();
    assert_eq!(got.last_activity, t(30));
}

#[test]
fn update_session_emits_only_on_change() {
    let registry = SessionRegistry::new();
    registry.replace_sessions(vec![session("agentboard:@1", 1)]);
    let mut rx = registry.subscribe();

    registry.update_session(
        "agentboard:@1",
        SessionPatch {
            status: Some(SessionStatus::Working),
            ..Default::default()
        },
    );
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        RegistryEvent::SessionUpdate(ref s) if s.status == SessionStatus::Working
    ));

    // Same status again: nothing changes, nothing fires
    registry.update_session(
        "agentboard:@1",
        SessionPatch {
            status: Some(SessionStatus::Working),
            ..Default::default()
        },
    );
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn update_ignores_activity_regression() {
    let registry = SessionRegistry::new();
    registry.replace_sessions(vec![session("agentboard:@1", 20)]);

    registry.update_session(
        "agentboard:@1",
        SessionPatch {
            last_activity: Some(t(5)),
            ..Default::default()
        },
    );
    assert_eq!(registry.get("agentboard:@1").unwrap().last_activity, t(20));
}

#[test]
fn update_unknown_window_is_a_no_op() {
    let registry = SessionRegistry::new();
    let mut rx = registry.subscribe();
    registry.update_session(
        "agentboard:@9",
        SessionPatch {
            status: Some(SessionStatus::Working),
            ..Default::default()
        },
    );
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn managed_marking_survives_replace_while_present() {
    let registry = SessionRegistry::new();
    let mut created = session("agentboard:@1", 1);
    created.source = SessionSource::Managed;
    registry.insert_created(created);
    assert!(registry.is_managed("agentboard:@1"));

    registry.replace_sessions(vec![session("agentboard:@1", 2)]);
    assert!(registry.is_managed("agentboard:@1"));

    // Window disappears: managed marking is dropped with it
    registry.replace_sessions(vec![]);
    assert!(!registry.is_managed("agentboard:@1"));
}

#[test]
fn insert_created_emits_session_created() {
    let registry = SessionRegistry::new();
    let mut rx = registry.subscribe();
    registry.insert_created(session("agentboard:@7", 1));
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], RegistryEvent::SessionCreated(_)));
}
