// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;

#[test]
fn session_round_trips_through_json() {
    let t = Utc.with_ymd_and_hms(2026, 2, 1, 9, 30, 0).single().unwrap();
    let session = Session {
        id: "agentboard:@3".to_string(),
        name: "alpha".to_string(),
        tmux_window: "agentboard:@3".to_string(),
        project_path: "/tmp/alpha".to_string(),
        status: SessionStatus::Waiting,
        last_activity: t,
        created_at: t,
        source: SessionSource::External,
        agent_type: Some(AgentType::Codex),
        agent_session_id: Some("codex-9".to_string()),
    };

    let json = serde_json::to_value(&session).unwrap();
    assert_eq!(json["tmuxWindow"], "agentboard:@3");
    assert_eq!(json["status"], "waiting");
    assert_eq!(json["source"], "external");

    let back: Session = serde_json::from_value(json).unwrap();
    assert_eq!(back, session);
}

#[test]
fn status_serializes_lowercase() {
    for (status, s) in [
        (SessionStatus::Working, "\"working\""),
        (SessionStatus::Waiting, "\"waiting\""),
        (SessionStatus::Permission, "\"permission\""),
        (SessionStatus::Unknown, "\"unknown\""),
    ] {
        assert_eq!(serde_json::to_string(&status).unwrap(), s);
    }
}
