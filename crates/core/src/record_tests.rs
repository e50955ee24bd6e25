// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;

fn record() -> AgentSessionRecord {
    let t = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).single().unwrap();
    AgentSessionRecord {
        session_id: "claude-1".to_string(),
        log_file_path: "/logs/claude/projects/-tmp-alpha/session-1.jsonl".to_string(),
        project_path: "/tmp/alpha".to_string(),
        agent_type: AgentType::Claude,
        display_name: "alpha".to_string(),
        created_at: t,
        last_activity_at: t,
        last_user_message: None,
        current_window: None,
        is_pinned: false,
        last_resume_error: None,
        last_known_log_size: None,
        is_codex_exec: false,
    }
}

#[test]
fn active_follows_current_window() {
    let mut r = record();
    assert!(!r.is_active());
    r.current_window = Some("agentboard:@1".to_string());
    assert!(r.is_active());
}

#[test]
fn serializes_camel_case_and_skips_absent_options() {
    let json = serde_json::to_value(record()).unwrap();
    assert_eq!(json["sessionId"], "claude-1");
    assert_eq!(json["agentType"], "claude");
    assert!(json.get("currentWindow").is_none());
    assert!(json.get("lastUserMessage").is_none());
}

#[test]
fn empty_patch_reports_empty() {
    assert!(RecordPatch::default().is_empty());
    let patch = RecordPatch {
        current_window: Some(None),
        ..Default::default()
    };
    assert!(!patch.is_empty());
}
