// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn parses_claude_head() {
    let head = concat!(
        r#"{"type":"user","sessionId":"claude-1","cwd":"/tmp/alpha","message":{"role":"user","content":[{"type":"text","text":"fix the parser bug"}]}}"#,
        "\n",
        r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"on it"}]}}"#,
        "\n",
    );
    let meta = HeadMeta::parse(head);
    assert_eq!(meta.session_id.as_deref(), Some("claude-1"));
    assert_eq!(meta.project_path.as_deref(), Some("/tmp/alpha"));
    assert!(!meta.is_codex_subagent);
    assert!(!meta.is_codex_exec);
    assert!(meta.token_count >= 4, "tokens: {}", meta.token_count);
}

#[test]
fn parses_codex_payload_head() {
    let head = concat!(
        r#"{"type":"session_meta","payload":{"id":"codex-7","cwd":"/work/beta","source":"cli"}}"#,
        "\n",
    );
    let meta = HeadMeta::parse(head);
    assert_eq!(meta.session_id.as_deref(), Some("codex-7"));
    assert_eq!(meta.project_path.as_deref(), Some("/work/beta"));
    assert!(!meta.is_codex_subagent);
}

#[test]
fn detects_codex_subagent_source_object() {
    let head =
        r#"{"type":"session_meta","payload":{"id":"codex-8","source":{"subagent":"reviewer"}}}"#;
    let meta = HeadMeta::parse(head);
    assert!(meta.is_codex_subagent);
    assert!(!meta.is_codex_exec);
}

#[test]
fn detects_codex_exec_source() {
    let head = r#"{"type":"session_meta","payload":{"id":"codex-9","source":"exec"}}"#;
    let meta = HeadMeta::parse(head);
    assert!(meta.is_codex_exec);
    assert!(!meta.is_codex_subagent);
}

#[test]
fn parses_pi_session_first_line() {
    let head = concat!(
        r#"{"type":"session","id":"pi-3","cwd":"/home/dev/gamma"}"#,
        "\n",
        r#"{"type":"user","text":"hello pi"}"#,
        "\n",
    );
    let meta = HeadMeta::parse(head);
    assert_eq!(meta.session_id.as_deref(), Some("pi-3"));
    assert_eq!(meta.project_path.as_deref(), Some("/home/dev/gamma"));
}

#[test]
fn payload_working_directory_is_a_cwd_source() {
    let head = r#"{"type":"session_meta","payload":{"sessionId":"codex-1","working_directory":"/srv/app"}}"#;
    let meta = HeadMeta::parse(head);
    assert_eq!(meta.project_path.as_deref(), Some("/srv/app"));
}

#[test]
fn skips_unparseable_lines() {
    let head = "not json at all\n{\"sessionId\":\"s-1\"}\n{truncated";
    let meta = HeadMeta::parse(head);
    assert_eq!(meta.session_id.as_deref(), Some("s-1"));
}

#[test]
fn tool_result_lines_do_not_count_tokens() {
    let head = concat!(
        r#"{"type":"user","sessionId":"s","message":{"role":"user","content":[{"type":"tool_result","content":"one two three four five six seven eight nine ten"}]}}"#,
        "\n",
    );
    let meta = HeadMeta::parse(head);
    assert_eq!(meta.token_count, 0);
}

#[test]
fn last_user_message_prefers_most_recent() {
    let tail = concat!(
        r#"{"type":"user","message":{"role":"user","content":"old prompt"}}"#,
        "\n",
        r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"reply"}]}}"#,
        "\n",
        r#"{"type":"user","message":{"role":"user","content":"new prompt"}}"#,
        "\n",
    );
    assert_eq!(extract_last_user_message(tail).as_deref(), Some("new prompt"));
}

#[test]
fn last_user_message_skips_tool_results() {
    let tail = concat!(
        r#"{"type":"user","message":{"role":"user","content":"real question"}}"#,
        "\n",
        r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","content":"captured other session"}]}}"#,
        "\n",
    );
    assert_eq!(
        extract_last_user_message(tail).as_deref(),
        Some("real question")
    );
}

#[test]
fn last_user_message_reads_codex_payloads() {
    let tail = concat!(
        r#"{"type":"event_msg","payload":{"type":"user_message","message":"ship the release"}}"#,
        "\n",
    );
    assert_eq!(
        extract_last_user_message(tail).as_deref(),
        Some("ship the release")
    );
}

#[parameterized(
    command_tag = { "<local-command-stdout>done</local-command-stdout>", true },
    interrupted = { "[Request interrupted by user]", true },
    caveat = { "Caveat: the messages below were generated", true },
    plain = { "please fix the tests", false },
)]
fn tool_notifications(message: &str, expected: bool) {
    assert_eq!(is_tool_notification(message), expected);
}
