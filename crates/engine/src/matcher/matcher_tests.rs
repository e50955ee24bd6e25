// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ab_adapters::{FakeTmuxAdapter, LogRoots, RipgrepAdapter};
use ab_core::WindowSnapshot;
use std::fs;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    roots: LogRoots,
    tmux: FakeTmuxAdapter,
    matcher: LogMatcher<FakeTmuxAdapter, RipgrepAdapter>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let roots = LogRoots {
        claude: dir.path().join("claude/projects"),
        codex: dir.path().join("codex/sessions"),
        pi: dir.path().join("pi/agent/sessions"),
    };
    fs::create_dir_all(&roots.claude).unwrap();
    fs::create_dir_all(&roots.codex).unwrap();
    fs::create_dir_all(&roots.pi).unwrap();
    let tmux = FakeTmuxAdapter::new();
    let store = LogStore::new(roots.clone());
    let matcher = LogMatcher::new(tmux.clone(), RipgrepAdapter::new(), store);
    Fixture {
        _dir: dir,
        roots,
        tmux,
        matcher,
    }
}

fn write_claude_log(roots: &LogRoots, rel: &str, lines: &[String]) -> String {
    let path = roots.claude.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, lines.join("\n") + "\n").unwrap();
    ab_core::normalize_log_path(&path.to_string_lossy())
}

fn user_line(text: &str) -> String {
    format!(
        r#"{{"type":"user","sessionId":"s","cwd":"/tmp/alpha","message":{{"role":"user","content":"{}"}}}}"#,
        text
    )
}

fn tool_result_line(text: &str) -> String {
    format!(
        r#"{{"type":"user","message":{{"content":[{{"type":"tool_result","content":"{}"}}]}},"toolUseResult":{{}}}}"#,
        text
    )
}

fn opts() -> MatchOptions {
    MatchOptions {
        scrollback_lines: 1000,
        ..Default::default()
    }
}

#[tokio::test]
async fn matches_window_to_its_log() {
    let f = fixture();
    let log = write_claude_log(
        &f.roots,
        "-tmp-alpha/one.jsonl",
        &[
            user_line("please refactor the session registry module"),
            user_line("now add tests for the diffing logic"),
        ],
    );
    write_claude_log(
        &f.roots,
        "-tmp-alpha/other.jsonl",
        &[user_line("a completely unrelated conversation")],
    );

    f.tmux.add_window("agentboard:@1", "alpha", "/tmp/alpha");
    f.tmux.set_scrollback(
        "agentboard:@1",
        "❯ please refactor the session registry module\nok\n❯ now add tests for the diffing logic\nworking\n",
    );

    let m = f
        .matcher
        .match_window_to_log("agentboard:@1", &opts())
        .await
        .unwrap();
    assert_eq!(m.log_path, log);
    assert_eq!(m.score.matched_count, 2);
}

#[tokio::test]
async fn tool_result_only_log_is_rejected() {
    let f = fixture();
    write_claude_log(
        &f.roots,
        "-tmp-alpha/poison.jsonl",
        &[tool_result_line("the secret phrase appears here")],
    );

    f.tmux.add_window("agentboard:@1", "w", "/tmp/alpha");
    f.tmux
        .set_scrollback("agentboard:@1", "❯ the secret phrase appears here\n");

    let m = f.matcher.match_window_to_log("agentboard:@1", &opts()).await;
    assert!(m.is_none());
}

#[tokio::test]
async fn genuine_log_beats_tool_result_capture() {
    let f = fixture();
    let genuine = write_claude_log(
        &f.roots,
        "-tmp-alpha/genuine.jsonl",
        &[user_line("deploy the blue stack to staging")],
    );
    write_claude_log(
        &f.roots,
        "-tmp-alpha/capture.jsonl",
        &[tool_result_line("deploy the blue stack to staging")],
    );

    f.tmux.add_window("agentboard:@1", "w", "/tmp/alpha");
    f.tmux
        .set_scrollback("agentboard:@1", "❯ deploy the blue stack to staging\n");

    let m = f
        .matcher
        .match_window_to_log("agentboard:@1", &opts())
        .await
        .unwrap();
    assert_eq!(m.log_path, genuine);
}

#[tokio::test]
async fn missing_window_is_inconclusive() {
    let f = fixture();
    let m = f.matcher.match_window_to_log("agentboard:@9", &opts()).await;
    assert!(m.is_none());
}

#[tokio::test]
async fn empty_scrollback_is_inconclusive() {
    let f = fixture();
    f.tmux.add_window("agentboard:@1", "w", "/tmp");
    let m = f.matcher.match_window_to_log("agentboard:@1", &opts()).await;
    assert!(m.is_none());
}

#[tokio::test]
async fn excluded_paths_are_filtered() {
    let f = fixture();
    let log = write_claude_log(
        &f.roots,
        "-tmp-alpha/only.jsonl",
        &[user_line("a very distinctive request indeed")],
    );
    f.tmux.add_window("agentboard:@1", "w", "/tmp/alpha");
    f.tmux
        .set_scrollback("agentboard:@1", "❯ a very distinctive request indeed\n");

    let mut options = opts();
    options.excluded_paths.insert(log);
    let m = f
        .matcher
        .match_window_to_log("agentboard:@1", &options)
        .await;
    assert!(m.is_none());
}

#[tokio::test]
async fn agent_type_filter_drops_other_roots() {
    let f = fixture();
    write_claude_log(
        &f.roots,
        "-tmp-alpha/claude.jsonl",
        &[user_line("shared message across agents")],
    );

    f.tmux.add_window("agentboard:@1", "w", "/tmp/alpha");
    f.tmux
        .set_scrollback("agentboard:@1", "❯ shared message across agents\n");

    let mut options = opts();
    options.agent_type = Some(ab_core::AgentType::Codex);
    let m = f
        .matcher
        .match_window_to_log("agentboard:@1", &options)
        .await;
    assert!(m.is_none());
}

#[tokio::test]
async fn project_path_filter_uses_log_cwd() {
    let f = fixture();
    write_claude_log(
        &f.roots,
        "-tmp-alpha/here.jsonl",
        &[user_line("message tied to a project path")],
    );

    f.tmux.add_window("agentboard:@1", "w", "/somewhere/else");
    f.tmux
        .set_scrollback("agentboard:@1", "❯ message tied to a project path\n");

    // Window path unrelated to the log's /tmp/alpha cwd
    let mut options = opts();
    options.project_path = Some("/somewhere/else".to_string());
    let m = f
        .matcher
        .match_window_to_log("agentboard:@1", &options)
        .await;
    assert!(m.is_none());

    // Matching project path keeps the candidate
    let mut options = opts();
    options.project_path = Some("/tmp/alpha".to_string());
    let m = f
        .matcher
        .match_window_to_log("agentboard:@1", &options)
        .await;
    assert!(m.is_some());
}

#[tokio::test]
async fn path_bounded_search_honors_candidate_set() {
    let f = fixture();
    let in_set = write_claude_log(
        &f.roots,
        "-tmp-alpha/in.jsonl",
        &[user_line("bounded candidate message")],
    );
    write_claude_log(
        &f.roots,
        "-tmp-alpha/out.jsonl",
        &[user_line("bounded candidate message")],
    );

    f.tmux.add_window("agentboard:@1", "w", "/tmp/alpha");
    f.tmux
        .set_scrollback("agentboard:@1", "❯ bounded candidate message\n");

    let mut options = opts();
    options.candidate_paths = Some(vec![in_set.clone()]);
    let m = f
        .matcher
        .match_window_to_log("agentboard:@1", &options)
        .await
        .unwrap();
    assert_eq!(m.log_path, in_set);
}

#[tokio::test]
async fn two_windows_claiming_one_log_block_it() {
    let f = fixture();
    write_claude_log(
        &f.roots,
        "-tmp-alpha/shared.jsonl",
        &[user_line("identical scrollback in both windows")],
    );

    let scrollback = "❯ identical scrollback in both windows\n";
    f.tmux.add_window("agentboard:@1", "a", "/tmp/alpha");
    f.tmux.add_window("agentboard:@2", "b", "/tmp/alpha");
    f.tmux.set_scrollback("agentboard:@1", scrollback);
    f.tmux.set_scrollback("agentboard:@2", scrollback);

    let windows = vec![
        WindowSnapshot {
            tmux_window: "agentboard:@1".to_string(),
            name: "a".to_string(),
            pane_current_path: "/tmp/alpha".to_string(),
            activity: 0,
        },
        WindowSnapshot {
            tmux_window: "agentboard:@2".to_string(),
            name: "b".to_string(),
            pane_current_path: "/tmp/alpha".to_string(),
            activity: 0,
        },
    ];
    let map = f.matcher.match_windows_to_logs(&windows, &opts()).await;
    assert!(map.is_empty(), "tied claims must block the log: {:?}", map);
}

#[tokio::test]
async fn distinct_windows_map_to_distinct_logs() {
    let f = fixture();
    let log_a = write_claude_log(
        &f.roots,
        "-tmp-alpha/a.jsonl",
        &[user_line("alpha window conversation topic")],
    );
    let log_b = write_claude_log(
        &f.roots,
        "-tmp-alpha/b.jsonl",
        &[user_line("beta window conversation topic")],
    );

    f.tmux.add_window("agentboard:@1", "a", "/tmp/alpha");
    f.tmux.add_window("agentboard:@2", "b", "/tmp/alpha");
    f.tmux
        .set_scrollback("agentboard:@1", "❯ alpha window conversation topic\n");
    f.tmux
        .set_scrollback("agentboard:@2", "❯ beta window conversation topic\n");

    let windows = vec![
        WindowSnapshot {
            tmux_window: "agentboard:@1".to_string(),
            name: "a".to_string(),
            pane_current_path: "".to_string(),
            activity: 0,
        },
        WindowSnapshot {
            tmux_window: "agentboard:@2".to_string(),
            name: "b".to_string(),
            pane_current_path: "".to_string(),
            activity: 0,
        },
    ];
    let map = f.matcher.match_windows_to_logs(&windows, &opts()).await;
    assert_eq!(map.get(&log_a).map(String::as_str), Some("agentboard:@1"));
    assert_eq!(map.get(&log_b).map(String::as_str), Some("agentboard:@2"));
}

#[tokio::test]
async fn verification_tri_state() {
    let f = fixture();
    let log = write_claude_log(
        &f.roots,
        "-tmp-alpha/mine.jsonl",
        &[user_line("the verified association message")],
    );
    let other = write_claude_log(
        &f.roots,
        "-tmp-alpha/other.jsonl",
        &[user_line("an entirely different topic")],
    );

    f.tmux.add_window("agentboard:@1", "w", "/tmp/alpha");
    f.tmux
        .set_scrollback("agentboard:@1", "❯ the verified association message\n");

    assert_eq!(
        f.matcher
            .verify_window_log_detailed("agentboard:@1", &log, &opts())
            .await,
        MatchVerification::Verified
    );
    assert_eq!(
        f.matcher
            .verify_window_log_detailed("agentboard:@1", &other, &opts())
            .await,
        MatchVerification::Mismatch
    );
    assert_eq!(
        f.matcher
            .verify_window_log_detailed("agentboard:@9", &log, &opts())
            .await,
        MatchVerification::Inconclusive
    );
}

#[tokio::test]
async fn pi_windows_match_via_ansi_spans() {
    let f = fixture();
    let pi_log = {
        let path = f.roots.pi.join("pi-session.jsonl");
        let lines = [
            r#"{"type":"session","id":"pi-1","cwd":"/tmp/alpha"}"#.to_string(),
            r#"{"type":"user","text":"a pi specific question about lifetimes"}"#.to_string(),
        ];
        fs::write(&path, lines.join("\n") + "\n").unwrap();
        ab_core::normalize_log_path(&path.to_string_lossy())
    };

    f.tmux.add_window("agentboard:@1", "pi", "/tmp/alpha");
    f.tmux.set_scrollback("agentboard:@1", "no prompt glyphs here\n");
    f.tmux.set_scrollback_ansi(
        "agentboard:@1",
        "\u{1b}[48;2;52;53;65m a pi specific question about lifetimes \u{1b}[49m\n",
    );

    let m = f
        .matcher
        .match_window_to_log("agentboard:@1", &opts())
        .await
        .unwrap();
    assert_eq!(m.log_path, pi_log);
}

#[tokio::test]
async fn trace_fallback_blocks_subagent_logs() {
    let f = fixture();
    let subagent = {
        let path = f.roots.codex.join("sub.jsonl");
        let lines = [
            r#"{"type":"session_meta","payload":{"id":"codex-sub","source":{"parent":"x"}}}"#
                .to_string(),
            r#"{"type":"event_msg","payload":{"type":"user_message","message":"Explored the workspace tree"}}"#
                .to_string(),
        ];
        fs::write(&path, lines.join("\n") + "\n").unwrap();
        ab_core::normalize_log_path(&path.to_string_lossy())
    };

    f.tmux.add_window("agentboard:@1", "w", "/tmp");
    f.tmux
        .set_scrollback("agentboard:@1", "• Explored the workspace tree\n");

    let mut options = opts();
    options.subagent_paths.insert(subagent);
    let m = f
        .matcher
        .match_window_to_log("agentboard:@1", &options)
        .await;
    assert!(m.is_none());
}
