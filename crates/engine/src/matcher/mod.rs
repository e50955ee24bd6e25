// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The log match engine.
//!
//! Given a tmux window, recover its recent user messages from
//! scrollback, find the candidate logs containing them, reject
//! tool-output false positives, and rank the survivors by ordered-match
//! score. All external IO (tmux, ripgrep, file reads) is best-effort:
//! failures shrink the candidate set instead of propagating.

mod context;
mod pattern;
mod prompts;
mod rank;

pub use context::has_message_in_valid_user_context;
pub use pattern::{compile_pattern, flexible_pattern};
pub use prompts::{
    extract_messages, extract_pi_messages, extract_prompt_messages, extract_trace_lines,
    strip_ansi, ExtractedMessages,
};
pub use rank::{score_against_lines, score_against_text, scoring_messages, OrderedScore};

use ab_adapters::logs::HeadMeta;
use ab_adapters::{GrepClient, GrepScope, LogStore, TmuxClient};
use ab_core::{is_same_or_child_path, normalize_log_path, AgentType, WindowSnapshot};
use std::collections::{HashMap, HashSet};

/// Tail window for the path-bounded quick scan and for tail scoring.
const TAIL_SCAN_BYTES: u64 = 96 * 1024;

/// Progressive budgets for valid-user-context validation.
const VALIDATION_BUDGETS: [u64; 4] = [64 * 1024, 256 * 1024, 1024 * 1024, 2 * 1024 * 1024];

/// Options for one match attempt.
#[derive(Debug, Clone, Default)]
pub struct MatchOptions {
    pub scrollback_lines: u32,
    pub rg_threads: Option<usize>,
    /// Path-bounded search when set; directory-wide over the roots
    /// otherwise.
    pub candidate_paths: Option<Vec<String>>,
    /// Keep only logs under this agent's root.
    pub agent_type: Option<AgentType>,
    /// Keep only logs whose recorded cwd is the same as or related to
    /// this path.
    pub project_path: Option<String>,
    /// Logs already claimed by other verified windows.
    pub excluded_paths: HashSet<String>,
    /// Known Codex subagent logs; blocked when matching from the trace
    /// fallback.
    pub subagent_paths: HashSet<String>,
}

/// A successful window→log match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowMatch {
    pub log_path: String,
    pub score: OrderedScore,
    /// Whether the score came from the tail window rather than the full
    /// file; tail ties get re-scored against the full file.
    pub scored_on_tail: bool,
}

/// Tri-state association check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVerification {
    Verified,
    Mismatch,
    Inconclusive,
}

/// Correlates tmux windows with agent logs.
#[derive(Clone)]
pub struct LogMatcher<T: TmuxClient, G: GrepClient> {
    tmux: T,
    grep: G,
    store: LogStore,
}

impl<T: TmuxClient, G: GrepClient> LogMatcher<T, G> {
    pub fn new(tmux: T, grep: G, store: LogStore) -> Self {
        Self { tmux, grep, store }
    }

    /// Best single log for one window, or None when inconclusive.
    pub async fn match_window_to_log(
        &self,
        window: &str,
        opts: &MatchOptions,
    ) -> Option<WindowMatch> {
        let extracted = self.extract_window_messages(window, opts.scrollback_lines).await?;
        if extracted.messages.is_empty() {
            return None;
        }

        let mut head_cache = HeadCache::default();
        let candidates = self
            .narrow_candidates(&extracted.messages, opts)
            .await;
        let candidates =
            self.filter_candidates(candidates, &extracted, opts, &mut head_cache);
        if candidates.is_empty() {
            return None;
        }

        self.rank_candidates(candidates, &extracted.messages).await
    }

    /// Match every window, resolving duplicate log claims: the higher
    /// ordered score wins, and an exact tie blocks the log entirely.
    pub async fn match_windows_to_logs(
        &self,
        windows: &[WindowSnapshot],
        base: &MatchOptions,
    ) -> HashMap<String, String> {
        let mut claims: HashMap<String, (String, OrderedScore)> = HashMap::new();
        let mut blocked: HashSet<String> = HashSet::new();

        for window in windows {
            let mut opts = base.clone();
            if opts.project_path.is_none() && !window.pane_current_path.is_empty() {
                opts.project_path = Some(window.pane_current_path.clone());
            }
            let Some(m) = self.match_window_to_log(&window.tmux_window, &opts).await else {
                continue;
            };
            if blocked.contains(&m.log_path) {
                continue;
            }
            match claims.get(&m.log_path) {
                None => {
                    claims.insert(m.log_path, (window.tmux_window.clone(), m.score));
                }
                Some((held_by, held_score)) => {
                    if m.score > *held_score {
                        tracing::debug!(
                            log = %m.log_path,
                            loser = %held_by,
                            winner = %window.tmux_window,
                            "window outranked previous claim"
                        );
                        claims.insert(m.log_path, (window.tmux_window.clone(), m.score));
                    } else if m.score == *held_score {
                        // Two windows, identical ordered scores: drop the
                        // log rather than guess
                        tracing::debug!(log = %m.log_path, "tied claims, blocking log");
                        claims.remove(&m.log_path);
                        blocked.insert(m.log_path);
                    }
                }
            }
        }

        claims
            .into_iter()
            .map(|(log, (window, _))| (log, window))
            .collect()
    }

    /// Validate a stored window↔log association without trusting it.
    pub async fn verify_window_log_detailed(
        &self,
        window: &str,
        log_path: &str,
        opts: &MatchOptions,
    ) -> MatchVerification {
        let expected = normalize_log_path(log_path);
        match self.match_window_to_log(window, opts).await {
            None => MatchVerification::Inconclusive,
            Some(m) if m.log_path == expected => MatchVerification::Verified,
            Some(_) => MatchVerification::Mismatch,
        }
    }

    /// Capture scrollback and extract user messages. The ANSI capture
    /// only happens when the plain pass finds no prompts (Pi windows).
    async fn extract_window_messages(
        &self,
        window: &str,
        lines: u32,
    ) -> Option<ExtractedMessages> {
        let plain = match self.tmux.capture_scrollback(window, lines, false).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(window, error = %e, "scrollback capture failed");
                return None;
            }
        };

        let prompts = extract_prompt_messages(&plain);
        if !prompts.is_empty() {
            return Some(ExtractedMessages {
                messages: prompts,
                from_trace_fallback: false,
            });
        }

        let ansi = self
            .tmux
            .capture_scrollback(window, lines, true)
            .await
            .ok();
        Some(extract_messages(&plain, ansi.as_deref()))
    }

    /// Intersect per-message candidate sets, longest message first,
    /// stopping as soon as at most one candidate remains.
    async fn narrow_candidates(&self, messages: &[String], opts: &MatchOptions) -> Vec<String> {
        let mut by_length: Vec<&String> = messages.iter().collect();
        by_length.sort_by_key(|m| std::cmp::Reverse(m.chars().count()));

        let mut running: Option<HashSet<String>> = None;
        for message in by_length {
            let found = self.find_logs_for_message(message, opts).await;
            if found.is_empty() {
                // A message the log has not recorded yet narrows nothing
                continue;
            }
            running = Some(match running {
                None => found,
                Some(prev) => prev.intersection(&found).cloned().collect(),
            });
            if running.as_ref().map(|s| s.len() <= 1).unwrap_or(false) {
                break;
            }
        }
        running.map(|s| s.into_iter().collect()).unwrap_or_default()
    }

    /// Candidate logs containing one message in a valid user context.
    async fn find_logs_for_message(&self, message: &str, opts: &MatchOptions) -> HashSet<String> {
        let pattern = flexible_pattern(message);
        let Ok(re) = regex::Regex::new(&pattern) else {
            return HashSet::new();
        };

        let hits: Vec<String> = match &opts.candidate_paths {
            Some(paths) => {
                // Tail-only quick scan first
                let tail_hits: Vec<String> = paths
                    .iter()
                    .filter(|p| {
                        let tail = self.store.read_tail(p, TAIL_SCAN_BYTES);
                        re.is_match(&tail)
                    })
                    .cloned()
                    .collect();
                if tail_hits.len() == 1 {
                    tail_hits
                } else {
                    let scope = GrepScope {
                        paths: paths.clone(),
                        jsonl_glob: false,
                        threads: opts.rg_threads,
                    };
                    self.grep
                        .files_with_matches(&pattern, &scope)
                        .await
                        .unwrap_or_default()
                }
            }
            None => {
                let scope = GrepScope {
                    paths: self.store.roots().existing(),
                    jsonl_glob: true,
                    threads: opts.rg_threads,
                };
                self.grep
                    .files_with_matches(&pattern, &scope)
                    .await
                    .unwrap_or_default()
            }
        };

        hits.into_iter()
            .map(|p| normalize_log_path(&p))
            .filter(|p| self.validate_user_context(p, &re))
            .collect()
    }

    /// Progressive tail validation: expand the window until the message
    /// is seen in a valid context, the whole file is covered, or the cap
    /// is reached.
    fn validate_user_context(&self, path: &str, re: &regex::Regex) -> bool {
        let size = self.store.times(path).map(|t| t.size).unwrap_or(0);
        for budget in VALIDATION_BUDGETS {
            let text = self.store.read_tail(path, budget);
            if has_message_in_valid_user_context(&text, re) {
                return true;
            }
            if size <= budget {
                // Window already covers the whole file
                return false;
            }
        }
        false
    }

    fn filter_candidates(
        &self,
        candidates: Vec<String>,
        extracted: &ExtractedMessages,
        opts: &MatchOptions,
        head_cache: &mut HeadCache,
    ) -> Vec<String> {
        let mut kept = Vec::with_capacity(candidates.len());
        for path in candidates {
            if opts.excluded_paths.contains(&path) {
                continue;
            }
            if let Some(agent) = opts.agent_type {
                if self.store.agent_type_for(&path) != Some(agent) {
                    continue;
                }
            }
            if let Some(target) = &opts.project_path {
                let cwd = head_cache.get(&self.store, &path).project_path.clone();
                if let Some(cwd) = cwd {
                    if !is_same_or_child_path(&cwd, target) {
                        continue;
                    }
                }
            }
            if extracted.from_trace_fallback {
                // Trace lines also appear in Codex subagent logs
                if opts.subagent_paths.contains(&path)
                    || head_cache.get(&self.store, &path).is_codex_subagent
                {
                    continue;
                }
            }
            kept.push(path);
        }
        kept
    }

    /// Score candidates and pick a unique winner, re-scoring tail ties
    /// against the full file.
    async fn rank_candidates(
        &self,
        candidates: Vec<String>,
        messages: &[String],
    ) -> Option<WindowMatch> {
        let chronological = scoring_messages(messages);
        if chronological.is_empty() {
            return None;
        }

        let mut scored: Vec<WindowMatch> = candidates
            .into_iter()
            .map(|path| {
                let size = self.store.times(&path).map(|t| t.size).unwrap_or(0);
                let tail = self.store.read_tail(&path, TAIL_SCAN_BYTES);
                let score = score_against_text(&chronological, &tail);
                WindowMatch {
                    log_path: path,
                    score,
                    scored_on_tail: size > TAIL_SCAN_BYTES,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score));

        let top_score = scored.first()?.score;
        let tied: Vec<WindowMatch> = scored
            .iter()
            .filter(|m| m.score == top_score)
            .cloned()
            .collect();
        if tied.len() == 1 {
            return scored.into_iter().next();
        }

        // Tie at the top: only meaningful to re-score when the tail
        // window hid part of some file
        if !tied.iter().any(|m| m.scored_on_tail) {
            tracing::debug!(count = tied.len(), "full-file score tie, inconclusive");
            return None;
        }

        let mut rescored = Vec::with_capacity(tied.len());
        for m in tied {
            let mut lines_per_message = Vec::with_capacity(chronological.len());
            for message in &chronological {
                let pattern = flexible_pattern(message);
                let lines = self
                    .grep
                    .match_lines(&pattern, &m.log_path)
                    .await
                    .unwrap_or_default();
                lines_per_message.push(lines);
            }
            let score = score_against_lines(&chronological, &lines_per_message);
            rescored.push(WindowMatch {
                log_path: m.log_path,
                score,
                scored_on_tail: false,
            });
        }
        rescored.sort_by(|a, b| b.score.cmp(&a.score));

        let best = rescored.first()?.score;
        if rescored.iter().filter(|m| m.score == best).count() > 1 {
            tracing::debug!("tie persisted after full-file re-score, inconclusive");
            return None;
        }
        rescored.into_iter().next()
    }
}

/// Per-call cache of parsed log heads.
#[derive(Default)]
struct HeadCache {
    entries: HashMap<String, HeadMeta>,
}

impl HeadCache {
    fn get(&mut self, store: &LogStore, path: &str) -> &HeadMeta {
        self.entries
            .entry(path.to_string())
            .or_insert_with(|| HeadMeta::parse(&store.read_head_expanding(path)))
    }
}

#[cfg(test)]
#[path = "matcher_tests.rs"]
mod matcher_tests;
