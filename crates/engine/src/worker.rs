// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The match worker.
//!
//! One full scan+match cycle runs off the scheduling path, in a
//! dedicated task that owns no shared mutable state. The poller talks
//! to it with request/response messages carrying opaque ids; a worker
//! failure answers that request with an error and leaves the loop
//! running. Dropping the handle disposes the worker and fails any
//! pending request with a disposal error.

use crate::matcher::{LogMatcher, MatchOptions};
use ab_adapters::logs::is_tool_notification;
use ab_adapters::{GrepClient, LogStore, TmuxClient};
use ab_core::{normalize_log_path, AgentSessionRecord, LogEntrySnapshot, WindowSnapshot};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Directory depth for log enumeration under the roots.
const ENUM_MAX_DEPTH: usize = 6;

/// One scan+match cycle request.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    /// Opaque id echoed on the response.
    pub id: u64,
    pub windows: Vec<WindowSnapshot>,
    pub max_logs_per_poll: usize,
    /// All known records; the worker uses them as a skip set so owned
    /// logs do not get their heads re-read every poll.
    pub sessions: Vec<AgentSessionRecord>,
    pub scrollback_lines: u32,
    pub min_tokens_for_match: usize,
    pub force_orphan_rematch: bool,
    /// Log paths of orphaned records to re-match when forced.
    pub orphan_candidates: Vec<String>,
    /// Log paths whose `last_user_message` the poller wants refreshed.
    pub last_message_candidates: Vec<String>,
    pub rg_threads: Option<usize>,
    /// Thread count for the (larger) orphan rematch pass.
    pub orphan_rg_threads: Option<usize>,
    /// Include a per-stage timing breakdown in the response.
    pub profile: bool,
}

/// A resolved log→window assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPair {
    pub log_path: String,
    pub tmux_window: String,
}

/// One cycle's results.
#[derive(Debug, Clone, Default)]
pub struct WorkerResponse {
    pub id: u64,
    pub entries: Vec<LogEntrySnapshot>,
    pub orphan_entries: Vec<LogEntrySnapshot>,
    pub matches: Vec<MatchPair>,
    pub orphan_matches: Vec<MatchPair>,
    pub timing_ms: u64,
    pub profile: Option<WorkerProfile>,
}

/// Per-stage timing breakdown, returned when the request asked for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerProfile {
    pub enumerate_ms: u64,
    pub match_ms: u64,
    pub orphan_ms: u64,
}

/// Errors from worker requests
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker disposed")]
    Disposed,
    #[error("worker failed: {0}")]
    Failed(String),
}

struct Job {
    request: WorkerRequest,
    reply: oneshot::Sender<Result<WorkerResponse, String>>,
}

/// Handle to a spawned match worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Job>,
    disposed: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl WorkerHandle {
    /// Run one cycle and await its response.
    pub async fn request(&self, request: WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        use std::sync::atomic::Ordering;
        if self.disposed.load(Ordering::SeqCst) {
            return Err(WorkerError::Disposed);
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { request, reply })
            .await
            .map_err(|_| WorkerError::Disposed)?;
        match rx.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => Err(WorkerError::Failed(error)),
            Err(_) => Err(WorkerError::Disposed),
        }
    }

    /// Dispose the worker: queued and future requests fail with a
    /// disposal error.
    pub fn dispose(&self) {
        self.disposed
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Spawns the worker task.
pub struct MatchWorker;

impl MatchWorker {
    pub fn spawn<T: TmuxClient, G: GrepClient>(
        store: LogStore,
        matcher: LogMatcher<T, G>,
    ) -> WorkerHandle {
        use std::sync::atomic::{AtomicBool, Ordering};
        let (tx, mut rx) = mpsc::channel::<Job>(4);
        let disposed = std::sync::Arc::new(AtomicBool::new(false));
        let disposed_task = std::sync::Arc::clone(&disposed);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if disposed_task.load(Ordering::SeqCst) {
                    // Dropping the reply sender rejects the pending id
                    continue;
                }
                let id = job.request.id;
                let result = run_cycle(&store, &matcher, job.request).await;
                if let Err(ref error) = result {
                    tracing::warn!(id, error = %error, "worker cycle failed");
                }
                let _ = job.reply.send(result);
            }
            tracing::debug!("match worker disposed");
        });
        WorkerHandle { tx, disposed }
    }
}

async fn run_cycle<T: TmuxClient, G: GrepClient>(
    store: &LogStore,
    matcher: &LogMatcher<T, G>,
    req: WorkerRequest,
) -> Result<WorkerResponse, String> {
    let started = Instant::now();
    let mut profile = WorkerProfile::default();

    let by_path: HashMap<String, &AgentSessionRecord> = req
        .sessions
        .iter()
        .map(|s| (normalize_log_path(&s.log_file_path), s))
        .collect();

    // 1. Enumerate, most recently modified first, capped
    let mut paths: Vec<(String, chrono::DateTime<chrono::Utc>)> = store
        .enumerate_jsonl_files(ENUM_MAX_DEPTH)
        .into_iter()
        .filter_map(|p| store.times(&p).map(|t| (p, t.mtime)))
        .collect();
    paths.sort_by(|a, b| b.1.cmp(&a.1));
    paths.truncate(req.max_logs_per_poll);

    let mut entries: Vec<LogEntrySnapshot> = paths
        .iter()
        .filter_map(|(path, _)| build_entry(store, &by_path, path))
        .collect();
    profile.enumerate_ms = started.elapsed().as_millis() as u64;

    // 2. Gate which entries need matching
    let eligible = gate_entries(&entries, &by_path, req.min_tokens_for_match);
    let subagent_paths: HashSet<String> = entries
        .iter()
        .filter(|e| e.is_codex_subagent)
        .map(|e| e.log_path.clone())
        .collect();

    // 3. Match eligible logs to windows
    let match_started = Instant::now();
    let matches = if eligible.is_empty() {
        Vec::new()
    } else {
        let opts = MatchOptions {
            scrollback_lines: req.scrollback_lines,
            rg_threads: req.rg_threads,
            candidate_paths: Some(eligible),
            subagent_paths: subagent_paths.clone(),
            ..Default::default()
        };
        to_pairs(matcher.match_windows_to_logs(&req.windows, &opts).await)
    };
    profile.match_ms = match_started.elapsed().as_millis() as u64;

    // 4. Forced orphan rematch over the poller's candidate list
    let orphan_started = Instant::now();
    let (orphan_entries, orphan_matches) = if req.force_orphan_rematch
        && !req.orphan_candidates.is_empty()
    {
        let orphan_entries: Vec<LogEntrySnapshot> = req
            .orphan_candidates
            .iter()
            .filter_map(|p| store.snapshot(p))
            .filter(|e| !e.is_codex_subagent)
            .filter(|e| e.log_token_count >= req.min_tokens_for_match || known(&by_path, e))
            .collect();
        let orphan_matches = if orphan_entries.is_empty() {
            Vec::new()
        } else {
            let opts = MatchOptions {
                scrollback_lines: req.scrollback_lines,
                rg_threads: req.orphan_rg_threads.or(req.rg_threads),
                candidate_paths: Some(orphan_entries.iter().map(|e| e.log_path.clone()).collect()),
                subagent_paths,
                ..Default::default()
            };
            to_pairs(matcher.match_windows_to_logs(&req.windows, &opts).await)
        };
        (orphan_entries, orphan_matches)
    } else {
        (Vec::new(), Vec::new())
    };
    profile.orphan_ms = orphan_started.elapsed().as_millis() as u64;

    // 5. Synthesize entries for requested last-message refreshes
    let have: HashSet<String> = entries.iter().map(|e| e.log_path.clone()).collect();
    for path in &req.last_message_candidates {
        let normalized = normalize_log_path(path);
        if have.contains(&normalized) {
            continue;
        }
        if let Some(entry) = store.snapshot(&normalized) {
            entries.push(entry);
        }
    }

    // 6. Attach last_user_message where the owning session needs it
    for entry in &mut entries {
        if entry.last_user_message.is_some() {
            continue;
        }
        if session_needs_last_message(&by_path, entry) {
            if let Some(full) = store.snapshot(&entry.log_path) {
                entry.last_user_message = full.last_user_message;
            }
        }
    }

    Ok(WorkerResponse {
        id: req.id,
        entries,
        orphan_entries,
        matches,
        orphan_matches,
        timing_ms: started.elapsed().as_millis() as u64,
        profile: req.profile.then_some(profile),
    })
}

/// Build the snapshot for one path, using the owning record (when
/// known) instead of re-reading the log head.
fn build_entry(
    store: &LogStore,
    known: &HashMap<String, &AgentSessionRecord>,
    path: &str,
) -> Option<LogEntrySnapshot> {
    match known.get(path) {
        Some(record) => {
            let times = store.times(path)?;
            Some(LogEntrySnapshot {
                log_path: path.to_string(),
                mtime: times.mtime,
                birthtime: times.birthtime,
                session_id: Some(record.session_id.clone()),
                project_path: (!record.project_path.is_empty())
                    .then(|| record.project_path.clone()),
                agent_type: Some(record.agent_type),
                is_codex_subagent: false,
                is_codex_exec: record.is_codex_exec,
                // Known records passed the creation floor already
                log_token_count: usize::MAX,
                last_user_message: None,
            })
        }
        None => store.snapshot(path),
    }
}

fn known(by_path: &HashMap<String, &AgentSessionRecord>, entry: &LogEntrySnapshot) -> bool {
    by_path.contains_key(&entry.log_path)
}

/// Which entry paths participate in window matching this cycle.
///
/// Drops entries without a session id, subagent/exec logs, entries
/// below the token floor, and entries whose log has not moved since the
/// owning session's last activity, unless that session is orphaned.
pub fn gate_entries(
    entries: &[LogEntrySnapshot],
    by_path: &HashMap<String, &AgentSessionRecord>,
    min_tokens: usize,
) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.session_id.is_some())
        .filter(|e| !e.is_codex_subagent && !e.is_codex_exec)
        .filter(|e| e.log_token_count >= min_tokens)
        .filter(|e| match by_path.get(&e.log_path) {
            Some(session) if session.current_window.is_some() => {
                e.mtime > session.last_activity_at
            }
            _ => true,
        })
        .map(|e| e.log_path.clone())
        .collect()
}

/// Whether the entry's owning session is missing a usable
/// `last_user_message`, or the log moved past its recorded activity.
fn session_needs_last_message(
    by_path: &HashMap<String, &AgentSessionRecord>,
    entry: &LogEntrySnapshot,
) -> bool {
    match by_path.get(&entry.log_path) {
        None => false, // new logs already carry their tail message
        Some(session) => match session.last_user_message.as_deref() {
            None => true,
            Some(m) if is_tool_notification(m) => true,
            Some(_) => entry.mtime > session.last_activity_at,
        },
    }
}

fn to_pairs(map: HashMap<String, String>) -> Vec<MatchPair> {
    let mut pairs: Vec<MatchPair> = map
        .into_iter()
        .map(|(log_path, tmux_window)| MatchPair {
            log_path,
            tmux_window,
        })
        .collect();
    pairs.sort_by(|a, b| a.log_path.cmp(&b.log_path));
    pairs
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
