// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The log poller.
//!
//! Drives the match worker on a fixed interval and reconciles its
//! results into the database and registry. Polls are single-flight: a
//! tick that lands while a cycle is running returns a zero-stat result
//! instead of queueing. All inter-poll state (the force-rematch flag,
//! the empty-log and rematch-attempt caches) is owned here and touched
//! only from within the poll cycle.

use crate::capture_lock::CaptureLock;
use crate::registry::SessionRegistry;
use crate::resume;
use crate::status::{derive_status, STATUS_CAPTURE_LINES};
use crate::worker::{gate_entries, WorkerHandle, WorkerRequest, WorkerResponse};
use ab_adapters::logs::is_tool_notification;
use ab_adapters::{LogStore, TmuxClient};
use ab_core::{
    normalize_log_path, AgentSessionRecord, LogEntrySnapshot, PollStats, RecordPatch, Session,
    SessionSource, WindowSnapshot,
};
use ab_storage::{DbError, SessionDatabase};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Token floor for creating a new record.
const MIN_CREATION_TOKENS: usize = 10;

/// Cooldown between rematch (and resurrection) attempts per session.
const REMATCH_COOLDOWN: Duration = Duration::from_secs(60);

/// Raised `max_logs_per_poll` for the startup last-message backfill.
const BACKFILL_MAX_LOGS: usize = 100;

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub tmux_session: String,
    pub interval: Duration,
    pub scrollback_lines: u32,
    pub min_tokens_for_match: usize,
    pub max_logs_per_poll: usize,
    pub rg_threads: Option<usize>,
    /// Thread count for the orphan rematch pass (larger working set).
    pub orphan_rg_threads: Option<usize>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            tmux_session: "agentboard".to_string(),
            interval: crate::env::refresh_interval(),
            scrollback_lines: crate::env::scrollback_lines(),
            min_tokens_for_match: MIN_CREATION_TOKENS,
            max_logs_per_poll: 40,
            rg_threads: ab_adapters::env::rg_threads(),
            orphan_rg_threads: None,
        }
    }
}

struct PollerState {
    poll_in_flight: bool,
    force_orphan_rematch: bool,
    first_poll_done: bool,
    /// Logs without a session id or below the token floor, by mtime.
    empty_log_cache: HashMap<String, DateTime<Utc>>,
    /// Last rematch/resurrection attempt per session.
    rematch_attempts: HashMap<String, Instant>,
}

/// Periodic scan+match driver.
pub struct LogPoller<T: TmuxClient> {
    db: Arc<SessionDatabase>,
    registry: Arc<SessionRegistry>,
    worker: WorkerHandle,
    tmux: T,
    store: LogStore,
    capture_lock: Arc<CaptureLock>,
    config: PollerConfig,
    state: Mutex<PollerState>,
    next_request_id: AtomicU64,
}

impl<T: TmuxClient> LogPoller<T> {
    pub fn new(
        db: Arc<SessionDatabase>,
        registry: Arc<SessionRegistry>,
        worker: WorkerHandle,
        tmux: T,
        store: LogStore,
        capture_lock: Arc<CaptureLock>,
        config: PollerConfig,
    ) -> Self {
        Self {
            db,
            registry,
            worker,
            tmux,
            store,
            capture_lock,
            config,
            state: Mutex::new(PollerState {
                poll_in_flight: false,
                force_orphan_rematch: true,
                first_poll_done: false,
                empty_log_cache: HashMap::new(),
                rematch_attempts: HashMap::new(),
            }),
            next_request_id: AtomicU64::new(1),
        }
    }

    #[cfg(test)]
    fn set_in_flight(&self, in_flight: bool) {
        self.state.lock().poll_in_flight = in_flight;
    }

    /// Run forever on the configured interval.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.poll_once().await;
        }
    }

    /// One poll cycle. Returns zero stats immediately when a cycle is
    /// already in flight.
    pub async fn poll_once(&self) -> PollStats {
        {
            let mut state = self.state.lock();
            if state.poll_in_flight {
                return PollStats::skipped();
            }
            state.poll_in_flight = true;
        }

        let started = Instant::now();
        let mut stats = self.poll_cycle().await;
        stats.duration_ms = started.elapsed().as_millis() as u64;

        self.state.lock().poll_in_flight = false;

        tracing::info!(
            logs_scanned = stats.logs_scanned,
            new_sessions = stats.new_sessions,
            matches = stats.matches,
            orphans = stats.orphans,
            errors = stats.errors,
            duration_ms = stats.duration_ms,
            "log_poll"
        );
        stats
    }

    async fn poll_cycle(&self) -> PollStats {
        let mut stats = PollStats::default();

        let mut windows_ok = true;
        let windows = match self.tmux.list_windows(&self.config.tmux_session).await {
            Ok(w) => w,
            Err(e) => {
                tracing::debug!(error = %e, "window enumeration failed");
                stats.errors += 1;
                windows_ok = false;
                Vec::new()
            }
        };

        let mut sessions = match self.db.list_all() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "session listing failed");
                stats.errors += 1;
                return stats;
            }
        };

        if windows_ok {
            self.orphan_vanished_windows(&windows, &mut sessions, &mut stats);
        }

        let request = self.build_request(&windows, &sessions);
        match self.worker.request(request).await {
            Err(e) => {
                tracing::warn!(error = %e, "match worker request failed");
                stats.errors += 1;
                // Retry from scratch next cycle
                self.state.lock().force_orphan_rematch = true;
            }
            Ok(response) => {
                {
                    let mut state = self.state.lock();
                    state.force_orphan_rematch = false;
                    state.first_poll_done = true;
                }
                self.reconcile(response, &windows, &sessions, &mut stats)
                    .await;
            }
        }

        self.refresh_registry(&windows).await;
        self.resurrect_pinned(&mut stats).await;
        self.emit_agent_snapshot();

        stats
    }

    /// A record whose window is gone is orphaned immediately; the
    /// stored association is never trusted past the window's lifetime.
    fn orphan_vanished_windows(
        &self,
        windows: &[WindowSnapshot],
        sessions: &mut [AgentSessionRecord],
        stats: &mut PollStats,
    ) {
        let live: HashSet<&str> = windows.iter().map(|w| w.tmux_window.as_str()).collect();
        for record in sessions.iter_mut() {
            let Some(window) = record.current_window.as_deref() else {
                continue;
            };
            if live.contains(window) {
                continue;
            }
            match self.db.orphan(&record.session_id) {
                Ok(_) => {
                    tracing::info!(
                        session_id = %record.session_id,
                        window,
                        "window disappeared, orphaning session"
                    );
                    record.current_window = None;
                    stats.orphans += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, session_id = %record.session_id, "orphan failed");
                    stats.errors += 1;
                }
            }
        }
    }

    fn build_request(
        &self,
        windows: &[WindowSnapshot],
        sessions: &[AgentSessionRecord],
    ) -> WorkerRequest {
        let state = self.state.lock();

        let orphan_candidates: Vec<String> = sessions
            .iter()
            .filter(|s| s.current_window.is_none() && !s.is_codex_exec)
            .map(|s| normalize_log_path(&s.log_file_path))
            .collect();

        let needs_backfill = |s: &&AgentSessionRecord| match s.last_user_message.as_deref() {
            None => true,
            Some(m) => is_tool_notification(m),
        };
        let last_message_candidates: Vec<String> = sessions
            .iter()
            .filter(|s| s.current_window.is_some())
            .filter(needs_backfill)
            .map(|s| normalize_log_path(&s.log_file_path))
            .collect();

        // On the first poll, widen the scan so stored sessions without a
        // usable message get one
        let max_logs = if !state.first_poll_done && !last_message_candidates.is_empty() {
            self.config.max_logs_per_poll.max(BACKFILL_MAX_LOGS)
        } else {
            self.config.max_logs_per_poll
        };

        WorkerRequest {
            id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
            windows: windows.to_vec(),
            max_logs_per_poll: max_logs,
            sessions: sessions.to_vec(),
            scrollback_lines: self.config.scrollback_lines,
            min_tokens_for_match: self.config.min_tokens_for_match,
            force_orphan_rematch: state.force_orphan_rematch,
            orphan_candidates,
            last_message_candidates,
            rg_threads: self.config.rg_threads,
            orphan_rg_threads: self.config.orphan_rg_threads,
            profile: false,
        }
    }

    async fn reconcile(
        &self,
        response: WorkerResponse,
        windows: &[WindowSnapshot],
        sessions: &[AgentSessionRecord],
        stats: &mut PollStats,
    ) {
        let by_path: HashMap<String, &AgentSessionRecord> = sessions
            .iter()
            .map(|s| (normalize_log_path(&s.log_file_path), s))
            .collect();

        // Match-eligible set: logs that had a chance to claim a window
        // this cycle. Used both for orphan re-activation and for the
        // steal rule: a claimant only loses its window when its own log
        // participated and still lost.
        let mut eligible: HashSet<String> = gate_entries(
            &response.entries,
            &by_path,
            self.config.min_tokens_for_match,
        )
        .into_iter()
        .collect();
        eligible.extend(response.orphan_entries.iter().map(|e| e.log_path.clone()));

        let mut window_by_log: HashMap<String, String> = HashMap::new();
        for pair in response.matches.iter().chain(response.orphan_matches.iter()) {
            window_by_log.insert(pair.log_path.clone(), pair.tmux_window.clone());
        }

        let mut seen: HashSet<String> = HashSet::new();
        for entry in response.entries.iter().chain(response.orphan_entries.iter()) {
            if !seen.insert(entry.log_path.clone()) {
                continue;
            }
            stats.logs_scanned += 1;

            let existing = match self.lookup_record(entry) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(error = %e, log = %entry.log_path, "record lookup failed");
                    stats.errors += 1;
                    continue;
                }
            };

            // Known-empty logs only get another look when they grow
            if existing.is_none() && self.empty_cache_holds(entry) {
                continue;
            }

            let result = match existing {
                Some(record) => {
                    self.reconcile_existing(&record, entry, &eligible, &window_by_log, windows, stats)
                        .await
                }
                None => self.create_record(entry, &eligible, &window_by_log, stats),
            };
            if let Err(e) = result {
                tracing::error!(error = %e, log = %entry.log_path, "reconciliation failed");
                stats.errors += 1;
            }
        }
    }

    fn lookup_record(
        &self,
        entry: &LogEntrySnapshot,
    ) -> Result<Option<AgentSessionRecord>, DbError> {
        if let Some(record) = self.db.get_by_log_path(&entry.log_path)? {
            return Ok(Some(record));
        }
        match entry.session_id.as_deref() {
            Some(id) => self.db.get(id),
            None => Ok(None),
        }
    }

    async fn reconcile_existing(
        &self,
        record: &AgentSessionRecord,
        entry: &LogEntrySnapshot,
        eligible: &HashSet<String>,
        window_by_log: &HashMap<String, String>,
        windows: &[WindowSnapshot],
        stats: &mut PollStats,
    ) -> Result<(), DbError> {
        let mut patch = RecordPatch::default();
        let activity_advanced = entry.mtime > record.last_activity_at;
        if activity_advanced {
            patch.last_activity_at = Some(entry.mtime);
        }

        if let Some(size) = self.store.times(&entry.log_path).map(|t| t.size as i64) {
            if record.last_known_log_size != Some(size) {
                patch.last_known_log_size = Some(Some(size));
            }
        }

        self.patch_last_user_message(record, entry, activity_advanced, &mut patch);

        if record.current_window.is_none() {
            self.try_reactivate(
                record,
                entry,
                eligible,
                window_by_log,
                windows,
                &mut patch,
                stats,
            )?;
        }

        if !patch.is_empty() {
            self.db.update(&record.session_id, &patch)?;
        }
        Ok(())
    }

    /// Update `last_user_message` iff the stored value is unusable, or
    /// activity advanced and the value changed, and the window is not
    /// under an Enter-key capture lock.
    fn patch_last_user_message(
        &self,
        record: &AgentSessionRecord,
        entry: &LogEntrySnapshot,
        activity_advanced: bool,
        patch: &mut RecordPatch,
    ) {
        let Some(new_message) = entry.last_user_message.as_deref() else {
            return;
        };
        let current_usable = record
            .last_user_message
            .as_deref()
            .filter(|m| !is_tool_notification(m));
        let should_update = match current_usable {
            None => true,
            Some(current) => activity_advanced && current != new_message,
        };
        if !should_update {
            return;
        }
        if let Some(window) = record.current_window.as_deref() {
            if self.capture_lock.is_locked(window) {
                tracing::debug!(window, "last_user_message update suppressed by capture lock");
                return;
            }
        }
        patch.last_user_message = Some(Some(new_message.to_string()));
    }

    /// Attempt to re-attach an orphaned record to a live window.
    #[allow(clippy::too_many_arguments)]
    fn try_reactivate(
        &self,
        record: &AgentSessionRecord,
        entry: &LogEntrySnapshot,
        eligible: &HashSet<String>,
        window_by_log: &HashMap<String, String>,
        windows: &[WindowSnapshot],
        patch: &mut RecordPatch,
        stats: &mut PollStats,
    ) -> Result<(), DbError> {
        let activity_advanced = entry.mtime > record.last_activity_at;
        if !activity_advanced && !eligible.contains(&entry.log_path) {
            return Ok(());
        }
        if !self.attempt_allowed(&record.session_id) {
            return Ok(());
        }

        let exact = window_by_log.get(&entry.log_path).cloned();
        let target = match exact {
            Some(window) => Some(window),
            // Fallback: a managed window named after the record
            None => windows
                .iter()
                .find(|w| {
                    w.name == record.display_name && self.registry.is_managed(&w.tmux_window)
                })
                .map(|w| w.tmux_window.clone()),
        };
        self.record_attempt(&record.session_id);

        let Some(window) = target else {
            return Ok(());
        };

        match self.db.get_by_window(&window)? {
            None => {}
            Some(claimant) if claimant.session_id == record.session_id => return Ok(()),
            Some(claimant) => {
                // Steal only from a claimant whose own log competed this
                // cycle and still lost the window
                if !eligible.contains(&normalize_log_path(&claimant.log_file_path)) {
                    return Ok(());
                }
                self.db.orphan(&claimant.session_id)?;
                stats.orphans += 1;
                tracing::info!(
                    loser = %claimant.session_id,
                    winner = %record.session_id,
                    window = %window,
                    "window reassigned by ordered match"
                );
            }
        }

        patch.current_window = Some(Some(window.clone()));
        // Re-derive the display name from the window it now lives in
        if let Some(w) = windows.iter().find(|w| w.tmux_window == window) {
            if !w.name.is_empty() && w.name != record.display_name {
                if let Ok(name) = self.unique_display_name(&w.name, Some(&record.session_id)) {
                    patch.display_name = Some(name);
                }
            }
        }
        stats.matches += 1;
        self.registry
            .emit_session_activated(&record.session_id, &window);
        Ok(())
    }

    /// Create a record for a newly discovered log.
    fn create_record(
        &self,
        entry: &LogEntrySnapshot,
        eligible: &HashSet<String>,
        window_by_log: &HashMap<String, String>,
        stats: &mut PollStats,
    ) -> Result<(), DbError> {
        let Some(session_id) = entry.session_id.clone() else {
            self.cache_empty(entry);
            return Ok(());
        };
        if entry.log_token_count < MIN_CREATION_TOKENS {
            self.cache_empty(entry);
            return Ok(());
        }
        // Subagent logs never become primary records
        if entry.is_codex_subagent {
            return Ok(());
        }

        let mut matched_window = window_by_log.get(&entry.log_path).cloned();
        if let Some(ref window) = matched_window {
            if let Some(claimant) = self.db.get_by_window(window)? {
                if eligible.contains(&normalize_log_path(&claimant.log_file_path)) {
                    // Decisive ordered-match win over the claimant's log
                    self.db.orphan(&claimant.session_id)?;
                    stats.orphans += 1;
                } else {
                    // Non-stealing: the new session starts orphaned
                    matched_window = None;
                }
            }
        }

        let base_name = self.derive_base_name(entry, matched_window.as_deref());
        let display_name = self.unique_display_name(&base_name, None)?;

        let size = self.store.times(&entry.log_path).map(|t| t.size as i64);
        let record = AgentSessionRecord {
            session_id,
            log_file_path: entry.log_path.clone(),
            project_path: entry.project_path.clone().unwrap_or_default(),
            agent_type: match entry.agent_type {
                Some(agent) => agent,
                None => return Ok(()), // outside all roots; not ours
            },
            display_name,
            created_at: entry.birthtime,
            last_activity_at: entry.mtime,
            last_user_message: entry.last_user_message.clone(),
            current_window: matched_window.clone(),
            is_pinned: false,
            last_resume_error: None,
            last_known_log_size: size,
            is_codex_exec: entry.is_codex_exec,
        };

        match self.db.insert(&record) {
            Ok(()) => {
                stats.new_sessions += 1;
                if matched_window.is_some() {
                    stats.matches += 1;
                }
                Ok(())
            }
            Err(DbError::DuplicateDisplayName(name)) => {
                // Raced another insert; retry once with a random suffix
                let mut retry = record.clone();
                retry.display_name = format!("{}-{}", name, short_random_suffix());
                self.db.insert(&retry)?;
                stats.new_sessions += 1;
                Ok(())
            }
            Err(DbError::DuplicateLogPath(path)) => {
                // Unique log paths are established by lookup order above;
                // reaching this is a bug worth reporting loudly
                tracing::error!(log = %path, "duplicate log path on insert");
                stats.errors += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn derive_base_name(&self, entry: &LogEntrySnapshot, window: Option<&str>) -> String {
        if let Some(target) = window {
            if let Some(session) = self.registry.get(target) {
                if !session.name.is_empty() {
                    return session.name;
                }
            }
        }
        if let Some(project) = entry.project_path.as_deref() {
            if let Some(leaf) = project.rsplit('/').find(|s| !s.is_empty()) {
                return leaf.to_string();
            }
        }
        entry
            .log_path
            .rsplit('/')
            .next()
            .map(|f| f.trim_end_matches(".jsonl").to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "session".to_string())
    }

    /// Find a free display name by appending `-2`, `-3`, … and finally
    /// a random short suffix.
    fn unique_display_name(
        &self,
        base: &str,
        exclude_session: Option<&str>,
    ) -> Result<String, DbError> {
        if !self.db.display_name_exists(base, exclude_session)? {
            return Ok(base.to_string());
        }
        for i in 2..=9 {
            let candidate = format!("{}-{}", base, i);
            if !self.db.display_name_exists(&candidate, exclude_session)? {
                return Ok(candidate);
            }
        }
        Ok(format!("{}-{}", base, short_random_suffix()))
    }

    fn empty_cache_holds(&self, entry: &LogEntrySnapshot) -> bool {
        let state = self.state.lock();
        match state.empty_log_cache.get(&entry.log_path) {
            Some(cached) => *cached >= entry.mtime,
            None => false,
        }
    }

    fn cache_empty(&self, entry: &LogEntrySnapshot) {
        let mut state = self.state.lock();
        match state.empty_log_cache.get(&entry.log_path) {
            Some(cached) if *cached >= entry.mtime => {}
            _ => {
                state
                    .empty_log_cache
                    .insert(entry.log_path.clone(), entry.mtime);
            }
        }
    }

    fn attempt_allowed(&self, session_id: &str) -> bool {
        let state = self.state.lock();
        match state.rematch_attempts.get(session_id) {
            Some(at) => at.elapsed() >= REMATCH_COOLDOWN,
            None => true,
        }
    }

    fn record_attempt(&self, session_id: &str) {
        self.state
            .lock()
            .rematch_attempts
            .insert(session_id.to_string(), Instant::now());
    }

    /// Spawn resume windows for pinned orphans.
    async fn resurrect_pinned(&self, stats: &mut PollStats) {
        let pinned = match self.db.list_pinned_orphaned() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "pinned orphan listing failed");
                stats.errors += 1;
                return;
            }
        };

        for record in pinned {
            if !self.attempt_allowed(&record.session_id) {
                continue;
            }
            self.record_attempt(&record.session_id);

            match resume::resurrect_session(&self.tmux, &self.config.tmux_session, &record).await {
                Ok(window) => {
                    self.registry.mark_managed(&window);
                    let patch = RecordPatch {
                        current_window: Some(Some(window.clone())),
                        last_resume_error: Some(None),
                        ..Default::default()
                    };
                    if let Err(e) = self.db.update(&record.session_id, &patch) {
                        tracing::error!(error = %e, "resume bookkeeping failed");
                        stats.errors += 1;
                    } else {
                        stats.matches += 1;
                        self.registry
                            .emit_session_activated(&record.session_id, &window);
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        session_id = %record.session_id,
                        error = %error,
                        "resume failed"
                    );
                    let patch = RecordPatch {
                        last_resume_error: Some(Some(error)),
                        ..Default::default()
                    };
                    if let Err(e) = self.db.update(&record.session_id, &patch) {
                        tracing::error!(error = %e, "resume error bookkeeping failed");
                        stats.errors += 1;
                    }
                }
            }
        }
    }

    /// Rebuild the registry's session slice from the live windows.
    async fn refresh_registry(&self, windows: &[WindowSnapshot]) {
        let now = Utc::now();
        let mut list = Vec::with_capacity(windows.len());
        for window in windows {
            let record = self
                .db
                .get_by_window(&window.tmux_window)
                .ok()
                .flatten()
                .filter(|r| !r.is_codex_exec);
            let scrollback = self
                .tmux
                .capture_scrollback(&window.tmux_window, STATUS_CAPTURE_LINES, false)
                .await
                .unwrap_or_default();
            let existing = self.registry.get(&window.tmux_window);
            let source = if self.registry.is_managed(&window.tmux_window) {
                SessionSource::Managed
            } else {
                SessionSource::External
            };
            list.push(Session {
                id: window.tmux_window.clone(),
                name: window.name.clone(),
                tmux_window: window.tmux_window.clone(),
                project_path: window.pane_current_path.clone(),
                status: derive_status(&scrollback),
                last_activity: window.activity_time().unwrap_or(now),
                created_at: existing.map(|s| s.created_at).unwrap_or(now),
                source,
                agent_type: record.as_ref().map(|r| r.agent_type),
                agent_session_id: record.map(|r| r.session_id),
            });
        }
        self.registry.replace_sessions(list);
    }

    fn emit_agent_snapshot(&self) {
        match self.db.list_all() {
            Ok(records) => {
                let visible: Vec<AgentSessionRecord> =
                    records.into_iter().filter(|r| !r.is_codex_exec).collect();
                self.registry.emit_agent_sessions(visible);
            }
            Err(e) => tracing::error!(error = %e, "agent-session snapshot failed"),
        }
    }
}

fn short_random_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..4)
        .map(|_| format!("{:x}", rng.random::<u8>() % 16))
        .collect()
}

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;
