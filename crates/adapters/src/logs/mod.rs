// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only access to agent JSONL logs on disk.
//!
//! The store never writes, and every read error collapses to an empty
//! result: a log that cannot be read is treated as the absence of data
//! and skipped by the current poll cycle.

mod head;

pub use head::{extract_last_user_message, is_tool_notification, HeadMeta};

use ab_core::{normalize_log_path, AgentType, LogEntrySnapshot};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Initial byte budget for head/tail reads.
const READ_BUDGET_START: u64 = 64 * 1024;

/// Hard cap for expanding head/tail reads.
const READ_BUDGET_CAP: u64 = 1024 * 1024;

/// The three agent log roots, resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRoots {
    pub claude: PathBuf,
    pub codex: PathBuf,
    pub pi: PathBuf,
}

impl LogRoots {
    /// Resolve roots from `CLAUDE_CONFIG_DIR` / `CODEX_HOME` / `PI_HOME`.
    pub fn from_env() -> Self {
        Self {
            claude: crate::env::claude_config_dir().join("projects"),
            codex: crate::env::codex_home().join("sessions"),
            pi: crate::env::pi_home().join("agent").join("sessions"),
        }
    }

    pub fn root_for(&self, agent: AgentType) -> &Path {
        match agent {
            AgentType::Claude => &self.claude,
            AgentType::Codex => &self.codex,
            AgentType::Pi => &self.pi,
        }
    }

    /// Infer the agent type from which root contains `path`.
    pub fn agent_for_path(&self, path: &str) -> Option<AgentType> {
        let normalized = normalize_log_path(path);
        AgentType::all().into_iter().find(|agent| {
            let root = normalize_log_path(&self.root_for(*agent).to_string_lossy());
            !root.is_empty() && normalized.starts_with(&format!("{}/", root))
        })
    }

    /// Roots that exist on disk, as normalized strings.
    pub fn existing(&self) -> Vec<String> {
        AgentType::all()
            .into_iter()
            .map(|a| self.root_for(a))
            .filter(|p| p.is_dir())
            .map(|p| normalize_log_path(&p.to_string_lossy()))
            .collect()
    }
}

/// File metadata needed by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    pub mtime: DateTime<Utc>,
    pub birthtime: DateTime<Utc>,
    pub size: u64,
}

/// Filesystem abstraction over the agent log roots.
#[derive(Debug, Clone)]
pub struct LogStore {
    roots: LogRoots,
}

impl LogStore {
    pub fn new(roots: LogRoots) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &LogRoots {
        &self.roots
    }

    /// Enumerate `.jsonl` files under all roots, up to `max_depth`.
    ///
    /// Symlinks are not followed; directories named `subagents` are
    /// skipped entirely. Paths come back normalized.
    pub fn enumerate_jsonl_files(&self, max_depth: usize) -> Vec<String> {
        let mut files = Vec::new();
        for agent in AgentType::all() {
            let root = self.roots.root_for(agent);
            if !root.is_dir() {
                continue;
            }
            let walk = WalkDir::new(root)
                .max_depth(max_depth)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == "subagents"));
            for entry in walk.filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path().to_string_lossy();
                if path.ends_with(".jsonl") {
                    files.push(normalize_log_path(&path));
                }
            }
        }
        files
    }

    /// Infer the agent type of a log from its location under the roots.
    pub fn agent_type_for(&self, path: &str) -> Option<AgentType> {
        self.roots.agent_for_path(path)
    }

    /// mtime/birthtime/size for a log, or None if it cannot be read.
    ///
    /// Filesystems without a creation time fall back to mtime.
    pub fn times(&self, path: &str) -> Option<FileTimes> {
        let meta = std::fs::metadata(path).ok()?;
        let mtime = meta.modified().ok().map(DateTime::<Utc>::from)?;
        let birthtime = meta
            .created()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or(mtime);
        Some(FileTimes {
            mtime,
            birthtime,
            size: meta.len(),
        })
    }

    /// Read up to `byte_limit` bytes from the start of the file.
    pub fn read_head(&self, path: &str, byte_limit: u64) -> String {
        let Ok(file) = File::open(path) else {
            return String::new();
        };
        let mut buf = Vec::with_capacity(byte_limit.min(READ_BUDGET_CAP) as usize);
        let mut handle = file.take(byte_limit);
        if handle.read_to_end(&mut buf).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Read up to `byte_limit` bytes from the end of the file.
    ///
    /// The first (possibly truncated) line of the window is dropped so
    /// callers only see complete JSONL lines, unless the window covers
    /// the whole file.
    pub fn read_tail(&self, path: &str, byte_limit: u64) -> String {
        let Ok(mut file) = File::open(path) else {
            return String::new();
        };
        let Ok(len) = file.seek(SeekFrom::End(0)) else {
            return String::new();
        };
        let start = len.saturating_sub(byte_limit);
        if file.seek(SeekFrom::Start(start)).is_err() {
            return String::new();
        }
        let mut buf = Vec::with_capacity((len - start) as usize);
        if file.read_to_end(&mut buf).is_err() {
            return String::new();
        }
        let text = String::from_utf8_lossy(&buf).into_owned();
        if start == 0 {
            return text;
        }
        match text.find('\n') {
            Some(pos) => text[pos + 1..].to_string(),
            None => String::new(),
        }
    }

    /// Read the head, expanding the byte budget until the window ends on
    /// a complete JSON line.
    ///
    /// Starts at 64 KiB and quadruples up to 1 MiB, then stops and
    /// returns whatever was read.
    pub fn read_head_expanding(&self, path: &str) -> String {
        let mut budget = READ_BUDGET_START;
        loop {
            let text = self.read_head(path, budget);
            if ends_on_complete_json_line(&text) || budget >= READ_BUDGET_CAP {
                return text;
            }
            budget = (budget * 4).min(READ_BUDGET_CAP);
        }
    }

    /// Read the tail, expanding the byte budget until the window ends on
    /// a complete JSON line, up to `cap`.
    pub fn read_tail_expanding(&self, path: &str, cap: u64) -> String {
        let mut budget = READ_BUDGET_START.min(cap);
        loop {
            let text = self.read_tail(path, budget);
            if ends_on_complete_json_line(&text) || budget >= cap {
                return text;
            }
            budget = (budget * 4).min(cap);
        }
    }

    /// Build the per-poll snapshot for one log.
    ///
    /// Returns None when the file is gone or unreadable. A snapshot with
    /// `session_id: None` is still returned so the poller can cache the
    /// log as empty.
    pub fn snapshot(&self, path: &str) -> Option<LogEntrySnapshot> {
        let path = normalize_log_path(path);
        let times = self.times(&path)?;
        let head = self.read_head_expanding(&path);
        let meta = HeadMeta::parse(&head);
        let tail = self.read_tail(&path, READ_BUDGET_START);
        let last_user_message =
            extract_last_user_message(&tail).or_else(|| extract_last_user_message(&head));

        Some(LogEntrySnapshot {
            agent_type: self.agent_type_for(&path),
            log_path: path,
            mtime: times.mtime,
            birthtime: times.birthtime,
            session_id: meta.session_id,
            project_path: meta.project_path.map(|p| normalize_log_path(&p)),
            is_codex_subagent: meta.is_codex_subagent,
            is_codex_exec: meta.is_codex_exec,
            log_token_count: meta.token_count,
            last_user_message,
        })
    }
}

/// True when the last non-empty line of `text` parses as JSON.
///
/// Used as the truncation check for expanding reads: a window that cuts a
/// JSONL record mid-line fails to parse its final line.
fn ends_on_complete_json_line(text: &str) -> bool {
    let Some(last) = text.lines().rev().find(|l| !l.trim().is_empty()) else {
        // Nothing to parse - expanding further will not help
        return true;
    };
    serde_json::from_str::<serde_json::Value>(last.trim()).is_ok()
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
