// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External grep adapter.
//!
//! Candidate search runs through ripgrep when available; when rg cannot
//! be spawned the adapter falls back to an in-process scan with the same
//! per-line semantics. Non-zero rg exits (no matches) are empty results,
//! never errors.

use crate::subprocess::{run_with_timeout, GREP_TIMEOUT};
use ab_core::normalize_log_path;
use async_trait::async_trait;
use std::io::BufRead;
use thiserror::Error;
use tokio::process::Command;
use walkdir::WalkDir;

/// Errors from grep operations
#[derive(Debug, Error)]
pub enum GrepError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Where to search: explicit files, or directories with a `*.jsonl` glob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrepScope {
    pub paths: Vec<String>,
    /// Restrict directory scans to `**/*.jsonl`.
    pub jsonl_glob: bool,
    pub threads: Option<usize>,
}

/// Adapter for searching log content by regex.
#[async_trait]
pub trait GrepClient: Clone + Send + Sync + 'static {
    /// Paths (normalized) of files with at least one line matching `pattern`.
    async fn files_with_matches(
        &self,
        pattern: &str,
        scope: &GrepScope,
    ) -> Result<Vec<String>, GrepError>;

    /// 1-based line numbers of all matches of `pattern` in one file.
    async fn match_lines(&self, pattern: &str, path: &str) -> Result<Vec<u64>, GrepError>;
}

/// Ripgrep-backed client with an in-process fallback.
#[derive(Clone, Copy, Default)]
pub struct RipgrepAdapter;

impl RipgrepAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GrepClient for RipgrepAdapter {
    async fn files_with_matches(
        &self,
        pattern: &str,
        scope: &GrepScope,
    ) -> Result<Vec<String>, GrepError> {
        if scope.paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = Command::new("rg");
        cmd.arg("-l").arg("-e").arg(pattern);
        if let Some(threads) = scope.threads {
            cmd.arg("--threads").arg(threads.to_string());
        }
        if scope.jsonl_glob {
            cmd.arg("--glob").arg("**/*.jsonl");
        }
        for path in &scope.paths {
            cmd.arg(path);
        }

        match run_with_timeout(cmd, GREP_TIMEOUT, "rg -l").await {
            Ok(output) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout);
                Ok(text
                    .lines()
                    .filter(|l| !l.is_empty())
                    .map(normalize_log_path)
                    .collect())
            }
            // Exit code 1: searched cleanly, found nothing
            Ok(output) if output.status.code() == Some(1) => Ok(Vec::new()),
            Ok(output) => {
                tracing::debug!(
                    code = ?output.status.code(),
                    "rg -l failed, falling back to in-process scan"
                );
                scan_files_with_matches(pattern, scope)
            }
            Err(e) => {
                tracing::debug!(error = %e, "rg unavailable, falling back to in-process scan");
                scan_files_with_matches(pattern, scope)
            }
        }
    }

    async fn match_lines(&self, pattern: &str, path: &str) -> Result<Vec<u64>, GrepError> {
        let mut cmd = Command::new("rg");
        cmd.arg("--json").arg("-e").arg(pattern).arg(path);

        match run_with_timeout(cmd, GREP_TIMEOUT, "rg --json").await {
            Ok(output) if output.status.success() => {
                Ok(parse_rg_json_lines(&String::from_utf8_lossy(&output.stdout)))
            }
            Ok(output) if output.status.code() == Some(1) => Ok(Vec::new()),
            Ok(_) | Err(_) => scan_match_lines(pattern, path),
        }
    }
}

/// Extract match line numbers from `rg --json` event output.
fn parse_rg_json_lines(text: &str) -> Vec<u64> {
    text.lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter(|v| v.get("type").and_then(|t| t.as_str()) == Some("match"))
        .filter_map(|v| {
            v.get("data")
                .and_then(|d| d.get("line_number"))
                .and_then(|n| n.as_u64())
        })
        .collect()
}

fn compile(pattern: &str) -> Result<regex::Regex, GrepError> {
    regex::Regex::new(pattern).map_err(|e| GrepError::InvalidPattern(e.to_string()))
}

/// Expand scope paths into concrete files, honoring the jsonl glob for
/// directories.
fn scope_files(scope: &GrepScope) -> Vec<String> {
    let mut files = Vec::new();
    for path in &scope.paths {
        let p = std::path::Path::new(path);
        if p.is_file() {
            files.push(normalize_log_path(path));
        } else if p.is_dir() {
            for entry in WalkDir::new(p)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.path().to_string_lossy();
                if !scope.jsonl_glob || name.ends_with(".jsonl") {
                    files.push(normalize_log_path(&name));
                }
            }
        }
    }
    files
}

fn scan_files_with_matches(pattern: &str, scope: &GrepScope) -> Result<Vec<String>, GrepError> {
    let re = compile(pattern)?;
    let mut hits = Vec::new();
    for file in scope_files(scope) {
        if file_has_match(&re, &file) {
            hits.push(file);
        }
    }
    Ok(hits)
}

fn file_has_match(re: &regex::Regex, path: &str) -> bool {
    let Ok(file) = std::fs::File::open(path) else {
        return false;
    };
    let reader = std::io::BufReader::new(file);
    for line in reader.lines() {
        let Ok(line) = line else { return false };
        if re.is_match(&line) {
            return true;
        }
    }
    false
}

fn scan_match_lines(pattern: &str, path: &str) -> Result<Vec<u64>, GrepError> {
    let re = compile(pattern)?;
    let Ok(file) = std::fs::File::open(path) else {
        return Ok(Vec::new());
    };
    let reader = std::io::BufReader::new(file);
    let mut lines = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let Ok(line) = line else { break };
        if re.is_match(&line) {
            lines.push(idx as u64 + 1);
        }
    }
    Ok(lines)
}

#[cfg(test)]
#[path = "grep_tests.rs"]
mod tests;
