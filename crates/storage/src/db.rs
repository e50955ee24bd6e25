// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session database.
//!
//! Single-writer: every mutation goes through [`SessionDatabase`], which
//! serializes access with an internal mutex. Constraints (unique
//! session_id / log_file_path / display_name, the agent_type CHECK) are
//! enforced at the schema level, not just in application code.

use crate::schema;
use ab_core::{AgentSessionRecord, AgentType, RecordPatch};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::path::Path;
use thiserror::Error;

/// Errors from database operations
#[derive(Debug, Error)]
pub enum DbError {
    #[error("duplicate session id: {0}")]
    DuplicateSessionId(String),
    #[error("duplicate log file path: {0}")]
    DuplicateLogPath(String),
    #[error("duplicate display name: {0}")]
    DuplicateDisplayName(String),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent store of [`AgentSessionRecord`]s keyed by session id.
pub struct SessionDatabase {
    conn: Mutex<Connection>,
}

impl SessionDatabase {
    /// Open (creating if needed) the database at `path`.
    ///
    /// The parent directory is created with mode 0700.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            create_private_dir(parent)?;
        }
        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let mut conn = Connection::open_in_memory()?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a new record. Uniqueness violations come back as typed
    /// errors so the poller can disambiguate display names and report
    /// log-path conflicts as bugs.
    pub fn insert(&self, record: &AgentSessionRecord) -> Result<(), DbError> {
        let conn = self.conn.lock();
        let result = conn.execute(
            r#"
            INSERT INTO agent_sessions (
                session_id, log_file_path, project_path, agent_type,
                display_name, created_at, last_activity_at,
                last_user_message, current_window, is_pinned,
                last_resume_error, last_known_log_size, is_codex_exec
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                record.session_id,
                record.log_file_path,
                record.project_path,
                record.agent_type.as_str(),
                record.display_name,
                fmt_time(record.created_at),
                fmt_time(record.last_activity_at),
                record.last_user_message,
                record.current_window,
                record.is_pinned as i64,
                record.last_resume_error,
                record.last_known_log_size,
                record.is_codex_exec as i64,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(map_unique_violation(e, record)),
        }
    }

    /// Apply a field-level patch to a record. Returns false when no row
    /// has the given session id.
    pub fn update(&self, session_id: &str, patch: &RecordPatch) -> Result<bool, DbError> {
        if patch.is_empty() {
            return Ok(self.get(session_id)?.is_some());
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref v) = patch.project_path {
            sets.push("project_path = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(ref v) = patch.display_name {
            sets.push("display_name = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = patch.last_activity_at {
            sets.push("last_activity_at = ?");
            values.push(Box::new(fmt_time(v)));
        }
        if let Some(ref v) = patch.last_user_message {
            sets.push("last_user_message = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(ref v) = patch.current_window {
            sets.push("current_window = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = patch.is_pinned {
            sets.push("is_pinned = ?");
            values.push(Box::new(v as i64));
        }
        if let Some(ref v) = patch.last_resume_error {
            sets.push("last_resume_error = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = patch.last_known_log_size {
            sets.push("last_known_log_size = ?");
            values.push(Box::new(v));
        }

        let sql = format!(
            "UPDATE agent_sessions SET {} WHERE session_id = ?{}",
            renumber_placeholders(&sets),
            sets.len() + 1
        );
        values.push(Box::new(session_id.to_string()));

        let conn = self.conn.lock();
        let params: Vec<&dyn ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let changed = conn.execute(&sql, params.as_slice()).map_err(|e| {
            if let Some(name) = patch.display_name.as_deref() {
                map_display_name_violation(e, name)
            } else {
                DbError::Sqlite(e)
            }
        })?;
        Ok(changed > 0)
    }

    pub fn get(&self, session_id: &str) -> Result<Option<AgentSessionRecord>, DbError> {
        self.query_one("session_id = ?1", &[&session_id])
    }

    pub fn get_by_log_path(&self, log_path: &str) -> Result<Option<AgentSessionRecord>, DbError> {
        self.query_one("log_file_path = ?1", &[&log_path])
    }

    pub fn get_by_window(&self, window: &str) -> Result<Option<AgentSessionRecord>, DbError> {
        self.query_one("current_window = ?1", &[&window])
    }

    /// Records currently attached to a window.
    pub fn list_active(&self) -> Result<Vec<AgentSessionRecord>, DbError> {
        self.query_many("current_window IS NOT NULL", &[])
    }

    /// Orphaned records, optionally only those active within the last
    /// `max_age_hours`.
    pub fn list_inactive(
        &self,
        max_age_hours: Option<f64>,
    ) -> Result<Vec<AgentSessionRecord>, DbError> {
        match max_age_hours {
            None => self.query_many("current_window IS NULL", &[]),
            Some(hours) => {
                let cutoff = Utc::now() - chrono::Duration::seconds((hours * 3600.0) as i64);
                let cutoff = fmt_time(cutoff);
                self.query_many(
                    "current_window IS NULL AND last_activity_at >= ?1",
                    &[&cutoff],
                )
            }
        }
    }

    pub fn list_all(&self) -> Result<Vec<AgentSessionRecord>, DbError> {
        self.query_many("1 = 1", &[])
    }

    /// Detach a record from its window. Returns false if it had none.
    pub fn orphan(&self, session_id: &str) -> Result<bool, DbError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE agent_sessions SET current_window = NULL
             WHERE session_id = ?1 AND current_window IS NOT NULL",
            [session_id],
        )?;
        Ok(changed > 0)
    }

    /// Whether a display name is taken, optionally excluding one session.
    pub fn display_name_exists(
        &self,
        name: &str,
        exclude_session_id: Option<&str>,
    ) -> Result<bool, DbError> {
        let conn = self.conn.lock();
        let count: i64 = match exclude_session_id {
            Some(exclude) => conn.query_row(
                "SELECT COUNT(*) FROM agent_sessions
                 WHERE display_name = ?1 AND session_id != ?2",
                params![name, exclude],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM agent_sessions WHERE display_name = ?1",
                [name],
                |row| row.get(0),
            )?,
        };
        Ok(count > 0)
    }

    pub fn set_pinned(&self, session_id: &str, pinned: bool) -> Result<bool, DbError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE agent_sessions SET is_pinned = ?1 WHERE session_id = ?2",
            params![pinned as i64, session_id],
        )?;
        Ok(changed > 0)
    }

    /// Pinned orphans, the resurrection work list.
    pub fn list_pinned_orphaned(&self) -> Result<Vec<AgentSessionRecord>, DbError> {
        self.query_many("is_pinned = 1 AND current_window IS NULL", &[])
    }

    pub fn get_app_setting(&self, key: &str) -> Result<Option<String>, DbError> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT value FROM app_settings WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_app_setting(&self, key: &str, value: &str) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO app_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn query_one(
        &self,
        predicate: &str,
        args: &[&dyn ToSql],
    ) -> Result<Option<AgentSessionRecord>, DbError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM agent_sessions WHERE {}", COLUMNS, predicate);
        let mut stmt = conn.prepare(&sql)?;
        let record = stmt
            .query_row(args, |row| Ok(row_to_record(row)))
            .optional()?;
        record.transpose()
    }

    fn query_many(
        &self,
        predicate: &str,
        args: &[&dyn ToSql],
    ) -> Result<Vec<AgentSessionRecord>, DbError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM agent_sessions WHERE {} ORDER BY created_at ASC",
            COLUMNS, predicate
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, |row| Ok(row_to_record(row)))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }
}

const COLUMNS: &str = "session_id, log_file_path, project_path, agent_type, display_name, \
                       created_at, last_activity_at, last_user_message, current_window, \
                       is_pinned, last_resume_error, last_known_log_size, is_codex_exec";

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::CorruptRow(format!("bad timestamp {:?}: {}", s, e)))
}

fn row_to_record(row: &Row<'_>) -> Result<AgentSessionRecord, DbError> {
    let agent_type: String = row.get(3)?;
    let agent_type: AgentType = agent_type
        .parse()
        .map_err(|e| DbError::CorruptRow(format!("{}", e)))?;
    let created_at: String = row.get(5)?;
    let last_activity_at: String = row.get(6)?;
    let is_pinned: i64 = row.get(9)?;
    let is_codex_exec: i64 = row.get(12)?;
    Ok(AgentSessionRecord {
        session_id: row.get(0)?,
        log_file_path: row.get(1)?,
        project_path: row.get(2)?,
        agent_type,
        display_name: row.get(4)?,
        created_at: parse_time(&created_at)?,
        last_activity_at: parse_time(&last_activity_at)?,
        last_user_message: row.get(7)?,
        current_window: row.get(8)?,
        is_pinned: is_pinned != 0,
        last_resume_error: row.get(10)?,
        last_known_log_size: row.get(11)?,
        is_codex_exec: is_codex_exec != 0,
    })
}

/// Map a unique-constraint failure from insert to the offending field.
fn map_unique_violation(e: rusqlite::Error, record: &AgentSessionRecord) -> DbError {
    let message = e.to_string();
    if message.contains("agent_sessions.session_id") {
        DbError::DuplicateSessionId(record.session_id.clone())
    } else if message.contains("agent_sessions.log_file_path") {
        DbError::DuplicateLogPath(record.log_file_path.clone())
    } else if message.contains("agent_sessions.display_name") {
        DbError::DuplicateDisplayName(record.display_name.clone())
    } else {
        DbError::Sqlite(e)
    }
}

fn map_display_name_violation(e: rusqlite::Error, name: &str) -> DbError {
    if e.to_string().contains("agent_sessions.display_name") {
        DbError::DuplicateDisplayName(name.to_string())
    } else {
        DbError::Sqlite(e)
    }
}

/// Rewrite `col = ?` placeholders to numbered `?N` form.
fn renumber_placeholders(sets: &[&str]) -> String {
    sets.iter()
        .enumerate()
        .map(|(i, s)| s.replace('?', &format!("?{}", i + 1)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Create a directory (and parents) readable only by the owner.
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    if path.as_os_str().is_empty() || path.is_dir() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(path)
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(path)
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
