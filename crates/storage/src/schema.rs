// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schema migrations for the session database.
//!
//! Versioned via `PRAGMA user_version`. Column additions are idempotent
//! `ALTER TABLE ... ADD COLUMN` steps guarded by `pragma_table_info`;
//! CHECK-constraint changes rebuild the table with a rename-copy-drop
//! sequence inside one transaction.

use crate::db::DbError;
use rusqlite::Connection;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 4;

/// Bring a connection up to [`SCHEMA_VERSION`].
pub fn migrate(conn: &mut Connection) -> Result<(), DbError> {
    let mut version = user_version(conn)?;
    while version < SCHEMA_VERSION {
        let next = version + 1;
        let tx = conn.transaction()?;
        match next {
            1 => create_base_schema(&tx)?,
            2 => add_column(&tx, "agent_sessions", "last_known_log_size", "INTEGER")?,
            3 => add_column(
                &tx,
                "agent_sessions",
                "is_codex_exec",
                "INTEGER NOT NULL DEFAULT 0",
            )?,
            4 => {
                dedupe_display_names(&tx)?;
                widen_agent_type_check(&tx)?;
            }
            _ => return Err(DbError::Migration(format!("no migration to v{}", next))),
        }
        tx.execute_batch(&format!("PRAGMA user_version = {}", next))?;
        tx.commit()?;
        tracing::debug!(from = version, to = next, "schema migrated");
        version = next;
    }
    Ok(())
}

fn user_version(conn: &Connection) -> Result<u32, DbError> {
    let v: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(v as u32)
}

/// v1: base tables. The original agent_type CHECK predates Pi support.
fn create_base_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS agent_sessions (
            session_id TEXT PRIMARY KEY NOT NULL CHECK (length(session_id) > 0),
            log_file_path TEXT NOT NULL UNIQUE,
            project_path TEXT NOT NULL DEFAULT '',
            agent_type TEXT NOT NULL CHECK (agent_type IN ('claude', 'codex')),
            display_name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            last_activity_at TEXT NOT NULL,
            last_user_message TEXT,
            current_window TEXT,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            last_resume_error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_agent_sessions_current_window
            ON agent_sessions(current_window);
        CREATE TABLE IF NOT EXISTS app_settings (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// Idempotent column addition.
fn add_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<(), DbError> {
    if column_exists(conn, table, column)? {
        return Ok(());
    }
    conn.execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table, column, decl
    ))?;
    Ok(())
}

pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DbError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// v4 part 1: de-duplicate display names left behind by earlier versions
/// that enforced uniqueness only in application code.
///
/// Duplicates are ordered by created_at ascending; the oldest keeps the
/// name, the rest get `-2`, `-3`, ... with a short time-derived suffix
/// when even that collides.
fn dedupe_display_names(conn: &Connection) -> Result<(), DbError> {
    let dupes: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT display_name FROM agent_sessions
             GROUP BY display_name HAVING COUNT(*) > 1",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<_, _>>()?
    };

    for name in dupes {
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT session_id FROM agent_sessions
                 WHERE display_name = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([&name], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for (i, session_id) in ids.iter().enumerate().skip(1) {
            let mut candidate = format!("{}-{}", name, i + 1);
            if name_taken(conn, &candidate)? {
                candidate = format!("{}-{}", candidate, short_suffix());
            }
            conn.execute(
                "UPDATE agent_sessions SET display_name = ?1 WHERE session_id = ?2",
                rusqlite::params![candidate, session_id],
            )?;
            tracing::warn!(old = %name, new = %candidate, "deduped display name during migration");
        }
    }
    Ok(())
}

fn name_taken(conn: &Connection, name: &str) -> Result<bool, DbError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM agent_sessions WHERE display_name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Short suffix derived from the clock's sub-second noise.
pub(crate) fn short_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    format!("{:04x}", nanos & 0xFFFF)
}

/// v4 part 2: widen the agent_type CHECK to include 'pi'.
///
/// SQLite cannot alter a CHECK constraint in place, so the table is
/// rebuilt: rename, copy into the new shape, drop the old table. Runs
/// inside the caller's transaction.
fn widen_agent_type_check(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        r#"
        ALTER TABLE agent_sessions RENAME TO agent_sessions_old;
        CREATE TABLE agent_sessions (
            session_id TEXT PRIMARY KEY NOT NULL CHECK (length(session_id) > 0),
            log_file_path TEXT NOT NULL UNIQUE,
            project_path TEXT NOT NULL DEFAULT '',
            agent_type TEXT NOT NULL CHECK (agent_type IN ('claude', 'codex', 'pi')),
            display_name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            last_activity_at TEXT NOT NULL,
            last_user_message TEXT,
            current_window TEXT,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            last_resume_error TEXT,
            last_known_log_size INTEGER,
            is_codex_exec INTEGER NOT NULL DEFAULT 0
        );
        INSERT INTO agent_sessions
            SELECT session_id, log_file_path, project_path, agent_type,
                   display_name, created_at, last_activity_at,
                   last_user_message, current_window, is_pinned,
                   last_resume_error, last_known_log_size, is_codex_exec
            FROM agent_sessions_old;
        DROP TABLE agent_sessions_old;
        CREATE INDEX IF NOT EXISTS idx_agent_sessions_current_window
            ON agent_sessions(current_window);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
