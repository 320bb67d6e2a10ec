//! Append-only operation log.
//!
//! # Responsibility
//! - Record one row per store operation: who did what, and when.
//! - Give version rows something stable to point at via `_log_id` columns.
//!
//! # Invariants
//! - Log rows are never updated or deleted.

use crate::model::actor::Actor;
use crate::model::audit::{LogEntry, LogKind};
use crate::repo::{StoreError, StoreResult};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const LOG_SELECT_SQL: &str = "SELECT
    log_id,
    kind,
    actor_id,
    actor_name,
    detail,
    created_at
FROM logs";

/// Appends one log row and returns its id.
pub fn append_log(
    conn: &Connection,
    kind: LogKind,
    actor: &Actor,
    detail: Option<&str>,
) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO logs (kind, actor_id, actor_name, detail)
         VALUES (?1, ?2, ?3, ?4);",
        params![
            kind.as_str(),
            actor.id.to_string(),
            actor.name.as_str(),
            detail,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Loads one log row by id.
pub fn get_log(conn: &Connection, log_id: i64) -> StoreResult<Option<LogEntry>> {
    let mut stmt = conn.prepare(&format!("{LOG_SELECT_SQL} WHERE log_id = ?1;"))?;
    let mut rows = stmt.query([log_id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_log_row(row)?));
    }
    Ok(None)
}

/// Lists the newest log rows, optionally filtered by kind.
pub fn list_logs(
    conn: &Connection,
    kind: Option<LogKind>,
    limit: u32,
) -> StoreResult<Vec<LogEntry>> {
    let mut entries = Vec::new();
    if let Some(kind) = kind {
        let mut stmt = conn.prepare(&format!(
            "{LOG_SELECT_SQL}
             WHERE kind = ?1
             ORDER BY log_id DESC
             LIMIT ?2;"
        ))?;
        let mut rows = stmt.query(params![kind.as_str(), i64::from(limit)])?;
        while let Some(row) = rows.next()? {
            entries.push(parse_log_row(row)?);
        }
    } else {
        let mut stmt = conn.prepare(&format!(
            "{LOG_SELECT_SQL}
             ORDER BY log_id DESC
             LIMIT ?1;"
        ))?;
        let mut rows = stmt.query([i64::from(limit)])?;
        while let Some(row) = rows.next()? {
            entries.push(parse_log_row(row)?);
        }
    }
    Ok(entries)
}

fn parse_log_row(row: &Row<'_>) -> StoreResult<LogEntry> {
    let kind_text: String = row.get("kind")?;
    let kind = LogKind::parse(&kind_text).ok_or_else(|| {
        StoreError::InvalidData(format!("invalid log kind `{kind_text}` in logs.kind"))
    })?;

    let actor_id_text: String = row.get("actor_id")?;
    let actor_id = Uuid::parse_str(&actor_id_text).map_err(|_| {
        StoreError::InvalidData(format!("invalid uuid `{actor_id_text}` in logs.actor_id"))
    })?;

    Ok(LogEntry {
        log_id: row.get("log_id")?,
        kind,
        actor_id,
        actor_name: row.get("actor_name")?,
        detail: row.get("detail")?,
        created_at: row.get("created_at")?,
    })
}
