use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::DatabaseError;
use crate::models::AuditEntry;

/// An audit entry waiting to be replayed to the backend.
#[derive(Debug, Clone)]
pub struct QueuedAudit {
    pub id: String,
    pub queued_at: DateTime<Utc>,
    pub entry: AuditEntry,
    pub attempts: i64,
    pub last_error: Option<String>,
}

/// Queue an audit entry after a failed remote write. Returns the outbox id.
pub fn enqueue_audit(
    conn: &Connection,
    entry: &AuditEntry,
    error: &str,
) -> Result<String, DatabaseError> {
    let id = Uuid::new_v4().to_string();
    let payload = serde_json::to_string(entry)?;
    conn.execute(
        "INSERT INTO audit_outbox (id, queued_at, record_id, payload, attempts, last_error, method)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
        params![
            id,
            Utc::now(),
            entry.record_id.as_ref().map(|r| r.as_str()),
            payload,
            error,
            entry.method.as_str(),
        ],
    )?;
    Ok(id)
}

/// All queued entries, oldest first.
pub fn pending_audits(conn: &Connection) -> Result<Vec<QueuedAudit>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, queued_at, payload, attempts, last_error FROM audit_outbox
         ORDER BY queued_at ASC, rowid ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, DateTime<Utc>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, queued_at, payload, attempts, last_error)| {
            Ok(QueuedAudit {
                id,
                queued_at,
                entry: serde_json::from_str(&payload)?,
                attempts,
                last_error,
            })
        })
        .collect()
}

/// Remove an entry after the backend acknowledged it.
pub fn remove_audit(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
    let deleted = conn.execute("DELETE FROM audit_outbox WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "audit_outbox".into(),
            id: id.into(),
        });
    }
    Ok(())
}

/// Bump the attempt counter after another failed replay.
pub fn record_audit_failure(conn: &Connection, id: &str, error: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE audit_outbox SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
        params![id, error],
    )?;
    Ok(())
}

pub fn count_pending_audits(conn: &Connection) -> Result<usize, DatabaseError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_outbox", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// Queued manual-stamp entries, reported apart for follow-up.
pub fn count_pending_by_method(conn: &Connection, method: &str) -> Result<usize, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM audit_outbox WHERE method = ?1",
        params![method],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}
