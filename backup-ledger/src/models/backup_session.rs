use crate::error::Result;
use crate::session::SessionTotals;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

/// One backup run, tracked independently of per-unit state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSession {
    pub id: i64,
    pub backup_kind: String,
    pub container_id: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub units_fetched: i64,
    pub units_skipped: i64,
    pub units_failed: i64,
    pub bytes_transferred: i64,
    pub bytes_saved: i64,
    pub status: String,
    pub error_detail: Option<String>,
}

fn row_to_session(row: &Row) -> rusqlite::Result<BackupSession> {
    Ok(BackupSession {
        id: row.get("id")?,
        backup_kind: row.get("backup_kind")?,
        container_id: row.get("container_id")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        units_fetched: row.get("units_fetched")?,
        units_skipped: row.get("units_skipped")?,
        units_failed: row.get("units_failed").unwrap_or(0),
        bytes_transferred: row.get("bytes_transferred")?,
        bytes_saved: row.get("bytes_saved")?,
        status: row.get("status")?,
        error_detail: row.get("error_detail")?,
    })
}

pub fn create(conn: &Connection, backup_kind: &str, container_id: Option<&str>) -> Result<i64> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO backup_sessions (backup_kind, container_id, started_at, status)
         VALUES (?1, ?2, ?3, 'running')",
        params![backup_kind, container_id, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn finish(
    conn: &Connection,
    session_id: i64,
    totals: &SessionTotals,
    status: &str,
    error_detail: Option<&str>,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE backup_sessions
         SET ended_at = ?, units_fetched = ?, units_skipped = ?, units_failed = ?,
             bytes_transferred = ?, bytes_saved = ?, status = ?, error_detail = ?
         WHERE id = ?",
        params![
            now,
            totals.units_fetched,
            totals.units_skipped,
            totals.units_failed,
            totals.bytes_transferred,
            totals.bytes_saved,
            status,
            error_detail,
            session_id
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<BackupSession>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_sessions WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_session)?;
    Ok(rows.next().transpose()?)
}

pub fn find_all_ordered(conn: &Connection) -> Result<Vec<BackupSession>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_sessions ORDER BY started_at, id")?;
    let rows = stmt.query_map([], row_to_session)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Most recent sessions started after `cutoff` (RFC 3339), newest first.
pub fn find_recent(conn: &Connection, cutoff: &str, limit: i64) -> Result<Vec<BackupSession>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_sessions WHERE started_at > ?
         ORDER BY started_at DESC, id DESC LIMIT ?",
    )?;
    let rows = stmt.query_map(params![cutoff, limit], row_to_session)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Aggregate totals over completed sessions started after `cutoff`.
pub struct WindowAggregates {
    pub total_sessions: i64,
    pub units_fetched: i64,
    pub units_skipped: i64,
    pub units_failed: i64,
    pub bytes_transferred: i64,
    pub bytes_saved: i64,
}

pub fn aggregate_window(conn: &Connection, cutoff: &str) -> Result<WindowAggregates> {
    Ok(conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(units_fetched), 0),
                COALESCE(SUM(units_skipped), 0),
                COALESCE(SUM(units_failed), 0),
                COALESCE(SUM(bytes_transferred), 0),
                COALESCE(SUM(bytes_saved), 0)
         FROM backup_sessions
         WHERE status = 'completed' AND started_at > ?",
        params![cutoff],
        |row| {
            Ok(WindowAggregates {
                total_sessions: row.get(0)?,
                units_fetched: row.get(1)?,
                units_skipped: row.get(2)?,
                units_failed: row.get(3)?,
                bytes_transferred: row.get(4)?,
                bytes_saved: row.get(5)?,
            })
        },
    )?)
}

/// Per-kind session counts over completed sessions in the window.
pub fn kind_distribution(conn: &Connection, cutoff: &str) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT backup_kind, COUNT(*) FROM backup_sessions
         WHERE status = 'completed' AND started_at > ?
         GROUP BY backup_kind ORDER BY backup_kind",
    )?;
    let rows = stmt.query_map(params![cutoff], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Delete sessions started before `cutoff`. Returns the number removed.
pub fn delete_older_than(conn: &Connection, cutoff: &str) -> Result<i64> {
    let changes = conn.execute(
        "DELETE FROM backup_sessions WHERE started_at < ?",
        params![cutoff],
    )?;
    Ok(changes as i64)
}
