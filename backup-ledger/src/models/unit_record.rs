use crate::error::Result;
use crate::models::fingerprint::Fingerprint;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

/// Current ledger state for one `(container_id, unit_path)` pair.
/// Every prior state lives in `unit_version_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: i64,
    pub container_id: String,
    pub unit_path: String,
    pub display_name: String,
    pub byte_size: i64,
    pub last_modified: Option<String>,
    pub checksum: Option<String>,
    pub etag: Option<String>,
    pub ctag: Option<String>,
    pub version: i64,
    pub observed_at: String,
}

impl UnitRecord {
    /// True when `candidate` describes exactly the state already
    /// recorded, so an upsert would be a no-op.
    pub fn same_observation(&self, candidate: &Fingerprint) -> bool {
        self.byte_size == candidate.byte_size
            && self.last_modified.as_deref().unwrap_or("") == candidate.last_modified
            && self.checksum == candidate.checksum
            && self.etag == candidate.etag
            && self.ctag == candidate.ctag
    }
}

fn row_to_record(row: &Row) -> rusqlite::Result<UnitRecord> {
    Ok(UnitRecord {
        id: row.get("id")?,
        container_id: row.get("container_id")?,
        unit_path: row.get("unit_path")?,
        display_name: row.get("display_name")?,
        byte_size: row.get("byte_size")?,
        last_modified: row.get("last_modified")?,
        checksum: row.get("checksum")?,
        etag: row.get("etag").unwrap_or(None),
        ctag: row.get("ctag").unwrap_or(None),
        version: row.get("version")?,
        observed_at: row.get("observed_at")?,
    })
}

pub fn find_by_key(
    conn: &Connection,
    container_id: &str,
    unit_path: &str,
) -> Result<Option<UnitRecord>> {
    let mut stmt = conn
        .prepare("SELECT * FROM unit_records WHERE container_id = ? AND unit_path = ?")?;
    let mut rows = stmt.query_map(params![container_id, unit_path], row_to_record)?;
    Ok(rows.next().transpose()?)
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<UnitRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM unit_records WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_record)?;
    Ok(rows.next().transpose()?)
}

/// All records, ordered stably for the export document.
pub fn find_all_ordered(conn: &Connection) -> Result<Vec<UnitRecord>> {
    let mut stmt =
        conn.prepare("SELECT * FROM unit_records ORDER BY container_id, unit_path")?;
    let rows = stmt.query_map([], row_to_record)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Unit paths already recorded for a container. Feeds the
/// immutable-identifier strategy's set difference.
pub fn paths_for_container(conn: &Connection, container_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT unit_path FROM unit_records WHERE container_id = ?")?;
    let rows = stmt.query_map(params![container_id], |row| row.get::<_, String>(0))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM unit_records", [], |row| row.get(0))?)
}

/// Archived pre-update state for one unit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRow {
    pub id: i64,
    pub unit_id: i64,
    pub version: i64,
    pub checksum: Option<String>,
    pub byte_size: i64,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub ctag: Option<String>,
    pub archived_at: String,
}

pub fn history_for_unit(conn: &Connection, unit_id: i64) -> Result<Vec<HistoryRow>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM unit_version_history WHERE unit_id = ? ORDER BY version",
    )?;
    let rows = stmt.query_map(params![unit_id], |row| {
        Ok(HistoryRow {
            id: row.get("id")?,
            unit_id: row.get("unit_id")?,
            version: row.get("version")?,
            checksum: row.get("checksum")?,
            byte_size: row.get("byte_size")?,
            last_modified: row.get("last_modified")?,
            etag: row.get("etag").unwrap_or(None),
            ctag: row.get("ctag").unwrap_or(None),
            archived_at: row.get("archived_at")?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}
