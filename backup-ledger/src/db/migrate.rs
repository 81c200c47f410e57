use crate::db::connection::DbPool;
use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS unit_records (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  container_id TEXT NOT NULL,
  unit_path TEXT NOT NULL,
  display_name TEXT NOT NULL,
  byte_size INTEGER NOT NULL DEFAULT 0,
  last_modified TEXT,
  checksum TEXT,
  etag TEXT,
  ctag TEXT,
  version INTEGER NOT NULL DEFAULT 1,
  observed_at TEXT NOT NULL,
  UNIQUE(container_id, unit_path)
);

CREATE TABLE IF NOT EXISTS unit_version_history (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  unit_id INTEGER NOT NULL REFERENCES unit_records(id) ON DELETE CASCADE,
  version INTEGER NOT NULL,
  checksum TEXT,
  byte_size INTEGER NOT NULL DEFAULT 0,
  last_modified TEXT,
  etag TEXT,
  ctag TEXT,
  archived_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backup_sessions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  backup_kind TEXT NOT NULL CHECK(backup_kind IN ('full','incremental','verify')),
  container_id TEXT,
  started_at TEXT NOT NULL,
  ended_at TEXT,
  units_fetched INTEGER NOT NULL DEFAULT 0,
  units_skipped INTEGER NOT NULL DEFAULT 0,
  units_failed INTEGER NOT NULL DEFAULT 0,
  bytes_transferred INTEGER NOT NULL DEFAULT 0,
  bytes_saved INTEGER NOT NULL DEFAULT 0,
  status TEXT NOT NULL DEFAULT 'running' CHECK(status IN ('running','completed','failed','partial')),
  error_detail TEXT
);

CREATE INDEX IF NOT EXISTS idx_unit_records_key ON unit_records(container_id, unit_path);
CREATE INDEX IF NOT EXISTS idx_unit_records_checksum ON unit_records(checksum);
CREATE INDEX IF NOT EXISTS idx_unit_history_unit_id ON unit_version_history(unit_id);
CREATE INDEX IF NOT EXISTS idx_backup_sessions_started ON backup_sessions(started_at);
"#;

pub fn migrate(pool: &DbPool) -> Result<()> {
    tracing::info!("[DB] Starting ledger migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    // Idempotent migrations for existing databases
    let has_column = |table: &str, column: &str| -> bool {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        columns.contains(&column.to_string())
    };

    // Ledgers created before opaque-tag change detection
    if !has_column("unit_records", "etag") {
        conn.execute_batch("ALTER TABLE unit_records ADD COLUMN etag TEXT")?;
    }
    if !has_column("unit_records", "ctag") {
        conn.execute_batch("ALTER TABLE unit_records ADD COLUMN ctag TEXT")?;
    }
    if !has_column("unit_version_history", "etag") {
        conn.execute_batch("ALTER TABLE unit_version_history ADD COLUMN etag TEXT")?;
    }
    if !has_column("unit_version_history", "ctag") {
        conn.execute_batch("ALTER TABLE unit_version_history ADD COLUMN ctag TEXT")?;
    }

    // backup_sessions migrations
    if !has_column("backup_sessions", "units_failed") {
        conn.execute_batch(
            "ALTER TABLE backup_sessions ADD COLUMN units_failed INTEGER NOT NULL DEFAULT 0",
        )?;
    }

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}
