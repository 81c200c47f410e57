//! Ledger store - the versioned record of every backed-up unit.
//!
//! Owns `unit_records` and `unit_version_history` exclusively. Upserts
//! are atomic per `(container_id, unit_path)` key via immediate SQLite
//! transactions; operations on distinct keys proceed independently
//! through the connection pool.

use crate::db::connection::{self, DbPool};
use crate::db::migrate;
use crate::error::{LedgerError, Result};
use crate::models::backup_session::{self, BackupSession};
use crate::models::unit_record::{self, HistoryRow, UnitRecord};
use crate::models::Fingerprint;
use rusqlite::{params, TransactionBehavior};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

/// Bound on the most-recent session list returned by `stats`.
const RECENT_SESSIONS_LIMIT: i64 = 10;

#[derive(Clone)]
pub struct LedgerStore {
    pool: DbPool,
}

#[derive(Debug, Serialize)]
pub struct LedgerStats {
    pub window_days: i64,
    pub tracked_units: i64,
    pub total_sessions: i64,
    pub units_fetched: i64,
    pub units_skipped: i64,
    pub units_failed: i64,
    pub bytes_transferred: i64,
    pub bytes_saved: i64,
    pub skip_rate_percent: f64,
    pub efficiency_percent: f64,
    pub kinds: Vec<(String, i64)>,
    pub recent_sessions: Vec<BackupSession>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneOutcome {
    pub sessions_deleted: i64,
    pub history_deleted: i64,
}

/// The export document - the only external file format the ledger
/// defines. All current unit records plus all session rows.
#[derive(Debug, Serialize)]
struct LedgerExport {
    export_timestamp: String,
    unit_records: Vec<UnitRecord>,
    backup_sessions: Vec<BackupSession>,
}

impl LedgerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) and migrate a ledger database.
    pub fn open(db_path: &Path) -> Result<Self> {
        let pool = connection::create_pool(db_path)?;
        migrate::migrate(&pool)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn get_record(&self, container_id: &str, unit_path: &str) -> Result<Option<UnitRecord>> {
        let conn = self.pool.get()?;
        unit_record::find_by_key(&conn, container_id, unit_path)
    }

    /// Record the observation in `fp`. Inserts at version 1 for an
    /// unseen key; otherwise archives the pre-update state into
    /// `unit_version_history`, updates in place and bumps `version`.
    /// Re-applying an identical fingerprint changes nothing: no history
    /// row, no version bump.
    ///
    /// A concurrent upsert racing on the same key surfaces as a
    /// constraint failure; it is retried once against re-read state.
    pub fn upsert(&self, fp: &Fingerprint) -> Result<UnitRecord> {
        match self.try_upsert(fp) {
            Err(LedgerError::LedgerIntegrity(detail)) => {
                tracing::warn!(
                    container_id = %fp.container_id,
                    unit_path = %fp.unit_path,
                    %detail,
                    "Upsert observed inconsistent pre-state, retrying once"
                );
                self.try_upsert(fp)
            }
            other => other,
        }
    }

    fn try_upsert(&self, fp: &Fingerprint) -> Result<UnitRecord> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = unit_record::find_by_key(&tx, &fp.container_id, &fp.unit_path)?;

        let record = match existing {
            Some(current) if current.same_observation(fp) => current,
            Some(current) => {
                tx.execute(
                    "INSERT INTO unit_version_history
                       (unit_id, version, checksum, byte_size, last_modified, etag, ctag, archived_at)
                     SELECT id, version, checksum, byte_size, last_modified, etag, ctag, ?2
                     FROM unit_records WHERE id = ?1",
                    params![current.id, fp.observed_at],
                )?;
                tx.execute(
                    "UPDATE unit_records
                     SET display_name = ?, byte_size = ?, last_modified = ?, checksum = ?,
                         etag = ?, ctag = ?, observed_at = ?, version = version + 1
                     WHERE id = ?",
                    params![
                        fp.display_name,
                        fp.byte_size,
                        fp.last_modified,
                        fp.checksum,
                        fp.etag,
                        fp.ctag,
                        fp.observed_at,
                        current.id
                    ],
                )?;
                let updated = unit_record::find_by_id(&tx, current.id)?.ok_or_else(|| {
                    LedgerError::LedgerIntegrity(format!(
                        "record {} vanished mid-update",
                        current.id
                    ))
                })?;
                if updated.version != current.version + 1 {
                    return Err(LedgerError::LedgerIntegrity(format!(
                        "version moved from {} to {} under {}:{}",
                        current.version, updated.version, fp.container_id, fp.unit_path
                    )));
                }
                tracing::debug!(
                    unit_path = %fp.unit_path,
                    version = updated.version,
                    "Updated unit record"
                );
                updated
            }
            None => {
                let inserted = tx.execute(
                    "INSERT INTO unit_records
                       (container_id, unit_path, display_name, byte_size, last_modified,
                        checksum, etag, ctag, observed_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        fp.container_id,
                        fp.unit_path,
                        fp.display_name,
                        fp.byte_size,
                        fp.last_modified,
                        fp.checksum,
                        fp.etag,
                        fp.ctag,
                        fp.observed_at
                    ],
                );
                match inserted {
                    Ok(_) => {}
                    // A racing insert on the same key lands here; the
                    // retry re-reads and takes the update path.
                    Err(e) if is_constraint_violation(&e) => {
                        return Err(LedgerError::LedgerIntegrity(format!(
                            "concurrent insert on {}:{}",
                            fp.container_id, fp.unit_path
                        )));
                    }
                    Err(e) => return Err(e.into()),
                }
                let id = tx.last_insert_rowid();
                let created = unit_record::find_by_id(&tx, id)?.ok_or_else(|| {
                    LedgerError::LedgerIntegrity(format!("failed to read back record {id}"))
                })?;
                tracing::debug!(unit_path = %fp.unit_path, id, "Created unit record");
                created
            }
        };

        tx.commit()?;
        Ok(record)
    }

    /// All unit paths currently recorded for a container.
    pub fn known_unit_paths(&self, container_id: &str) -> Result<HashSet<String>> {
        let conn = self.pool.get()?;
        Ok(unit_record::paths_for_container(&conn, container_id)?
            .into_iter()
            .collect())
    }

    pub fn history(&self, unit_id: i64) -> Result<Vec<HistoryRow>> {
        let conn = self.pool.get()?;
        unit_record::history_for_unit(&conn, unit_id)
    }

    /// Aggregate counts and sizes over completed sessions started in
    /// the last `window_days`, plus a bounded most-recent list.
    pub fn stats(&self, window_days: i64) -> Result<LedgerStats> {
        let conn = self.pool.get()?;
        let cutoff = window_cutoff(window_days);

        let agg = backup_session::aggregate_window(&conn, &cutoff)?;
        let kinds = backup_session::kind_distribution(&conn, &cutoff)?;
        let recent = backup_session::find_recent(&conn, &cutoff, RECENT_SESSIONS_LIMIT)?;
        let tracked_units = unit_record::count(&conn)?;

        let processed = agg.units_fetched + agg.units_skipped;
        let skip_rate_percent = if processed > 0 {
            agg.units_skipped as f64 / processed as f64 * 100.0
        } else {
            0.0
        };
        let moved = agg.bytes_transferred + agg.bytes_saved;
        let efficiency_percent = if moved > 0 {
            agg.bytes_saved as f64 / moved as f64 * 100.0
        } else {
            0.0
        };

        Ok(LedgerStats {
            window_days,
            tracked_units,
            total_sessions: agg.total_sessions,
            units_fetched: agg.units_fetched,
            units_skipped: agg.units_skipped,
            units_failed: agg.units_failed,
            bytes_transferred: agg.bytes_transferred,
            bytes_saved: agg.bytes_saved,
            skip_rate_percent,
            efficiency_percent,
            kinds,
            recent_sessions: recent,
        })
    }

    /// Delete session rows older than the retention horizon and history
    /// rows left without a parent record. Current unit records are
    /// never deleted.
    pub fn prune(&self, keep_days: i64) -> Result<PruneOutcome> {
        let conn = self.pool.get()?;
        let cutoff = window_cutoff(keep_days);

        let sessions_deleted = backup_session::delete_older_than(&conn, &cutoff)?;
        let history_deleted = conn.execute(
            "DELETE FROM unit_version_history
             WHERE unit_id NOT IN (SELECT id FROM unit_records)",
            [],
        )? as i64;

        tracing::info!(
            sessions_deleted,
            history_deleted,
            keep_days,
            "Pruned ledger retention window"
        );
        Ok(PruneOutcome {
            sessions_deleted,
            history_deleted,
        })
    }

    /// Serialize all current unit records and all session rows into the
    /// export document. Record ordering is stable (container, path),
    /// so an unchanged ledger exports byte-identically for a given
    /// `exported_at`.
    pub fn export_document(&self, exported_at: &str) -> Result<String> {
        let conn = self.pool.get()?;
        let export = LedgerExport {
            export_timestamp: exported_at.to_string(),
            unit_records: unit_record::find_all_ordered(&conn)?,
            backup_sessions: backup_session::find_all_ordered(&conn)?,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    pub fn export_to_file(&self, output: &Path, exported_at: &str) -> Result<()> {
        let doc = self.export_document(exported_at)?;
        std::fs::write(output, doc)?;
        tracing::info!(output = %output.display(), "Exported ledger");
        Ok(())
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn window_cutoff(days: i64) -> String {
    (chrono::Utc::now() - chrono::Duration::days(days)).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{BackupKind, SessionStatus, SessionTotals, SessionTracker};
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> LedgerStore {
        LedgerStore::open(&dir.path().join("ledger.db")).unwrap()
    }

    fn doc_fingerprint(checksum: &str, size: i64) -> Fingerprint {
        Fingerprint::new("site-1", "/docs/a.txt", "a.txt", size, "2024-01-01T00:00:00Z")
            .with_checksum(checksum)
            .with_observed_at("2024-01-02T00:00:00+00:00")
    }

    #[test]
    fn test_insert_then_update_archives_history() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let first = store.upsert(&doc_fingerprint("aaa", 100)).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.checksum.as_deref(), Some("aaa"));

        let second = store.upsert(&doc_fingerprint("bbb", 100)).unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.checksum.as_deref(), Some("bbb"));

        let current = store.get_record("site-1", "/docs/a.txt").unwrap().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.checksum.as_deref(), Some("bbb"));

        let history = store.history(current.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].checksum.as_deref(), Some("aaa"));
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].byte_size, 100);
    }

    #[test]
    fn test_upsert_identical_fingerprint_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let fp = doc_fingerprint("aaa", 100);
        let first = store.upsert(&fp).unwrap();
        let second = store.upsert(&fp).unwrap();

        assert_eq!(second.version, first.version);
        assert_eq!(second.observed_at, first.observed_at);
        assert!(store.history(second.id).unwrap().is_empty());
    }

    #[test]
    fn test_monotonic_versioning() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let n = 5;
        let mut prior: Vec<Fingerprint> = Vec::new();
        for i in 0..n {
            let fp = doc_fingerprint(&format!("sum-{i}"), 100 + i);
            store.upsert(&fp).unwrap();
            prior.push(fp);
        }

        let current = store.get_record("site-1", "/docs/a.txt").unwrap().unwrap();
        assert_eq!(current.version, n);

        let history = store.history(current.id).unwrap();
        assert_eq!(history.len() as i64, n - 1);
        for (idx, row) in history.iter().enumerate() {
            // Each archived row matches the pre-update state at the
            // time of its archival.
            assert_eq!(row.version, idx as i64 + 1);
            assert_eq!(row.checksum, prior[idx].checksum);
            assert_eq!(row.byte_size, prior[idx].byte_size);
        }
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .upsert(&Fingerprint::new("site-1", "/a", "a", 1, "t").with_checksum("x"))
            .unwrap();
        store
            .upsert(&Fingerprint::new("site-2", "/a", "a", 2, "t").with_checksum("y"))
            .unwrap();

        assert_eq!(store.get_record("site-1", "/a").unwrap().unwrap().byte_size, 1);
        assert_eq!(store.get_record("site-2", "/a").unwrap().unwrap().byte_size, 2);
    }

    #[test]
    fn test_known_unit_paths() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for path in ["msg-1", "msg-2", "msg-3"] {
            store
                .upsert(&Fingerprint::new("user@example.com", path, path, 10, ""))
                .unwrap();
        }
        store
            .upsert(&Fingerprint::new("other@example.com", "msg-9", "msg-9", 10, ""))
            .unwrap();

        let paths = store.known_unit_paths("user@example.com").unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths.contains("msg-2"));
        assert!(!paths.contains("msg-9"));
    }

    #[test]
    fn test_stats_window() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let tracker = SessionTracker::new(store.pool().clone());

        let id = tracker.start(BackupKind::Incremental, Some("site-1")).unwrap();
        tracker
            .finish(
                id,
                &SessionTotals {
                    units_fetched: 2,
                    units_skipped: 8,
                    units_failed: 0,
                    bytes_transferred: 200,
                    bytes_saved: 800,
                },
                SessionStatus::Completed,
                None,
            )
            .unwrap();

        // Failed sessions are excluded from window aggregates.
        let failed = tracker.start(BackupKind::Full, None).unwrap();
        tracker
            .finish(failed, &SessionTotals::default(), SessionStatus::Failed, Some("boom"))
            .unwrap();

        let stats = store.stats(30).unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.units_fetched, 2);
        assert_eq!(stats.units_skipped, 8);
        assert!((stats.skip_rate_percent - 80.0).abs() < 1e-9);
        assert!((stats.efficiency_percent - 80.0).abs() < 1e-9);
        assert_eq!(stats.kinds, vec![("incremental".to_string(), 1)]);
        // Recent list still shows both sessions, newest first.
        assert_eq!(stats.recent_sessions.len(), 2);
    }

    #[test]
    fn test_prune_keeps_current_records() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.upsert(&doc_fingerprint("aaa", 100)).unwrap();
        store.upsert(&doc_fingerprint("bbb", 101)).unwrap();

        // An ancient session row, well past any retention horizon.
        {
            let conn = store.pool().get().unwrap();
            conn.execute(
                "INSERT INTO backup_sessions (backup_kind, started_at, status)
                 VALUES ('full', '2001-01-01T00:00:00+00:00', 'completed')",
                [],
            )
            .unwrap();
            // Orphaned history row pointing at a deleted record. FK
            // enforcement is lifted so the orphan can be planted.
            conn.execute_batch("PRAGMA foreign_keys = OFF").unwrap();
            conn.execute(
                "INSERT INTO unit_version_history
                   (unit_id, version, byte_size, archived_at)
                 VALUES (9999, 1, 5, '2001-01-01T00:00:00+00:00')",
                [],
            )
            .unwrap();
            conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        }

        let outcome = store.prune(90).unwrap();
        assert_eq!(outcome.sessions_deleted, 1);
        assert_eq!(outcome.history_deleted, 1);

        // Current record and its real history survive.
        let record = store.get_record("site-1", "/docs/a.txt").unwrap().unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(store.history(record.id).unwrap().len(), 1);
    }

    #[test]
    fn test_export_document_is_stable() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .upsert(&Fingerprint::new("site-b", "/z", "z", 1, "t").with_observed_at("ts"))
            .unwrap();
        store
            .upsert(&Fingerprint::new("site-a", "/y", "y", 2, "t").with_observed_at("ts"))
            .unwrap();

        let doc1 = store.export_document("2024-06-01T00:00:00Z").unwrap();
        let doc2 = store.export_document("2024-06-01T00:00:00Z").unwrap();
        assert_eq!(doc1, doc2);

        // Ordered by container then path, regardless of insert order.
        let parsed: serde_json::Value = serde_json::from_str(&doc1).unwrap();
        let records = parsed["unit_records"].as_array().unwrap();
        assert_eq!(records[0]["container_id"], "site-a");
        assert_eq!(records[1]["container_id"], "site-b");
        assert_eq!(parsed["export_timestamp"], "2024-06-01T00:00:00Z");
    }

    #[test]
    fn test_concurrent_upserts_distinct_keys() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut handles = Vec::new();
        for worker in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..10 {
                    let fp = Fingerprint::new(
                        "site-1",
                        format!("/w{worker}/f{i}"),
                        format!("f{i}"),
                        i,
                        "t",
                    )
                    .with_checksum(format!("sum-{worker}-{i}"));
                    store.upsert(&fp).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let conn = store.pool().get().unwrap();
        assert_eq!(unit_record::count(&conn).unwrap(), 40);
    }
}
