//! Session tracking - records the lifecycle of one backup run.
//!
//! A session is created in `running` status when a run starts and
//! mutated exactly once at run end. A session whose process crashed is
//! left `running` indefinitely; reporting consumers must treat stale
//! `running` rows as abandoned.

use crate::db::connection::DbPool;
use crate::error::Result;
use crate::models::backup_session;
use crate::models::backup_session::BackupSession;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Full,
    Incremental,
    Verify,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Verify => "verify",
        }
    }
}

impl std::str::FromStr for BackupKind {
    type Err = crate::LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(BackupKind::Full),
            "incremental" => Ok(BackupKind::Incremental),
            "verify" => Ok(BackupKind::Verify),
            other => Err(crate::LedgerError::Config(format!(
                "unknown backup kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Partial,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Partial => "partial",
        }
    }
}

/// Final counter values written into a session row at finish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTotals {
    pub units_fetched: i64,
    pub units_skipped: i64,
    pub units_failed: i64,
    pub bytes_transferred: i64,
    pub bytes_saved: i64,
}

/// Shared per-run counters, updated from many workers and snapshotted
/// once after all workers have quiesced.
#[derive(Debug, Default)]
pub struct SessionCounters {
    units_fetched: AtomicI64,
    units_skipped: AtomicI64,
    units_failed: AtomicI64,
    bytes_transferred: AtomicI64,
    bytes_saved: AtomicI64,
}

impl SessionCounters {
    pub fn record_fetched(&self, bytes: i64) {
        self.units_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, bytes_saved: i64) {
        self.units_skipped.fetch_add(1, Ordering::Relaxed);
        self.bytes_saved.fetch_add(bytes_saved, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.units_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionTotals {
        SessionTotals {
            units_fetched: self.units_fetched.load(Ordering::Relaxed),
            units_skipped: self.units_skipped.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
        }
    }
}

/// Owns `backup_sessions` storage. Independent of the unit ledger;
/// the two share only `container_id` values for reporting joins.
#[derive(Clone)]
pub struct SessionTracker {
    pool: DbPool,
}

impl SessionTracker {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn start(&self, kind: BackupKind, container_id: Option<&str>) -> Result<i64> {
        let conn = self.pool.get()?;
        let session_id = backup_session::create(&conn, kind.as_str(), container_id)?;
        tracing::info!(session_id, kind = kind.as_str(), "Backup session started");
        Ok(session_id)
    }

    /// Mutates the session row exactly once to a terminal status. Must
    /// only be called after all workers for the session have quiesced.
    pub fn finish(
        &self,
        session_id: i64,
        totals: &SessionTotals,
        status: SessionStatus,
        error_detail: Option<&str>,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        backup_session::finish(&conn, session_id, totals, status.as_str(), error_detail)?;
        tracing::info!(
            session_id,
            status = status.as_str(),
            fetched = totals.units_fetched,
            skipped = totals.units_skipped,
            failed = totals.units_failed,
            "Backup session finished"
        );
        Ok(())
    }

    pub fn get(&self, session_id: i64) -> Result<Option<BackupSession>> {
        let conn = self.pool.get()?;
        backup_session::find_by_id(&conn, session_id)
    }
}
