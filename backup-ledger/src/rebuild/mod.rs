//! Reconciliation engine: rebuild a ledger from a backup tree on disk.
//!
//! Recovery path for a lost or corrupted ledger database. Walks the
//! completed backup sessions under a root directory and replays each
//! backed-up unit into the store, oldest session first, touching no
//! remote system. Rebuilding the same tree twice yields the same
//! ledger.

pub mod eml;
pub mod files;
pub mod mail;
pub mod scan;

use crate::error::Result;
use crate::store::LedgerStore;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildStats {
    pub sessions: i64,
    pub sessions_skipped: i64,
    pub units_scanned: i64,
    pub units_written: i64,
    pub units_failed: i64,
    pub total_bytes: i64,
}

impl RebuildStats {
    pub fn merge(&mut self, other: &RebuildStats) {
        self.sessions += other.sessions;
        self.sessions_skipped += other.sessions_skipped;
        self.units_scanned += other.units_scanned;
        self.units_written += other.units_written;
        self.units_failed += other.units_failed;
        self.total_bytes += other.total_bytes;
    }
}

pub struct RebuildEngine {
    store: Option<LedgerStore>,
    root: PathBuf,
}

impl RebuildEngine {
    pub fn new(store: LedgerStore, root: impl Into<PathBuf>) -> Self {
        Self {
            store: Some(store),
            root: root.into(),
        }
    }

    /// Scan and report without writing anything.
    pub fn dry_run(root: impl Into<PathBuf>) -> Self {
        Self {
            store: None,
            root: root.into(),
        }
    }

    pub fn rebuild_files(&self) -> Result<RebuildStats> {
        files::rebuild_file_containers(self.store.as_ref(), &self.root)
    }

    pub fn rebuild_mail(&self) -> Result<RebuildStats> {
        mail::rebuild_mail_containers(self.store.as_ref(), &self.root)
    }

    pub fn rebuild_all(&self) -> Result<RebuildStats> {
        let mut stats = self.rebuild_files()?;
        stats.merge(&self.rebuild_mail()?);
        tracing::info!(
            sessions = stats.sessions,
            units = stats.units_scanned,
            written = stats.units_written,
            failed = stats.units_failed,
            size = %scan::human_size(stats.total_bytes),
            "Rebuild finished"
        );
        Ok(stats)
    }
}
