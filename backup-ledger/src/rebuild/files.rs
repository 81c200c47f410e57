//! Rebuild of file-based containers (document libraries) from a backup
//! tree on disk.
//!
//! Every `site_metadata.json` marker denotes one backup session: the
//! marker sits inside its timestamped session directory
//! (`<site_name>/<YYYYMMDD_HHMMSS>/site_metadata.json`). Sessions are
//! replayed in ascending timestamp order, so the newest session's
//! fingerprint ends up as each unit's current record and earlier states
//! land in history.

use super::scan;
use super::RebuildStats;
use crate::error::Result;
use crate::models::Fingerprint;
use crate::store::LedgerStore;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SITE_MARKER: &str = "site_metadata.json";

/// Session directories under `root`, each paired with its container id,
/// sorted ascending by session timestamp. Mailbox trees (any path
/// component named `exchange`) are excluded; the mail rebuild owns
/// those.
pub fn find_sessions(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut sessions = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() && entry.file_name() == SITE_MARKER {
            let session_dir = match entry.path().parent() {
                Some(dir) => dir.to_path_buf(),
                None => continue,
            };
            if session_dir
                .components()
                .any(|c| c.as_os_str().eq_ignore_ascii_case("exchange"))
            {
                continue;
            }
            let site_id = site_id_from_marker(entry.path(), &session_dir);
            sessions.push((session_dir, site_id));
        }
    }
    // Older sessions first so the latest upsert wins per key.
    sessions.sort_by(|a, b| {
        let name = |p: &PathBuf| p.file_name().map(|n| n.to_os_string());
        name(&a.0).cmp(&name(&b.0)).then_with(|| a.0.cmp(&b.0))
    });
    Ok(sessions)
}

/// Container id from the session's marker file, falling back to the
/// site directory (the session's parent) when the marker is unreadable
/// or lacks an id.
fn site_id_from_marker(marker: &Path, session_dir: &Path) -> String {
    let fallback = || {
        let name = session_dir
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        format!("unknown:{name}")
    };

    let Ok(raw) = std::fs::read_to_string(marker) else {
        return fallback();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return fallback();
    };
    value
        .get("site_id")
        .or_else(|| value.get("id"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(fallback)
}

pub fn rebuild_file_containers(store: Option<&LedgerStore>, root: &Path) -> Result<RebuildStats> {
    let mut stats = RebuildStats::default();
    let sessions = find_sessions(root)?;
    tracing::info!(count = sessions.len(), "Discovered file-container sessions");

    for (session_dir, site_id) in sessions {
        let dir_name = session_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(observed_at) = scan::session_observed_at(&dir_name) else {
            tracing::warn!(
                session = %session_dir.display(),
                "Marker directory is not a timestamped session, skipping"
            );
            stats.sessions_skipped += 1;
            continue;
        };
        stats.sessions += 1;
        replay_session(store, &site_id, &session_dir, &observed_at, &mut stats);
    }
    Ok(stats)
}

fn replay_session(
    store: Option<&LedgerStore>,
    site_id: &str,
    session_dir: &Path,
    observed_at: &str,
    stats: &mut RebuildStats,
) {
    for entry in WalkDir::new(session_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if scan::is_reserved(&file_name) {
            continue;
        }
        stats.units_scanned += 1;

        match replay_file(store, site_id, session_dir, entry.path(), observed_at) {
            Ok(byte_size) => {
                stats.total_bytes += byte_size;
                if store.is_some() {
                    stats.units_written += 1;
                }
            }
            Err(err) => {
                stats.units_failed += 1;
                tracing::warn!(
                    path = %entry.path().display(),
                    error = %err,
                    "Failed to replay file, continuing"
                );
            }
        }
    }
}

fn replay_file(
    store: Option<&LedgerStore>,
    site_id: &str,
    session_dir: &Path,
    path: &Path,
    observed_at: &str,
) -> Result<i64> {
    let byte_size = std::fs::metadata(path)?.len() as i64;
    let checksum = scan::sha256_file(path)?;
    let last_modified = scan::file_mtime(path)?;

    let relative = path
        .strip_prefix(session_dir)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    let unit_path = format!("/{relative}");
    let display_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| unit_path.clone());

    tracing::debug!(
        unit_path = %unit_path,
        checksum = %&checksum[..12],
        size = %scan::human_size(byte_size),
        "Scanned file unit"
    );

    let fp = Fingerprint::new(site_id, unit_path, display_name, byte_size, last_modified)
        .with_checksum(checksum)
        .with_observed_at(observed_at);

    if let Some(store) = store {
        store.upsert(&fp)?;
    }
    Ok(byte_size)
}
