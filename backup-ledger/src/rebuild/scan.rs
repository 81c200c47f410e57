//! Shared scanning helpers for the rebuild engine.

use crate::error::Result;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

/// Marker files that must never be treated as backed-up content.
pub const SKIP_FILENAMES: [&str; 5] = [
    "site_metadata.json",
    "drive_metadata.json",
    "backup_statistics.json",
    "backup_manifest.json",
    "user_metadata.json",
];

pub const SKIP_SUFFIXES: [&str; 4] = [".log", ".db", ".db-wal", ".db-shm"];

pub fn is_reserved(file_name: &str) -> bool {
    if SKIP_FILENAMES.contains(&file_name) {
        return true;
    }
    let lower = file_name.to_ascii_lowercase();
    SKIP_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

fn session_dir_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{8}_\d{6}$").unwrap())
}

/// Session directories are named `YYYYMMDD_HHMMSS`.
pub fn is_session_dir_name(name: &str) -> bool {
    session_dir_regex().is_match(name)
}

/// Observation timestamp derived from a session directory name, so
/// replayed upserts carry the session's time instead of wall clock.
pub fn session_observed_at(dir_name: &str) -> Option<String> {
    let naive = chrono::NaiveDateTime::parse_from_str(dir_name, "%Y%m%d_%H%M%S").ok()?;
    Some(naive.and_utc().to_rfc3339())
}

/// Hex-encoded SHA-256 of a file on disk, read in 1 MiB chunks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Human-readable byte count for log summaries.
pub fn human_size(n: i64) -> String {
    let mut value = n as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if value.abs() < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} PB")
}

/// File mtime as RFC 3339, for the ledger's opaque `last_modified`.
pub fn file_mtime(path: &Path) -> Result<String> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(chrono::DateTime::<chrono::Utc>::from(modified).to_rfc3339())
}
