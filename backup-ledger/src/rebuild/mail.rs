//! Rebuild of mailbox containers from an `exchange` backup tree.
//!
//! The tree nests sessions under per-user directories:
//! `exchange/<user>/<session>/...`. Two session layouts exist. Direct
//! sessions belong to that user and hold mail-folder directories
//! themselves. Aggregated sessions (historically under an `all_users`
//! parent) hold one directory per mailbox owner, each with folder
//! subdirectories. A session whose shape matches neither is skipped
//! with a warning rather than guessed at.
//!
//! Each message is an `.eml` body and/or a `.json` metadata sibling
//! sharing a filename stem. The JSON side is authoritative when present
//! (it carries the immutable message id); otherwise identity and
//! display fields come from the EML headers and the stem.

use super::eml;
use super::scan;
use super::RebuildStats;
use crate::error::{LedgerError, Result};
use crate::models::Fingerprint;
use crate::store::LedgerStore;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const EXCHANGE_DIR: &str = "exchange";
const USER_MARKER: &str = "user_metadata.json";
const ALL_USERS_DIR: &str = "all_users";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLayout {
    /// Folder directories sit directly under the session; one owner.
    Direct,
    /// One directory per owner under the session.
    Aggregated,
    /// Neither shape recognizably present.
    Ambiguous,
}

fn is_mail_file(name: &str) -> bool {
    if scan::is_reserved(name) {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".eml") || lower.ends_with(".json")
}

fn has_direct_mail_files(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false)
            && is_mail_file(&entry.file_name().to_string_lossy())
        {
            return true;
        }
    }
    false
}

/// A child directory holding mail files directly is a mail folder, so
/// the session is that user's own; so is a session whose only messages
/// sit loose at its root. Child directories with no direct mail files
/// are owner directories, one level up.
pub fn classify_session(session_dir: &Path) -> Result<SessionLayout> {
    let mut child_dirs = Vec::new();
    let mut loose_mail = false;
    for entry in std::fs::read_dir(session_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            child_dirs.push(entry.path());
        } else if is_mail_file(&entry.file_name().to_string_lossy()) {
            loose_mail = true;
        }
    }
    if child_dirs.is_empty() {
        return Ok(if loose_mail {
            SessionLayout::Direct
        } else {
            SessionLayout::Ambiguous
        });
    }
    if child_dirs.iter().any(|d| has_direct_mail_files(d)) {
        return Ok(SessionLayout::Direct);
    }
    Ok(SessionLayout::Aggregated)
}

fn owner_from_marker(marker: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(marker).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    ["user_email", "userPrincipalName", "mail"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

/// Pre-pass over all user directories: short directory name to full
/// email, from any session's `user_metadata.json`. Aggregated sessions
/// carry no marker of their own and resolve owners through this map.
fn user_email_map(exchange_dir: &Path) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for entry in std::fs::read_dir(exchange_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !entry.file_type()?.is_dir() || name == ALL_USERS_DIR {
            continue;
        }
        for session in session_dirs(&entry.path())? {
            if let Some(email) = owner_from_marker(&session.join(USER_MARKER)) {
                map.insert(name, email);
                break;
            }
        }
    }
    tracing::debug!(entries = map.len(), "Resolved user email map");
    Ok(map)
}

#[derive(Debug, Default)]
struct MessageFiles {
    eml: Option<PathBuf>,
    json: Option<PathBuf>,
    folder: String,
}

/// Group an owner's files by stem, pairing each `.eml` with its `.json`
/// sibling. Loose files directly under the owner directory are grouped
/// under a synthetic `root` folder.
fn collect_messages(owner_dir: &Path) -> BTreeMap<String, MessageFiles> {
    let mut messages: BTreeMap<String, MessageFiles> = BTreeMap::new();
    for entry in WalkDir::new(owner_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_mail_file(&name) {
            continue;
        }
        let path = entry.path();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(name.clone());
        let folder = path
            .parent()
            .filter(|p| *p != owner_dir)
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());

        let slot = messages.entry(stem).or_default();
        slot.folder = folder;
        if name.to_ascii_lowercase().ends_with(".eml") {
            slot.eml = Some(path.to_path_buf());
        } else {
            slot.json = Some(path.to_path_buf());
        }
    }
    messages
}

/// Identity and display fields for one message, JSON side preferred.
fn message_fingerprint(
    owner: &str,
    stem: &str,
    files: &MessageFiles,
    observed_at: &str,
) -> Result<Fingerprint> {
    let Some(primary) = files.json.as_deref().or(files.eml.as_deref()) else {
        return Err(LedgerError::ReconciliationAmbiguity(format!(
            "message {stem} grouped without any backing file"
        )));
    };
    let byte_size = std::fs::metadata(primary)?.len() as i64;
    let checksum = scan::sha256_file(primary)?;
    let (stem_subject, stem_id) = eml::split_stem(stem);

    let (message_id, subject, received) = if let Some(json_path) = &files.json {
        let raw = std::fs::read_to_string(json_path)?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null);
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or(stem_id);
        let subject = value
            .get("subject")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or(stem_subject);
        let received = value
            .get("receivedDateTime")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        (id, subject, received)
    } else {
        let headers = files
            .eml
            .as_deref()
            .map(eml::parse_headers)
            .transpose()?
            .unwrap_or_default();
        let id = if headers.message_id.is_empty() {
            stem_id
        } else {
            headers.message_id
        };
        let subject = if headers.subject.is_empty() {
            stem_subject
        } else {
            headers.subject
        };
        (id, subject, headers.date)
    };

    Ok(
        Fingerprint::new(owner, message_id, subject, byte_size, received)
            .with_checksum(checksum)
            .with_observed_at(observed_at),
    )
}

/// Session directories under a parent, sorted ascending.
fn session_dirs(parent: &Path) -> Result<Vec<PathBuf>> {
    let mut sessions = Vec::new();
    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() && scan::is_session_dir_name(&name) {
            sessions.push(entry.path());
        }
    }
    sessions.sort();
    Ok(sessions)
}

fn find_exchange_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name().eq_ignore_ascii_case(EXCHANGE_DIR))
        .map(|e| e.path().to_path_buf())
        .collect();
    dirs.sort();
    dirs
}

pub fn rebuild_mail_containers(store: Option<&LedgerStore>, root: &Path) -> Result<RebuildStats> {
    let mut stats = RebuildStats::default();
    let exchange_dirs = find_exchange_dirs(root);
    tracing::info!(count = exchange_dirs.len(), "Discovered mailbox trees");

    for exchange_dir in exchange_dirs {
        let email_map = user_email_map(&exchange_dir)?;

        let mut user_dirs = Vec::new();
        for entry in std::fs::read_dir(&exchange_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                user_dirs.push(entry.path());
            }
        }
        user_dirs.sort();

        for user_dir in user_dirs {
            let user_name = user_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            for session_dir in session_dirs(&user_dir)? {
                let dir_name = session_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let Some(observed_at) = scan::session_observed_at(&dir_name) else {
                    stats.sessions_skipped += 1;
                    continue;
                };

                // The session's own marker beats the pre-pass map.
                let owner = owner_from_marker(&session_dir.join(USER_MARKER))
                    .or_else(|| email_map.get(&user_name).cloned())
                    .unwrap_or_else(|| user_name.clone());

                match classify_session(&session_dir)? {
                    SessionLayout::Ambiguous => {
                        tracing::warn!(
                            session = %session_dir.display(),
                            "Mail session layout is ambiguous, skipping"
                        );
                        stats.sessions_skipped += 1;
                    }
                    SessionLayout::Direct => {
                        stats.sessions += 1;
                        replay_owner(store, &owner, &session_dir, &observed_at, &mut stats);
                    }
                    SessionLayout::Aggregated => {
                        stats.sessions += 1;
                        let mut owner_dirs = Vec::new();
                        for entry in std::fs::read_dir(&session_dir)? {
                            let entry = entry?;
                            if entry.file_type()?.is_dir() {
                                owner_dirs.push(entry.path());
                            }
                        }
                        owner_dirs.sort();

                        for owner_dir in owner_dirs {
                            let sub_name = owner_dir
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default();
                            let sub_owner = email_map
                                .get(&sub_name)
                                .cloned()
                                .unwrap_or_else(|| sub_name.clone());
                            replay_owner(store, &sub_owner, &owner_dir, &observed_at, &mut stats);
                        }
                    }
                }
            }
        }
    }
    Ok(stats)
}

fn replay_owner(
    store: Option<&LedgerStore>,
    owner: &str,
    owner_dir: &Path,
    observed_at: &str,
    stats: &mut RebuildStats,
) {
    for (stem, files) in collect_messages(owner_dir) {
        stats.units_scanned += 1;
        match record_message(store, owner, &stem, &files, observed_at) {
            Ok(byte_size) => {
                stats.total_bytes += byte_size;
                if store.is_some() {
                    stats.units_written += 1;
                }
            }
            Err(err) => {
                stats.units_failed += 1;
                tracing::warn!(
                    owner = %owner,
                    stem = %stem,
                    error = %err,
                    "Failed to replay message, continuing"
                );
            }
        }
    }
}

fn record_message(
    store: Option<&LedgerStore>,
    owner: &str,
    stem: &str,
    files: &MessageFiles,
    observed_at: &str,
) -> Result<i64> {
    let fp = message_fingerprint(owner, stem, files, observed_at)?;
    let byte_size = fp.byte_size;
    tracing::debug!(
        folder = %files.folder,
        subject = %fp.display_name,
        size = %scan::human_size(byte_size),
        "Scanned message"
    );
    if let Some(store) = store {
        store.upsert(&fp)?;
    }
    Ok(byte_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn mk(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn message_json(id: &str, subject: &str) -> String {
        format!(
            r#"{{"id": "{id}", "subject": "{subject}",
                 "from": {{"emailAddress": {{"address": "sender@example.com"}}}},
                 "receivedDateTime": "2024-01-05T09:00:00Z"}}"#
        )
    }

    #[test]
    fn test_classify_direct_session() {
        let dir = TempDir::new().unwrap();
        mk(
            &dir.path().join("Inbox/note_AAMkABCDEF12345.eml"),
            "Subject: x\n\n",
        );

        assert_eq!(classify_session(dir.path()).unwrap(), SessionLayout::Direct);
    }

    #[test]
    fn test_classify_aggregated_session() {
        let dir = TempDir::new().unwrap();
        mk(
            &dir.path().join("alice/Inbox/m1.eml"),
            "Subject: x\n\n",
        );

        assert_eq!(
            classify_session(dir.path()).unwrap(),
            SessionLayout::Aggregated
        );
    }

    #[test]
    fn test_classify_loose_root_messages_as_direct() {
        let dir = TempDir::new().unwrap();
        mk(&dir.path().join("note_AAMkABCDEF12345.eml"), "Subject: x\n\n");

        assert_eq!(classify_session(dir.path()).unwrap(), SessionLayout::Direct);
    }

    #[test]
    fn test_classify_empty_session_is_ambiguous() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            classify_session(dir.path()).unwrap(),
            SessionLayout::Ambiguous
        );

        // Reserved files alone do not make a session classifiable.
        mk(&dir.path().join("backup_statistics.json"), "{}");
        assert_eq!(
            classify_session(dir.path()).unwrap(),
            SessionLayout::Ambiguous
        );
    }

    #[test]
    fn test_user_email_map_from_session_markers() {
        let root = TempDir::new().unwrap();
        mk(
            &root.path().join("awright/20240101_000000/user_metadata.json"),
            r#"{"userPrincipalName": "alice.wright@example.com"}"#,
        );
        mk(
            &root.path().join("all_users/20230101_000000/awright/Inbox/m.eml"),
            "Subject: x\n\n",
        );

        let map = user_email_map(root.path()).unwrap();
        assert_eq!(
            map.get("awright").map(String::as_str),
            Some("alice.wright@example.com")
        );
        assert!(!map.contains_key("all_users"));
    }

    #[test]
    fn test_collect_messages_pairs_siblings_by_stem() {
        let dir = TempDir::new().unwrap();
        mk(&dir.path().join("Inbox/report_AAMkAAAA111122223.eml"), "x");
        mk(
            &dir.path().join("Inbox/report_AAMkAAAA111122223.json"),
            &message_json("AAMkAAAA111122223", "Report"),
        );
        mk(&dir.path().join("loose.eml"), "Subject: loose\n\n");

        let messages = collect_messages(dir.path());
        assert_eq!(messages.len(), 2);

        let paired = &messages["report_AAMkAAAA111122223"];
        assert!(paired.eml.is_some());
        assert!(paired.json.is_some());
        assert_eq!(paired.folder, "Inbox");

        assert_eq!(messages["loose"].folder, "root");
    }

    #[test]
    fn test_rebuild_direct_layout_with_session_marker() {
        let root = TempDir::new().unwrap();
        let session = root.path().join("exchange/solo/20240105_090000");
        mk(
            &session.join("user_metadata.json"),
            r#"{"user_email": "solo@example.com"}"#,
        );
        mk(
            &session.join("Inbox/update_AAMkAAAABBBBCCCC1.eml"),
            "Subject: Weekly update\nDate: Fri, 5 Jan 2024 09:00:00 +0000\n\nBody\n",
        );

        let db = TempDir::new().unwrap();
        let store = LedgerStore::open(&db.path().join("ledger.db")).unwrap();
        let stats = rebuild_mail_containers(Some(&store), root.path()).unwrap();

        assert_eq!(stats.sessions, 1);
        let record = store
            .get_record("solo@example.com", "AAMkAAAABBBBCCCC1")
            .unwrap()
            .unwrap();
        assert_eq!(record.display_name, "Weekly update");
        assert_eq!(record.observed_at, "2024-01-05T09:00:00+00:00");
    }

    #[test]
    fn test_rebuild_aggregated_layout_inherits_emails() {
        let root = TempDir::new().unwrap();
        let exchange = root.path().join("exchange");
        // A per-user session supplies awright's full address.
        mk(
            &exchange.join("awright/20240201_000000/user_metadata.json"),
            r#"{"user_email": "alice.wright@example.com"}"#,
        );
        // An older aggregated session only knows the short name.
        mk(
            &exchange.join("all_users/20240105_090000/awright/Inbox/hello_AAMkXYZ987654321.json"),
            &message_json("AAMkXYZ987654321", "Hello"),
        );

        let db = TempDir::new().unwrap();
        let store = LedgerStore::open(&db.path().join("ledger.db")).unwrap();
        let stats = rebuild_mail_containers(Some(&store), root.path()).unwrap();

        assert_eq!(stats.units_written, 1);
        let record = store
            .get_record("alice.wright@example.com", "AAMkXYZ987654321")
            .unwrap()
            .unwrap();
        assert_eq!(record.display_name, "Hello");
        assert_eq!(record.last_modified.as_deref(), Some("2024-01-05T09:00:00Z"));
        assert_eq!(record.observed_at, "2024-01-05T09:00:00+00:00");
    }

    #[test]
    fn test_rebuild_indexes_loose_root_messages() {
        let root = TempDir::new().unwrap();
        let session = root.path().join("exchange/alice/20240105_090000");
        mk(
            &session.join("user_metadata.json"),
            r#"{"user_email": "alice@example.com"}"#,
        );
        mk(
            &session.join("m_AAMkAAAA777788889.json"),
            &message_json("AAMkAAAA777788889", "No folder"),
        );

        let db = TempDir::new().unwrap();
        let store = LedgerStore::open(&db.path().join("ledger.db")).unwrap();
        let stats = rebuild_mail_containers(Some(&store), root.path()).unwrap();

        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.units_written, 1);
        assert!(store
            .get_record("alice@example.com", "AAMkAAAA777788889")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_unmapped_owner_falls_back_to_directory_name() {
        let root = TempDir::new().unwrap();
        mk(
            &root
                .path()
                .join("exchange/all_users/20240105_090000/bmartin/Inbox/m_AAMkAAAA999900001.json"),
            &message_json("AAMkAAAA999900001", "M"),
        );

        let db = TempDir::new().unwrap();
        let store = LedgerStore::open(&db.path().join("ledger.db")).unwrap();
        rebuild_mail_containers(Some(&store), root.path()).unwrap();

        assert!(store
            .get_record("bmartin", "AAMkAAAA999900001")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_dry_run_counts_without_writing() {
        let root = TempDir::new().unwrap();
        mk(
            &root
                .path()
                .join("exchange/alice/20240105_090000/Inbox/m_AAMkAAAA555566667.json"),
            &message_json("AAMkAAAA555566667", "M"),
        );

        let stats = rebuild_mail_containers(None, root.path()).unwrap();
        assert_eq!(stats.units_scanned, 1);
        assert_eq!(stats.units_written, 0);
        assert!(stats.total_bytes > 0);
    }
}
