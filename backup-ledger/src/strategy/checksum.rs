//! Byte-checksum comparison.
//!
//! Strongest guarantee, highest cost: the full content is downloaded
//! and hashed before the decision. Size is compared first as a cheap
//! short-circuit.

use super::{ChangeDecision, ChangeDetection};
use crate::models::{Fingerprint, UnitRecord};

#[derive(Debug, Default, Clone, Copy)]
pub struct ChecksumStrategy;

impl ChangeDetection for ChecksumStrategy {
    fn decide(&self, existing: Option<&UnitRecord>, candidate: &Fingerprint) -> ChangeDecision {
        let Some(record) = existing else {
            return ChangeDecision::New;
        };
        if record.byte_size != candidate.byte_size {
            return ChangeDecision::Changed;
        }
        let recorded = record.checksum.as_deref().unwrap_or("");
        let current = candidate.checksum.as_deref().unwrap_or("");
        if recorded != current {
            return ChangeDecision::Changed;
        }
        ChangeDecision::Unchanged
    }

    fn requires_content(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "checksum"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(size: i64, checksum: &str) -> UnitRecord {
        UnitRecord {
            id: 1,
            container_id: "site-1".into(),
            unit_path: "/docs/a.txt".into(),
            display_name: "a.txt".into(),
            byte_size: size,
            last_modified: Some("t".into()),
            checksum: Some(checksum.into()),
            etag: None,
            ctag: None,
            version: 1,
            observed_at: "t".into(),
        }
    }

    fn candidate(size: i64, checksum: &str) -> Fingerprint {
        Fingerprint::new("site-1", "/docs/a.txt", "a.txt", size, "t").with_checksum(checksum)
    }

    #[test]
    fn test_absent_record_is_new() {
        assert_eq!(
            ChecksumStrategy.decide(None, &candidate(100, "aaa")),
            ChangeDecision::New
        );
    }

    #[test]
    fn test_size_difference_is_changed() {
        assert_eq!(
            ChecksumStrategy.decide(Some(&record(100, "aaa")), &candidate(101, "aaa")),
            ChangeDecision::Changed
        );
    }

    #[test]
    fn test_checksum_difference_is_changed() {
        assert_eq!(
            ChecksumStrategy.decide(Some(&record(100, "aaa")), &candidate(100, "bbb")),
            ChangeDecision::Changed
        );
    }

    #[test]
    fn test_identical_is_unchanged() {
        assert_eq!(
            ChecksumStrategy.decide(Some(&record(100, "aaa")), &candidate(100, "aaa")),
            ChangeDecision::Unchanged
        );
    }
}
