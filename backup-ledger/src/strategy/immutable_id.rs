//! Immutable-identifier set difference.
//!
//! Valid only for remotes whose units are never edited in place (for
//! example mailbox messages, which are only created or deleted). One
//! listing call yields the entire decision for a container: identifiers
//! not yet in the ledger are exactly the new set, and an already-known
//! identifier can never represent changed content by construction.
//!
//! A new identifier whose content subsequently cannot be fetched is a
//! hard per-unit failure; the harness never fabricates a placeholder
//! record for it.

use super::{ChangeDecision, ChangeDetection};
use crate::models::{Fingerprint, UnitRecord};
use std::collections::{BTreeSet, HashSet};

/// Identifiers present in the current listing but absent from the
/// ledger. Returned sorted so callers process new units in a stable
/// order.
pub fn new_identifiers(known: &HashSet<String>, listed: &HashSet<String>) -> BTreeSet<String> {
    listed.difference(known).cloned().collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImmutableIdStrategy;

impl ChangeDetection for ImmutableIdStrategy {
    fn decide(&self, existing: Option<&UnitRecord>, _candidate: &Fingerprint) -> ChangeDecision {
        match existing {
            None => ChangeDecision::New,
            Some(_) => ChangeDecision::Unchanged,
        }
    }

    fn name(&self) -> &'static str {
        "immutable-id"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_difference_completeness() {
        let known = set(&["1", "2", "3"]);
        let listed = set(&["2", "3", "4", "5"]);

        let fresh = new_identifiers(&known, &listed);
        assert_eq!(
            fresh.into_iter().collect::<Vec<_>>(),
            vec!["4".to_string(), "5".to_string()]
        );
    }

    #[test]
    fn test_no_overlap_everything_is_new() {
        let fresh = new_identifiers(&set(&[]), &set(&["a", "b"]));
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn test_full_overlap_nothing_is_new() {
        let known = set(&["a", "b"]);
        assert!(new_identifiers(&known, &known).is_empty());
    }

    #[test]
    fn test_decide_never_returns_changed() {
        let candidate = Fingerprint::new("user@example.com", "msg-1", "Subject", 10, "");
        assert_eq!(
            ImmutableIdStrategy.decide(None, &candidate),
            ChangeDecision::New
        );

        let record = UnitRecord {
            id: 1,
            container_id: "user@example.com".into(),
            unit_path: "msg-1".into(),
            display_name: "Subject".into(),
            byte_size: 99, // size may differ; identifiers are immutable
            last_modified: None,
            checksum: None,
            etag: None,
            ctag: None,
            version: 1,
            observed_at: "t".into(),
        };
        assert_eq!(
            ImmutableIdStrategy.decide(Some(&record), &candidate),
            ChangeDecision::Unchanged
        );
    }
}
