//! Server-supplied opaque tag comparison.
//!
//! Decides from one metadata listing, with zero content transfer for
//! unchanged units. Correctness depends entirely on the remote issuing
//! a new tag on every real content change; a remote that fails to do so
//! yields missed changes, an accepted trade-off for large containers.
//!
//! A missing tag compares as the empty string, so the first observation
//! that carries a tag reads as changed.

use super::{ChangeDecision, ChangeDetection};
use crate::models::{Fingerprint, UnitRecord};

#[derive(Debug, Default, Clone, Copy)]
pub struct ServerTagStrategy;

impl ChangeDetection for ServerTagStrategy {
    fn decide(&self, existing: Option<&UnitRecord>, candidate: &Fingerprint) -> ChangeDecision {
        let Some(record) = existing else {
            return ChangeDecision::New;
        };
        let recorded_tag = record.etag.as_deref().unwrap_or("");
        let current_tag = candidate.etag.as_deref().unwrap_or("");
        if recorded_tag != current_tag || record.byte_size != candidate.byte_size {
            return ChangeDecision::Changed;
        }
        ChangeDecision::Unchanged
    }

    fn name(&self) -> &'static str {
        "server-tag"
    }
}
