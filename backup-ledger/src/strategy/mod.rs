//! Change-detection strategies.
//!
//! Pure decision functions that consume a candidate [`Fingerprint`] and
//! the ledger's current record for that path, and answer whether the
//! unit is new, changed or unchanged. Which strategy to use per
//! container type is the calling driver's configuration decision.

pub mod checksum;
pub mod immutable_id;
pub mod server_tag;

pub use checksum::ChecksumStrategy;
pub use immutable_id::ImmutableIdStrategy;
pub use server_tag::ServerTagStrategy;

use crate::models::{Fingerprint, UnitRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    New,
    Changed,
    Unchanged,
}

pub trait ChangeDetection: Send + Sync {
    fn decide(&self, existing: Option<&UnitRecord>, candidate: &Fingerprint) -> ChangeDecision;

    /// Whether the candidate's content must be fetched and hashed
    /// before a decision can be made.
    fn requires_content(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}
