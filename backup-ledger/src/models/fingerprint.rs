//! The set of change-relevant attributes observed for one remote unit
//! at a point in time. Fingerprints are produced at the remote boundary
//! (or by the rebuild engine from disk) and consumed by the
//! change-detection strategies and the ledger store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Owning remote container (a site or a mailbox owner).
    pub container_id: String,
    /// Stable path or identifier within the container.
    pub unit_path: String,
    pub display_name: String,
    pub byte_size: i64,
    /// Remote-reported modification timestamp. Opaque: compared for
    /// equality only, never parsed.
    pub last_modified: String,
    /// SHA-256 hex digest of the content, when it has been read.
    pub checksum: Option<String>,
    /// Server-supplied change tokens (Graph eTag/cTag analogues).
    pub etag: Option<String>,
    pub ctag: Option<String>,
    /// When this observation was made. Live runs use wall-clock time;
    /// the rebuild engine derives it from the session directory name so
    /// that rebuilds are deterministic.
    pub observed_at: String,
}

impl Fingerprint {
    pub fn new(
        container_id: impl Into<String>,
        unit_path: impl Into<String>,
        display_name: impl Into<String>,
        byte_size: i64,
        last_modified: impl Into<String>,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            unit_path: unit_path.into(),
            display_name: display_name.into(),
            byte_size,
            last_modified: last_modified.into(),
            checksum: None,
            etag: None,
            ctag: None,
            observed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_tags(mut self, etag: Option<String>, ctag: Option<String>) -> Self {
        self.etag = etag;
        self.ctag = ctag;
        self
    }

    pub fn with_observed_at(mut self, observed_at: impl Into<String>) -> Self {
        self.observed_at = observed_at.into();
        self
    }
}
