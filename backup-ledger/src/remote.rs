//! Interfaces to the remote collaborators the harness drives.
//!
//! The ledger never implements an HTTP client itself; backup drivers
//! supply these traits. Implementations must surface rate limiting and
//! authentication expiry as distinct error kinds
//! ([`LedgerError::TransientRemote`] / [`LedgerError::AuthExpired`]) so
//! the harness can refresh credentials and retry without escalating.

use crate::error::Result;
use crate::models::Fingerprint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A sub-container of a remote container: a document library within a
/// site, or a mail folder within a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn expires_within(&self, window: chrono::Duration) -> bool {
        self.expires_at <= Utc::now() + window
    }
}

/// Remote content provider. Listing yields fingerprint-bearing
/// descriptors (pagination is the implementation's concern); fetching
/// yields the unit's full content.
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    async fn list_sub_containers(&self, container_id: &str) -> Result<Vec<ContainerRef>>;

    async fn list_units(
        &self,
        sub_container: &ContainerRef,
        token: &AccessToken,
    ) -> Result<Vec<Fingerprint>>;

    async fn fetch_content(
        &self,
        sub_container: &ContainerRef,
        unit_path: &str,
        token: &AccessToken,
    ) -> Result<Vec<u8>>;
}

/// Bearer-token source. The harness refreshes proactively before expiry
/// and reactively on an authentication-expiry error, retrying the
/// failed call exactly once per refresh.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self) -> Result<AccessToken>;

    async fn refresh(&self) -> Result<AccessToken>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry_window() {
        let fresh = AccessToken {
            secret: "s".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        assert!(!fresh.expires_within(chrono::Duration::seconds(60)));
        assert!(fresh.expires_within(chrono::Duration::hours(2)));

        let stale = AccessToken {
            secret: "s".into(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
        };
        assert!(stale.expires_within(chrono::Duration::seconds(0)));
    }
}
