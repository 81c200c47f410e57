//! Error taxonomy for the ledger and its remote collaborators.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Rate limiting or a network timeout on the remote side. Retryable
    /// by the caller; the ledger itself never retries these.
    #[error("Transient remote error: {0}")]
    TransientRemote(String),

    /// The bearer token was rejected. Triggers one credential refresh
    /// followed by one retry of the failed call.
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    /// Content or metadata for a single unit could not be obtained.
    /// Counted as a per-unit failure; never written to the ledger.
    #[error("Unit unreadable: {0}")]
    UnitUnreadable(String),

    /// Concurrent upserts on the same key observed inconsistent
    /// pre-state. Fatal to that upsert; retried by re-reading.
    #[error("Ledger integrity violation: {0}")]
    LedgerIntegrity(String),

    /// A session directory's layout could not be classified. Logged and
    /// skipped, never guessed.
    #[error("Ambiguous session layout: {0}")]
    ReconciliationAmbiguity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
