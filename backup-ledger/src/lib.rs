//! Backup Ledger
//!
//! Persistent change-detection ledger for incremental backups of remote
//! content (document libraries and mailboxes). Records a fingerprint per
//! backed-up unit, decides on later runs whether a unit must be
//! re-fetched, and can rebuild itself from an existing backup tree on
//! disk without contacting any remote system.

pub mod config;
pub mod db;
pub mod error;
pub mod harness;
pub mod logging;
pub mod models;
pub mod rebuild;
pub mod remote;
pub mod session;
pub mod store;
pub mod strategy;

// Re-export commonly used types
pub use config::LedgerConfig;
pub use error::LedgerError;
pub use error::Result;
pub use store::LedgerStore;
