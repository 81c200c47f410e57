use std::path::PathBuf;

/// Explicit configuration for the ledger, the rebuild engine and the
/// execution harness. Constructed once and passed down; there is no
/// ambient process-wide state.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    pub backup_root: PathBuf,
    pub max_workers: usize,
    pub retain_days: i64,
    pub log_level: String,
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            db_path: PathBuf::from(
                std::env::var("LEDGER_DB").unwrap_or_else(|_| "backup_ledger.db".into()),
            ),
            backup_root: PathBuf::from(
                std::env::var("BACKUP_ROOT").unwrap_or_else(|_| "backup".into()),
            ),
            max_workers: std::env::var("MAX_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            retain_days: std::env::var("RETAIN_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("backup_ledger.db"),
            backup_root: PathBuf::from("backup"),
            max_workers: 5,
            retain_days: 90,
            log_level: "info".into(),
        }
    }
}
