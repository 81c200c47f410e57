pub mod backup_session;
pub mod fingerprint;
pub mod unit_record;

pub use backup_session::BackupSession;
pub use fingerprint::Fingerprint;
pub use unit_record::UnitRecord;
