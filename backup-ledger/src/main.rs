//! Backup Ledger - Main entry point
//!
//! Operator CLI for the incremental-backup change-detection ledger:
//! rebuild from a backup tree, report statistics, export and prune.

use anyhow::Result;
use backup_ledger::rebuild::{scan, RebuildEngine};
use backup_ledger::{logging, LedgerConfig, LedgerStore};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Path to the ledger database (overrides LEDGER_DB)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconstruct the ledger from an existing backup tree on disk
    Rebuild {
        /// Root of the backup tree (overrides BACKUP_ROOT)
        #[arg(long, value_name = "DIR")]
        backup_dir: Option<PathBuf>,

        /// Which container kinds to rebuild
        #[arg(long, value_enum, default_value = "all")]
        kind: RebuildKind,

        /// Scan and report without writing to the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Print aggregate statistics over recent sessions
    Stats {
        /// Reporting window in days
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Export all current records and sessions as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Drop sessions older than the retention horizon
    Prune {
        /// Retention horizon in days (RETAIN_DAYS when omitted)
        #[arg(long)]
        keep_days: Option<i64>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum RebuildKind {
    Files,
    Mail,
    All,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = LedgerConfig::from_env();

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    logging::init(log_level)?;

    let db_path = args.db.unwrap_or(config.db_path.clone());

    match args.command {
        Command::Rebuild {
            backup_dir,
            kind,
            dry_run,
        } => {
            let root = backup_dir.unwrap_or(config.backup_root.clone());
            let engine = if dry_run {
                tracing::info!(root = %root.display(), "Dry run, nothing will be written");
                RebuildEngine::dry_run(root)
            } else {
                let store = LedgerStore::open(&db_path)?;
                RebuildEngine::new(store, root)
            };
            let stats = match kind {
                RebuildKind::Files => engine.rebuild_files()?,
                RebuildKind::Mail => engine.rebuild_mail()?,
                RebuildKind::All => engine.rebuild_all()?,
            };
            tracing::info!(
                sessions = stats.sessions,
                skipped = stats.sessions_skipped,
                scanned = stats.units_scanned,
                written = stats.units_written,
                failed = stats.units_failed,
                size = %scan::human_size(stats.total_bytes),
                "Rebuild summary"
            );
        }
        Command::Stats { days } => {
            let store = LedgerStore::open(&db_path)?;
            let stats = store.stats(days)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Export { output } => {
            let store = LedgerStore::open(&db_path)?;
            let exported_at = chrono::Utc::now().to_rfc3339();
            match output {
                Some(path) => store.export_to_file(&path, &exported_at)?,
                None => println!("{}", store.export_document(&exported_at)?),
            }
        }
        Command::Prune { keep_days } => {
            let store = LedgerStore::open(&db_path)?;
            let outcome = store.prune(keep_days.unwrap_or(config.retain_days))?;
            tracing::info!(
                sessions_deleted = outcome.sessions_deleted,
                history_deleted = outcome.history_deleted,
                "Prune complete"
            );
        }
    }

    Ok(())
}
