//! hashmirror: One-way checksum backups
//!
//! Keeps a backup tree in step with a source tree:
//! - BLAKE3 fingerprints for every file
//! - Fingerprints persisted in LMDB between runs
//! - Only missing or changed files are copied
//! - Nothing is ever deleted from the backup

mod debug_log;
mod progress;

use std::path::{Path, PathBuf};

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, builder::Styles};
use color_eyre::Result;
use tracing::{debug, error, info};

use hashmirror_core::config::CONFIG_FILE;
use hashmirror_core::{
    BackupPass, ChangeKind, Config, LmdbStore, PassOptions, PassOutcome, PassReport, Scanner,
    Snapshot,
};

use crate::progress::PassProgress;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "hashmirror")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "One-way checksum backups of a directory tree")]
#[command(long_about = r#"
hashmirror copies every file whose backup is missing or differs from the
source, judged by content fingerprint. Fingerprints are kept between runs.

Without a subcommand, a single backup pass is run.

Examples:
  hashmirror                          Run one pass using ./hashmirror.toml
  hashmirror plan                     Show what would be copied
  hashmirror run --rescan-backup      Re-fingerprint the backup tree first
  hashmirror scan ./photos            Fingerprint a directory
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup pass
    Run {
        /// Plan only, copy nothing
        #[arg(long)]
        dry_run: bool,

        /// Forget stored backup fingerprints and rescan the backup tree
        #[arg(long)]
        rescan_backup: bool,
    },

    /// Show the files the next pass would copy
    Plan,

    /// Fingerprint a directory and print the result (store untouched)
    Scan {
        /// Directory to scan
        path: PathBuf,

        /// Output format (json, summary)
        #[arg(short, long, default_value = "summary")]
        format: String,
    },

    /// Show version and build info
    Version,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let session_log = debug_log::init(cli.verbose);
    debug!("Session log: {}", session_log.path.display());

    let command = cli.command.unwrap_or(Commands::Run {
        dry_run: false,
        rescan_backup: false,
    });

    match command {
        Commands::Version => {
            eprintln!("hashmirror {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        }
        Commands::Scan { path, format } => {
            scan_command(&path, &format)?;
        }
        Commands::Plan => {
            run_command(
                &cli.config,
                PassOptions {
                    dry_run: true,
                    rescan_backup: false,
                },
            )?;
        }
        Commands::Run {
            dry_run,
            rescan_backup,
        } => {
            run_command(
                &cli.config,
                PassOptions {
                    dry_run,
                    rescan_backup,
                },
            )?;
        }
    }

    Ok(())
}

fn scan_command(path: &Path, format: &str) -> Result<()> {
    info!("Scanning {}...", path.display());

    let records = Scanner::new(path).scan()?;
    let snapshot = Snapshot::from_records(records);

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&snapshot.to_sorted_records())?;
            println!("{json}");
        }
        _ => {
            eprintln!("Files: {}", snapshot.len());
            let total_size: u64 = snapshot
                .files
                .keys()
                .filter_map(|p| std::fs::metadata(path.join(p)).ok())
                .map(|m| m.len())
                .sum();
            eprintln!(
                "Total size: {}",
                humansize::format_size(total_size, humansize::BINARY)
            );

            if snapshot.len() <= 20 {
                eprintln!("\nFiles:");
                for record in snapshot.to_sorted_records() {
                    eprintln!("  {}  {}", record.fingerprint.to_hex(), record.relative_path);
                }
            }
        }
    }

    Ok(())
}

/// One backup pass. Missing roots and an unavailable store end the run
/// with a message but a successful exit status.
fn run_command(config_path: &Path, options: PassOptions) -> Result<()> {
    let config = Config::load(config_path)?;

    let mut store = match LmdbStore::open(&config.store.path, &config.store.namespace) {
        Ok(store) => {
            info!("Checksum store opened at {}", config.store.path.display());
            store
        }
        Err(e) => {
            error!("Program exiting. Could not open checksum store: {e:#}");
            return Ok(());
        }
    };

    let mut progress = PassProgress::new(&config.folders.source, options.dry_run);
    let outcome = BackupPass::from_config(&config)
        .options(options)
        .run_observed(&mut store, &mut progress)?;

    match outcome {
        PassOutcome::Completed(report) => {
            progress.finish(&report);
            if report.dry_run {
                print_plan(&report);
            }
        }
        PassOutcome::SourceMissing(path) => {
            error!("Original folder does not exist: {}", path.display());
        }
        PassOutcome::BackupUnavailable { path, reason } => {
            error!(
                "Failed to create backup folder {}: {reason}. Closing...",
                path.display()
            );
        }
    }

    Ok(())
}

fn print_plan(report: &PassReport) {
    if report.worklist.is_empty() {
        eprintln!("Nothing to copy.");
        return;
    }
    for item in &report.worklist.items {
        let kind = match item.kind {
            ChangeKind::Added => "add",
            ChangeKind::Modified => "update",
        };
        eprintln!("  {kind:<6} {}", item.path);
    }
}
