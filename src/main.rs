//! ferry - Bulk copy and move with live progress, conflict handling and rollback.
//!
//! Usage:
//!   ferry scan SOURCES...               Count files, directories and bytes
//!   ferry conflicts DEST SOURCES...     List name collisions at a destination
//!   ferry copy SOURCES... DEST          Copy into a directory
//!   ferry move SOURCES... DEST          Move into a directory
//!   ferry --help                        Show help

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, eyre};
use tracing_subscriber::EnvFilter;

use ferry_ops::{
    Cancel, ConflictPolicy, EngineConfig, PreviewId, Resolution, ScanEvent, SortColumn, SortOrder,
    SortSpec, SourceItem, TransferEngine, TransferEvent, TransferKind, TransferOptions,
    TransferPhase, VolumeId,
};

#[derive(Parser)]
#[command(
    name = "ferry",
    version,
    about = "Bulk copy and move with live progress, conflict handling and rollback",
    long_about = "ferry copies and moves file trees with live progress.\n\n\
                  Name collisions can be skipped, overwritten, renamed or answered one by one. \
                  Ctrl-C cancels a transfer and removes everything it created."
)]
struct Cli {
    /// Engine configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Count files, directories and bytes without writing anything
    Scan {
        /// Paths to scan
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        #[command(flatten)]
        order: OrderArgs,

        /// Minimum milliseconds between progress updates
        #[arg(short, long)]
        interval: Option<u64>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List entries of a destination that incoming items would collide with
    Conflicts {
        /// Destination directory, relative to the volume root
        destination: PathBuf,

        /// Items that would be transferred
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Volume the destination lives on
        #[arg(long, default_value = VolumeId::ROOT)]
        volume: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Copy sources into a destination directory
    Copy(TransferArgs),

    /// Move sources into a destination directory
    Move(TransferArgs),
}

#[derive(Args)]
struct OrderArgs {
    /// Processing order column (name, extension, size, modified, created)
    #[arg(long, default_value = "name")]
    sort: SortColumn,

    /// Processing order direction (asc, desc)
    #[arg(long, default_value = "asc")]
    order: SortOrder,
}

impl OrderArgs {
    fn spec(&self) -> SortSpec {
        SortSpec::new(self.sort, self.order)
    }
}

#[derive(Args)]
struct TransferArgs {
    /// Sources followed by the destination directory
    #[arg(required = true, num_args = 2..)]
    paths: Vec<PathBuf>,

    /// What to do when a destination entry already exists
    /// (skip, overwrite, rename, stop, ask)
    #[arg(long, default_value = "ask")]
    on_conflict: ConflictPolicy,

    #[command(flatten)]
    order: OrderArgs,

    /// Minimum milliseconds between progress updates
    #[arg(short, long)]
    interval: Option<u64>,

    /// Destination is on another volume: never rename, always copy
    #[arg(long)]
    cross_volume: bool,

    /// Scan first and show totals before transferring
    #[arg(long)]
    preview: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Text,
    /// One JSON event per line
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let engine = TransferEngine::new(config);

    match cli.command {
        Command::Scan {
            sources,
            order,
            interval,
            format,
        } => {
            run_scan(&engine, sources, order.spec(), interval, format).await?;
        }
        Command::Conflicts {
            destination,
            sources,
            volume,
            format,
        } => {
            run_conflicts(&engine, &destination, &sources, &volume, format)?;
        }
        Command::Copy(args) => run_transfer(&engine, TransferKind::Copy, args).await?,
        Command::Move(args) => run_transfer(&engine, TransferKind::Move, args).await?,
    }

    Ok(())
}

/// Log to stderr, filtered by `FERRY_LOG` (default: warn).
fn init_logging() {
    let filter = EnvFilter::try_from_env("FERRY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the engine config from `path`, or from the user config directory
/// when present, else defaults.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match dirs::config_dir().map(|d| d.join("ferry").join("config.toml")) {
            Some(path) if path.exists() => path,
            _ => return Ok(EngineConfig::default()),
        },
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    config
        .validate()
        .map_err(|e| eyre!("Invalid config {}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Run a scan preview and print its totals.
async fn run_scan(
    engine: &TransferEngine,
    sources: Vec<PathBuf>,
    sort: SortSpec,
    interval: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let id = engine.start_scan(sources, sort, interval);
    match scan_to_end(engine, id, format).await? {
        ScanEvent::Complete {
            files_total,
            dirs_total,
            bytes_total,
        } if format == OutputFormat::Text => {
            println!(
                "{} files, {} directories, {}",
                files_total,
                dirs_total,
                format_size(bytes_total)
            );
        }
        _ => {}
    }
    Ok(())
}

/// Follow a preview to its terminal event. Errors and cancellation are
/// reported as errors.
async fn scan_to_end(engine: &TransferEngine, id: PreviewId, format: OutputFormat) -> Result<ScanEvent> {
    let mut listener = engine.subscribe_scan(id);

    loop {
        let envelope = tokio::select! {
            envelope = listener.recv() => envelope,
            _ = tokio::signal::ctrl_c() => {
                engine.cancel_scan(id);
                continue;
            }
        };
        let Some(envelope) = envelope else {
            return Err(eyre!("Scan event stream closed"));
        };

        if format == OutputFormat::Json {
            println!("{}", serde_json::to_string(&envelope)?);
        }

        match envelope.event {
            ScanEvent::Progress {
                files_found,
                bytes_found,
                ..
            } => {
                if format == OutputFormat::Text {
                    status_line(&format!(
                        "Scanning: {} files, {}",
                        files_found,
                        format_size(bytes_found)
                    ));
                }
            }
            event @ ScanEvent::Complete { .. } => {
                clear_status_line(format);
                return Ok(event);
            }
            ScanEvent::Error { error } => {
                clear_status_line(format);
                return Err(eyre!(error)).context("Scan failed");
            }
            ScanEvent::Cancelled { files_found, .. } => {
                clear_status_line(format);
                return Err(eyre!("Scan cancelled after {files_found} files"));
            }
        }
    }
}

/// List destination collisions for the given sources.
fn run_conflicts(
    engine: &TransferEngine,
    destination: &Path,
    sources: &[PathBuf],
    volume: &str,
    format: OutputFormat,
) -> Result<()> {
    let items = sources
        .iter()
        .map(|source| source_item(source))
        .collect::<Result<Vec<_>>>()?;

    let conflicts = engine
        .check_conflicts(&VolumeId::new(volume), &items, destination)
        .context("Conflict check failed")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&conflicts)?);
        }
        OutputFormat::Text => {
            if conflicts.is_empty() {
                println!("No conflicts.");
            }
            for conflict in &conflicts {
                let mut notes = Vec::new();
                if conflict.is_directory {
                    notes.push("directory");
                }
                if conflict.destination_is_newer() {
                    notes.push("existing is newer");
                }
                if conflict.is_larger {
                    notes.push("incoming is larger");
                }
                println!(
                    "{:<40} {:>10} -> {:>10}  {}",
                    conflict.name,
                    format_size(conflict.source_size),
                    format_size(conflict.destination_size),
                    notes.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn source_item(path: &Path) -> Result<SourceItem> {
    let meta = std::fs::symlink_metadata(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    let name = path
        .file_name()
        .ok_or_else(|| eyre!("{} has no file name", path.display()))?
        .to_string_lossy();
    let size = if meta.is_dir() { 0 } else { meta.len() };
    let modified = meta.modified().ok().map(DateTime::<Utc>::from);
    Ok(SourceItem::new(name.as_ref(), size, modified))
}

/// Run a copy or move to completion, prompting for conflicts.
async fn run_transfer(engine: &TransferEngine, kind: TransferKind, args: TransferArgs) -> Result<()> {
    let Some((destination, sources)) = args.paths.split_last() else {
        return Err(eyre!("Missing destination"));
    };
    let sources = sources.to_vec();
    let format = args.format;

    let mut builder = TransferOptions::builder();
    builder
        .conflict_policy(args.on_conflict)
        .sort(args.order.spec());
    if let Some(interval) = args.interval {
        builder.progress_interval_ms(interval);
    }
    if args.preview {
        let id = engine.start_scan(sources.clone(), args.order.spec(), args.interval);
        if let ScanEvent::Complete {
            files_total,
            bytes_total,
            ..
        } = scan_to_end(engine, id, format).await?
            && format == OutputFormat::Text
        {
            eprintln!("{} files, {} to transfer", files_total, format_size(bytes_total));
        }
        builder.preview_id(id);
    }
    let options = builder.build()?;

    let mut listener = engine.transfer_events();
    let id = if args.cross_volume {
        engine.start_cross_volume_transfer(sources, destination.clone(), kind, options)
    } else {
        engine.start_transfer(sources, destination.clone(), kind, options)
    }
    .context("Transfer rejected")?;
    listener.bind(id);

    let mut cancelling = false;
    loop {
        let envelope = tokio::select! {
            envelope = listener.recv() => envelope,
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                clear_status_line(format);
                eprintln!("Cancelling, removing what was created...");
                let engine = engine.clone();
                tokio::spawn(async move { engine.cancel_transfer(id, Cancel::Rollback).await });
                continue;
            }
        };
        let Some(envelope) = envelope else {
            return Err(eyre!("Transfer event stream closed"));
        };

        if format == OutputFormat::Json {
            println!("{}", serde_json::to_string(&envelope)?);
        }

        match envelope.event {
            TransferEvent::Progress {
                phase,
                files_done,
                files_total,
                bytes_done,
                bytes_total,
                ..
            } => {
                if format == OutputFormat::Text {
                    status_line(&format!(
                        "{}: {}/{} files, {} / {}",
                        phase_label(phase),
                        files_done,
                        files_total,
                        format_size(bytes_done),
                        format_size(bytes_total)
                    ));
                }
            }
            TransferEvent::ConflictsDetected { total, .. } => {
                if format == OutputFormat::Text {
                    clear_status_line(format);
                    eprintln!("{total} item(s) already exist at the destination");
                }
            }
            TransferEvent::Conflict {
                destination_path,
                source_size,
                destination_size,
                destination_is_newer,
                is_directory,
                ..
            } => {
                clear_status_line(format);
                eprintln!(
                    "{} already exists{} ({} existing, {} incoming{})",
                    destination_path.display(),
                    if is_directory { " (directory conflict)" } else { "" },
                    format_size(destination_size),
                    format_size(source_size),
                    if destination_is_newer { ", existing is newer" } else { "" }
                );
                let answer = tokio::select! {
                    answer = prompt_resolution() => answer?,
                    _ = tokio::signal::ctrl_c() => None,
                };
                match answer {
                    Some((resolution, apply_to_all)) => {
                        engine.resolve_conflict(id, resolution, apply_to_all);
                    }
                    None if !cancelling => {
                        cancelling = true;
                        eprintln!("Cancelling, removing what was created...");
                        let engine = engine.clone();
                        tokio::spawn(async move { engine.cancel_transfer(id, Cancel::Rollback).await });
                    }
                    None => {}
                }
            }
            TransferEvent::Complete {
                files_processed,
                bytes_processed,
                files_skipped,
            } => {
                clear_status_line(format);
                if format == OutputFormat::Text {
                    println!(
                        "{} {} files, {}{}",
                        if kind == TransferKind::Move { "Moved" } else { "Copied" },
                        files_processed,
                        format_size(bytes_processed),
                        if files_skipped > 0 {
                            format!(", {files_skipped} skipped")
                        } else {
                            String::new()
                        }
                    );
                }
                return Ok(());
            }
            TransferEvent::Error { error } => {
                clear_status_line(format);
                return Err(eyre!(error)).context("Transfer failed");
            }
            TransferEvent::Cancelled {
                files_processed,
                rolled_back,
                files_rolled_back,
            } => {
                clear_status_line(format);
                if rolled_back {
                    return Err(eyre!(
                        "Transfer cancelled after {files_processed} files, {files_rolled_back} removed"
                    ));
                }
                return Err(eyre!("Transfer cancelled after {files_processed} files"));
            }
        }
    }
}

/// Ask how to settle a conflict. `None` means cancel.
async fn prompt_resolution() -> Result<Option<(Resolution, bool)>> {
    tokio::task::spawn_blocking(|| -> Result<Option<(Resolution, bool)>> {
        let stdin = std::io::stdin();
        loop {
            eprint!("[s]kip, [o]verwrite, [r]ename, [S]kip all, [O]verwrite all, [R]ename all, [c]ancel: ");
            std::io::stderr().flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                return Ok(None);
            }
            match line.trim() {
                "s" => return Ok(Some((Resolution::Skip, false))),
                "o" => return Ok(Some((Resolution::Overwrite, false))),
                "S" => return Ok(Some((Resolution::Skip, true))),
                "O" => return Ok(Some((Resolution::Overwrite, true))),
                "r" => return Ok(Some((Resolution::Rename, false))),
                "R" => return Ok(Some((Resolution::Rename, true))),
                "c" | "C" => return Ok(None),
                _ => {}
            }
        }
    })
    .await?
}

fn phase_label(phase: TransferPhase) -> &'static str {
    match phase {
        TransferPhase::Scanning => "Scanning",
        TransferPhase::Copying => "Transferring",
        TransferPhase::Deleting => "Removing sources",
        TransferPhase::Completed => "Done",
        TransferPhase::Errored => "Failed",
        TransferPhase::Cancelled => "Cancelled",
    }
}

/// Overwrite the current stderr line.
fn status_line(text: &str) {
    eprint!("\r\x1b[2K{text}");
    let _ = std::io::stderr().flush();
}

fn clear_status_line(format: OutputFormat) {
    if format == OutputFormat::Text {
        eprint!("\r\x1b[2K");
    }
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
