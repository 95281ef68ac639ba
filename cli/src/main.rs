//! assetforge - Command-line interface for the asset pipeline.
//!
//! Runs the configured stages over an asset tree, builds standalone
//! indexes, and inspects encrypted files. Logs go to stderr through
//! `tracing`; `RUST_LOG` overrides the default level.

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use engine::{
    context::DEFAULT_MAGIC, EncryptionHeader, FileRecord, Indexer, ItemOutcome, OutputMode,
    PathFilter, ProcessorConfig, ProgressCallback, ResourceProcessor, RunSummary, Stage,
    StageReport,
};

/// assetforge - prepare encrypted, archived and indexed game assets
#[derive(Parser, Debug)]
#[command(name = "assetforge")]
#[command(version)]
#[command(about = "Encrypt, archive and index asset trees")]
struct Cli {
    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the enabled stages of a configuration
    Process(ProcessArgs),

    /// Write an index of a single tree
    Index(IndexArgs),

    /// Print the header of an encrypted file
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Path to assetforge.toml (defaults apply when omitted)
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source directory (overrides config)
    #[arg(long, value_name = "PATH")]
    source: Option<PathBuf>,

    /// Destination directory (overrides config)
    #[arg(long, value_name = "PATH")]
    destination: Option<PathBuf>,

    /// Simple password for key derivation
    #[arg(long, env = "ASSETFORGE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Simple salt for key derivation
    #[arg(long, env = "ASSETFORGE_SALT", hide_env_values = true)]
    salt: Option<String>,

    /// Reprocess everything, ignoring up-to-date outputs
    #[arg(long)]
    full: bool,
}

#[derive(Args, Debug)]
struct IndexArgs {
    /// Directory to index
    #[arg(long, value_name = "PATH")]
    source: PathBuf,

    /// Index file to write
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Glob a path must match to be listed (repeatable)
    #[arg(long = "include", value_name = "GLOB")]
    includes: Vec<String>,

    /// Glob that keeps a path out of the index (repeatable)
    #[arg(long = "exclude", value_name = "GLOB")]
    excludes: Vec<String>,

    /// Tree to look up original sizes in
    #[arg(long, value_name = "PATH")]
    unprocessed: Option<PathBuf>,

    /// Append to the index instead of replacing it
    #[arg(long)]
    append: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Encrypted file
    file: PathBuf,

    /// Magic the file is expected to start with
    #[arg(long, default_value = DEFAULT_MAGIC)]
    magic: String,
}

/// CLI implementation of ProgressCallback for displaying run progress
struct CliProgress {
    verbose: bool,
    start_time: Instant,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_stage_started(&self, stage: Stage) {
        eprintln!("==> {}", stage);
    }

    fn on_item_completed(&self, stage: Stage, item: &FileRecord, outcome: ItemOutcome) {
        if self.verbose {
            let status = match outcome {
                ItemOutcome::Processed => "Done",
                ItemOutcome::Skipped => "Skipped",
            };
            eprintln!("  [{}] {}: {}", stage, status, item.relative);
        }
    }

    fn on_stage_completed(&self, report: &StageReport) {
        eprintln!(
            "    {} processed, {} skipped, {} read",
            report.processed,
            report.skipped,
            Self::format_bytes(report.bytes_read)
        );
    }

    fn on_run_completed(&self, summary: &RunSummary) {
        eprintln!();
        eprintln!("Run {} complete!", summary.run_id);
        eprintln!(
            "Started: {}",
            summary.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
        eprintln!(
            "Summary: {} processed, {} skipped across {} stages",
            summary.total_processed(),
            summary.total_skipped(),
            summary.stages.len()
        );
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Parse arguments, then run the selected command
fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run_cli(&cli) {
        Ok(()) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(cli: &Cli) -> Result<(), String> {
    match &cli.command {
        Commands::Process(args) => run_process(args, cli.verbose),
        Commands::Index(args) => run_index(args, cli.verbose),
        Commands::Inspect(args) => run_inspect(args),
    }
}

fn run_process(args: &ProcessArgs, verbose: bool) -> Result<(), String> {
    let mut config = match &args.config {
        Some(path) => ProcessorConfig::load(path).map_err(|e| format!("Failed to load config: {}", e))?,
        None => ProcessorConfig::default(),
    };

    if let Some(source) = &args.source {
        config.source = source.clone();
    }
    if let Some(destination) = &args.destination {
        config.destination = destination.clone();
    }
    if args.password.is_some() {
        config.encryption.simple_password = args.password.clone();
    }
    if args.salt.is_some() {
        config.encryption.simple_salt = args.salt.clone();
    }
    if args.full {
        config.incremental = false;
    }

    if !config.source.is_dir() {
        return Err(format!(
            "Source directory does not exist: {}",
            config.source.display()
        ));
    }

    tracing::debug!(
        source = %config.source.display(),
        destination = %config.destination.display(),
        incremental = config.incremental,
        "resolved configuration"
    );

    let processor = ResourceProcessor::new(config).map_err(|e| e.to_string())?;
    let progress = CliProgress::new(verbose);
    processor
        .run(&progress)
        .map_err(|e| format!("Run failed: {}", e))?;
    Ok(())
}

fn run_index(args: &IndexArgs, verbose: bool) -> Result<(), String> {
    let filter = PathFilter::new(args.includes.as_slice(), args.excludes.as_slice())
        .map_err(|e| e.to_string())?;

    let mut indexer = Indexer::new(&args.source, &args.output, filter).with_mode(if args.append {
        OutputMode::Append
    } else {
        OutputMode::Truncate
    });
    if let Some(unprocessed) = &args.unprocessed {
        indexer = indexer.with_unprocessed_root(unprocessed);
    }

    let progress = CliProgress::new(verbose);
    let report = indexer
        .run(&progress)
        .map_err(|e| format!("Indexing failed: {}", e))?;
    progress.on_stage_completed(&report);
    Ok(())
}

fn run_inspect(args: &InspectArgs) -> Result<(), String> {
    let mut file = File::open(&args.file)
        .map_err(|e| format!("Cannot open {}: {}", args.file.display(), e))?;
    let file_len = file
        .metadata()
        .map_err(|e| format!("Cannot read {}: {}", args.file.display(), e))?
        .len();

    let header = EncryptionHeader::read_from(&mut file, args.magic.as_bytes()).map_err(|e| e.to_string())?;
    let iv_hex: String = header.iv.iter().map(|b| format!("{:02x}", b)).collect();

    println!("magic:          {}", String::from_utf8_lossy(&header.magic));
    println!("plaintext size: {}", header.plaintext_len);
    println!("iv:             {} ({} bytes)", iv_hex, header.iv.len());
    println!(
        "ciphertext:     {} bytes",
        file_len.saturating_sub(header.encoded_len() as u64)
    );
    Ok(())
}
