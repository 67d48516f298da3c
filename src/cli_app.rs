//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use neurodatahub_telemetry::core::config::Config;
use neurodatahub_telemetry::export::{ExportReport, run_export};
use neurodatahub_telemetry::ingest::{IngestService, Summary};
use neurodatahub_telemetry::logger::activity::ActivityLog;
use neurodatahub_telemetry::server;
use neurodatahub_telemetry::store::document::DocumentStore;

/// Operator CLI for the NeuroDataHub telemetry backend.
#[derive(Debug, Parser)]
#[command(
    name = "ndh-telemetry",
    author,
    version,
    about = "NeuroDataHub telemetry ingestion and aggregation service",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the HTTP ingestion service.
    Serve(ServeArgs),
    /// Push one event payload through the write path (file or stdin).
    Ingest(IngestArgs),
    /// Print the aggregate counters.
    Summary,
    /// Export the document into SQLite tables.
    Export(ExportArgs),
    /// Show the effective configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args)]
struct ServeArgs {
    /// Override the listen address (host:port).
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct IngestArgs {
    /// JSON payload file; reads stdin when omitted or `-`.
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ExportArgs {
    /// Override the export database path.
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// Print the full effective configuration.
    #[arg(long)]
    show: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or rejected payload.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Serve(args) => run_serve(cli, args),
        Command::Ingest(args) => run_ingest(cli, args),
        Command::Summary => run_summary(cli),
        Command::Export(args) => run_export_command(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Config::load(cli.config.as_deref()).map_err(|e| CliError::Runtime(e.to_string()))
}

// ──────────────────── serve ────────────────────

fn run_serve(cli: &Cli, args: &ServeArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if let Some(bind) = &args.bind {
        config.server.bind_addr.clone_from(bind);
    }
    let addr = config
        .bind_addr()
        .map_err(|e| CliError::User(e.to_string()))?;

    let activity = ActivityLog::open(&config.logging);
    let service = Arc::new(IngestService::from_config(&config, activity));

    if output_mode(cli) == OutputMode::Human {
        eprintln!(
            "{} listening on {} (document: {})",
            "ndh-telemetry".bold(),
            addr.to_string().cyan(),
            config.store.document_path.display()
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(format!("building tokio runtime: {e}")))?;

    runtime
        .block_on(server::serve(&config, service))
        .map_err(|e| CliError::Runtime(e.to_string()))
}

// ──────────────────── ingest ────────────────────

fn run_ingest(cli: &Cli, args: &IngestArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let body = match args.file.as_deref() {
        Some(path) if path.as_os_str() != "-" => fs::read(path)
            .map_err(|e| CliError::User(format!("cannot read {}: {e}", path.display())))?,
        _ => {
            let mut buf = Vec::new();
            io::stdin().lock().read_to_end(&mut buf)?;
            buf
        }
    };

    let service = IngestService::from_config(&config, ActivityLog::open(&config.logging));
    match service.ingest(&body) {
        Ok(receipt) => {
            match output_mode(cli) {
                OutputMode::Human => println!(
                    "{} {} event stored ({} events retained)",
                    "ok".green().bold(),
                    receipt.event_type,
                    receipt.total_events
                ),
                OutputMode::Json => write_json_line(&receipt.to_body())?,
            }
            Ok(())
        }
        Err(error) => {
            match output_mode(cli) {
                OutputMode::Human => eprintln!(
                    "{} {}: {}",
                    "error".red().bold(),
                    error.reason(),
                    error.public_message()
                ),
                OutputMode::Json => write_json_line(&error.to_body())?,
            }
            Err(CliError::User(format!("event rejected: {}", error.reason())))
        }
    }
}

// ──────────────────── summary ────────────────────

fn run_summary(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let service = IngestService::from_config(&config, ActivityLog::disabled());
    let summary = service.summary();

    match output_mode(cli) {
        OutputMode::Human => print_summary_human(&summary),
        OutputMode::Json => write_json_line(&serde_json::to_value(&summary)?)?,
    }
    Ok(())
}

fn print_summary_human(summary: &Summary) {
    let counts = &summary.counts;
    let feedback = &counts.feedback_count;

    println!("{}", "Telemetry summary".bold());
    println!("  Last updated:    {}", summary.last_updated_display());
    println!("  Events retained: {}", summary.total_events);
    println!(
        "  Downloads:       {} succeeded, {} failed",
        counts.total_successful_runs.to_string().green(),
        counts.total_failed_runs.to_string().red()
    );
    println!(
        "  Feedback:        quick {} / detailed {} (legacy: short {} / comprehensive {})",
        feedback.quick, feedback.detailed, feedback.short, feedback.comprehensive
    );
    println!("  With logs:       {}", feedback.with_logs);

    if !feedback.by_rating.is_empty() {
        println!("{}", "Ratings".bold());
        for (rating, count) in &feedback.by_rating {
            println!("  {rating:<24} {count:>8}");
        }
    }

    if !counts.per_dataset.is_empty() {
        println!("{}", "Datasets".bold());
        println!("  {:<24} {:>8} {:>8}", "dataset", "success", "fail");
        for (dataset, ds) in &counts.per_dataset {
            println!("  {dataset:<24} {:>8} {:>8}", ds.success, ds.fail);
        }
    }
}

// ──────────────────── export ────────────────────

fn run_export_command(cli: &Cli, args: &ExportArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let database = args
        .database
        .clone()
        .unwrap_or_else(|| config.export.database_path.clone());
    let store = DocumentStore::new(&config.store.document_path);
    let activity = ActivityLog::open(&config.logging);

    let report: ExportReport =
        run_export(&store, &database, &activity).map_err(|e| CliError::Runtime(e.to_string()))?;

    match output_mode(cli) {
        OutputMode::Human => println!(
            "{} exported {} events and {} summary rows to {}",
            "ok".green().bold(),
            report.events_written,
            report.summary_rows,
            database.display()
        ),
        OutputMode::Json => write_json_line(&json!({
            "command": "export",
            "database": database.to_string_lossy(),
            "events_written": report.events_written,
            "summary_rows": report.summary_rows,
        }))?,
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let hash = config
        .stable_hash()
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    let path = cli.config.clone().unwrap_or_else(Config::default_path);

    match output_mode(cli) {
        OutputMode::Human => {
            if args.show {
                let toml_str = toml::to_string_pretty(&config)
                    .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                println!("{toml_str}");
            }
            println!("Source: {}", path.display());
            if !path.exists() {
                println!("  (file does not exist; defaults will be used)");
            }
            println!("Hash:   {hash}");
        }
        OutputMode::Json => {
            let mut payload = json!({
                "command": "config",
                "path": path.to_string_lossy(),
                "exists": path.exists(),
                "hash": hash,
            });
            if args.show {
                payload["config"] = serde_json::to_value(&config)?;
            }
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── output helpers ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("NDH_TELEMETRY_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
