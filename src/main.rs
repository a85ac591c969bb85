//! CLI entry point for the bus line conditioner.
//!
//! Provides subcommands for running the conditioning pipeline over a corpus
//! of GPS dumps, preparing raw inputs, recomputing the hourly table, and
//! training and evaluating the baseline speed models.

use anyhow::{Context, Result};
use busline_conditioner::analyzers::aggregate::aggregate_hourly;
use busline_conditioner::analyzers::evaluate::evaluate_dir;
use busline_conditioner::analyzers::types::HourlyAggregate;
use busline_conditioner::archive::extract_archives;
use busline_conditioner::config::PipelineConfig;
use busline_conditioner::models::{ModelStore, train_speed_models};
use busline_conditioner::output::{read_json_array, read_records, write_records};
use busline_conditioner::ping::EnrichedPing;
use busline_conditioner::pipeline::{repair_sorted_files, run_corpus};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "busline_conditioner")]
#[command(about = "Conditions raw bus GPS dumps for per-line speed models", long_about = None)]
struct Cli {
    /// JSON pipeline config (falls back to PIPELINE_CONFIG, then defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run decode, filter, sequence, enrich, cluster and aggregate over a corpus
    Run {
        /// Directory holding the raw dumps (searched recursively)
        #[arg(value_name = "INPUT_DIR")]
        input: PathBuf,

        /// Directory to write line sequences, cleaned routes and the hourly table to
        #[arg(short, long, default_value = "conditioned")]
        output: PathBuf,

        /// Override the configured number of concurrent workers
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
    },
    /// Extract every zip archive in a directory
    Extract {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Rewrite legacy *_sorted.json files as single well-formed arrays
    Repair {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Recompute the hourly table from cleaned route files
    Aggregate {
        /// Directory of *_cleaned.json files
        #[arg(value_name = "CLEANED_DIR")]
        cleaned_dir: PathBuf,

        /// CSV file to write
        #[arg(short, long, default_value = "hourly_means.csv")]
        output: PathBuf,
    },
    /// Fit one baseline speed model per line from the hourly table
    Train {
        /// Hourly table produced by `run` or `aggregate`
        #[arg(value_name = "HOURLY_CSV")]
        aggregates: PathBuf,

        #[arg(short, long, default_value = "models")]
        models_dir: PathBuf,
    },
    /// Score saved models against cleaned test routes
    Evaluate {
        /// Directory of *_cleaned.json test files
        #[arg(value_name = "TEST_DIR")]
        test_dir: PathBuf,

        #[arg(short, long, default_value = "models")]
        models_dir: PathBuf,

        /// CSV file to write the per-line summary to
        #[arg(short, long, default_value = "evaluation.csv")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/busline_conditioner.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("busline_conditioner.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            output,
            concurrency,
        } => {
            let mut config = PipelineConfig::resolve(cli.config.as_deref())?;
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            let summary = run_corpus(&input, &output, Arc::new(config)).await?;
            info!(summary = %serde_json::to_string(&summary)?, "Run summary");
        }
        Commands::Extract { dir } => {
            let extracted = extract_archives(&dir)?;
            info!(extracted, "Extraction finished");
        }
        Commands::Repair { dir } => {
            let (repaired, failed) = repair_sorted_files(&dir)?;
            info!(repaired, failed, "Repair finished");
        }
        Commands::Aggregate {
            cleaned_dir,
            output,
        } => {
            let rows = aggregate_cleaned(&cleaned_dir)?;
            write_records(&output, &rows)?;
            info!(rows = rows.len(), output = %output.display(), "Hourly table written");
        }
        Commands::Train {
            aggregates,
            models_dir,
        } => {
            let rows: Vec<HourlyAggregate> = read_records(&aggregates)
                .with_context(|| format!("reading {}", aggregates.display()))?;
            let store = ModelStore::new(models_dir);
            let saved = train_speed_models(&rows, &store)?;
            info!(saved, dir = %store.dir().display(), "Training finished");
        }
        Commands::Evaluate {
            test_dir,
            models_dir,
            output,
        } => {
            let store = ModelStore::new(models_dir);
            let summaries = evaluate_dir(&test_dir, &store)?;
            write_records(&output, &summaries)?;
            info!(lines = summaries.len(), output = %output.display(), "Evaluation written");
        }
    }

    Ok(())
}

/// Aggregates every `*_cleaned.json` in `dir` into one hourly table.
#[tracing::instrument(skip_all, fields(dir = %dir.display()))]
fn aggregate_cleaned(dir: &Path) -> Result<Vec<HourlyAggregate>> {
    let mut pings: Vec<EnrichedPing> = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_cleaned = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("_cleaned.json"));
        if !is_cleaned {
            continue;
        }
        match read_json_array::<EnrichedPing>(&path) {
            Ok(batch) => pings.extend(batch),
            Err(e) => warn!(file = %path.display(), error = %e, "Skipping unreadable cleaned file"),
        }
    }

    Ok(aggregate_hourly(&pings))
}
