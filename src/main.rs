//! Binary entry point for feedgate.
//!
//! Runs an in-memory pipeline against a [`MemorySink`] so feeds can be
//! replayed from files and the dedup and retry behavior observed.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use feedgate::observability::{self, ObservabilityConfig};
use feedgate::{FeedgateConfig, JobOptions, MemorySink, Pipeline, Priority, Submission};
use serde_json::{Value, json};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Feedgate - a resilient ingestion pipeline for incident feeds.
#[derive(Parser)]
#[command(name = "feedgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "FEEDGATE_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Submit a batch of records read from a file.
    Ingest {
        /// NDJSON or JSON array file; `-` reads stdin.
        file: PathBuf,

        /// Source label for the batch.
        #[arg(short, long, default_value = "cli")]
        source: String,

        /// Job priority: high, normal or low.
        #[arg(short, long, default_value = "normal")]
        priority: String,

        /// Submit the same batch this many times.
        #[arg(short, long, default_value = "1")]
        repeat: u32,

        /// Seconds to wait for the queue to drain.
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Print Prometheus metrics after the run.
        #[arg(long)]
        metrics: bool,
    },

    /// Enqueue one job by type and run it.
    Enqueue {
        /// Job type: bulk-upsert, status-batch, cache-cleanup or data-sync.
        job_type: String,

        /// JSON payload.
        payload: String,

        /// Job priority: high, normal or low.
        #[arg(short, long, default_value = "normal")]
        priority: String,

        /// Seconds to wait for the queue to drain.
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show the effective configuration.
    Config {
        /// List the default config file locations instead.
        #[arg(long)]
        paths: bool,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match FeedgateConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let mut metrics = config.metrics.clone();
    if let Commands::Ingest { metrics: true, .. } = cli.command {
        metrics.enabled = true;
    }
    let observability = match observability::init(ObservabilityConfig {
        logging: config.logging.clone().with_verbose(cli.verbose),
        metrics,
        metrics_expose: false,
    }) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    let result = match cli.command {
        Commands::Ingest {
            file,
            source,
            priority,
            repeat,
            timeout,
            metrics,
        } => {
            cmd_ingest(config, &file, &source, &priority, repeat, timeout)
                .await
                .map(|()| {
                    if metrics && let Some(handle) = observability.metrics() {
                        println!("{}", handle.render());
                    }
                })
        },
        Commands::Enqueue {
            job_type,
            payload,
            priority,
            timeout,
        } => cmd_enqueue(config, &job_type, &payload, &priority, timeout).await,
        Commands::Config { paths } => cmd_config(&config, paths),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Submits a file's records, waiting for each batch to settle.
async fn cmd_ingest(
    config: FeedgateConfig,
    file: &Path,
    source: &str,
    priority: &str,
    repeat: u32,
    timeout: u64,
) -> anyhow::Result<()> {
    let records = read_records(file)?;
    let options = JobOptions::new().with_priority(priority.parse::<Priority>()?);

    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::new(config, sink.clone())?;
    let handle = pipeline.start();

    let mut submissions = Vec::new();
    for _ in 0..repeat.max(1) {
        let submission = pipeline.submit_batch(source, records.clone(), options)?;
        if let Submission::Enqueued { job_id, .. } = &submission {
            tracing::info!(%job_id, records = records.len(), "Batch enqueued");
        }
        submissions.push(submission);
        wait_for_drain(&pipeline, timeout).await?;
    }

    let report = json!({
        "submissions": submissions,
        "written": sink.written_count(),
        "status": pipeline.status(),
    });
    handle.stop().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Runs a single raw job.
async fn cmd_enqueue(
    config: FeedgateConfig,
    job_type: &str,
    payload: &str,
    priority: &str,
    timeout: u64,
) -> anyhow::Result<()> {
    let payload: Value = serde_json::from_str(payload).context("payload is not valid JSON")?;
    let options = JobOptions::new().with_priority(priority.parse::<Priority>()?);

    let pipeline = Pipeline::new(config, Arc::new(MemorySink::new()))?;
    let mut events = pipeline.subscribe();
    let handle = pipeline.start();

    let job_id = pipeline.enqueue_raw(job_type, payload, options)?;
    wait_for_drain(&pipeline, timeout).await?;
    handle.stop().await;

    while let Ok(event) = events.try_recv() {
        if event.job_id() == Some(job_id) {
            println!("{}", serde_json::to_string(&event)?);
        }
    }
    println!("{}", serde_json::to_string_pretty(&pipeline.queue_stats())?);
    Ok(())
}

/// Prints the effective configuration.
fn cmd_config(config: &FeedgateConfig, paths: bool) -> anyhow::Result<()> {
    if paths {
        for path in FeedgateConfig::default_paths() {
            let marker = if path.exists() { "found" } else { "missing" };
            println!("{} ({marker})", path.display());
        }
        return Ok(());
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Waits for the queue to go idle, or for Ctrl-C.
async fn wait_for_drain(pipeline: &Pipeline, timeout: u64) -> anyhow::Result<()> {
    tokio::select! {
        idle = pipeline.wait_idle(Duration::from_secs(timeout)) => {
            if !idle {
                bail!("queue did not drain within {timeout}s");
            }
            Ok(())
        },
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
    }
}

/// Reads records from an NDJSON file or a JSON array.
fn read_records(file: &Path) -> anyhow::Result<Vec<Value>> {
    let contents = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
    };

    let trimmed = contents.trim_start();
    let records: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).context("input is not a JSON array")?
    } else {
        trimmed
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| format!("line {}", i + 1))
            })
            .collect::<anyhow::Result<_>>()?
    };

    if records.is_empty() {
        bail!("{} contains no records", file.display());
    }
    Ok(records)
}
