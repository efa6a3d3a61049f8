mod analyze;
mod batch;
mod bridge;
mod config;
mod engine;
mod extract;
#[cfg(test)]
mod fixture;
mod measure;
mod modes;
mod queries;
mod record;
mod report;
mod scalar;
mod trace_file;

use clap::{Parser, Subcommand};
use config::{BenchConfig, FailurePolicy};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Measure the CPU and trace-size overhead of graphics instrumentation
/// layers: sweep a device over adb, then turn the pulled Perfetto traces
/// into a CSV report.
#[derive(Parser, Debug)]
#[command(name = "overhead-bench", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "bench.toml", global = true)]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract metrics from collected traces and write the CSV report
    Analyze {
        /// Trace directory (overrides config)
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// File glob inside the trace directory (overrides config)
        #[arg(long)]
        pattern: Option<String>,

        /// CSV output path (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum concurrent extractions (overrides config)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Stop at the first failing trace
        #[arg(long)]
        fail_fast: bool,

        /// Keep group order instead of sorting rows
        #[arg(long)]
        no_sort: bool,
    },
    /// Run the benchmark sweep on the connected device
    Measure {
        /// Device serial (overrides config)
        #[arg(short, long)]
        serial: Option<String>,

        /// Trace directory (overrides config)
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Number of attempts per configuration (overrides config)
        #[arg(long)]
        attempts: Option<u32>,

        /// List planned runs without touching the device
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);
    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match BenchConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Analyze {
            results_dir,
            pattern,
            output,
            workers,
            fail_fast,
            no_sort,
        } => {
            if let Some(dir) = results_dir {
                config.analysis.results_dir = dir;
            }
            if let Some(pattern) = pattern {
                config.analysis.pattern = pattern;
            }
            if let Some(output) = output {
                config.report.output = output;
            }
            if let Some(workers) = workers {
                config.analysis.max_workers = workers;
            }
            if fail_fast {
                config.analysis.failure_policy = FailurePolicy::FailFast;
            }
            if no_sort {
                config.report.sort_rows = false;
            }
            run_analyze(config).await
        }
        Command::Measure {
            serial,
            results_dir,
            attempts,
            dry_run,
        } => {
            if serial.is_some() {
                config.device.serial = serial;
            }
            if let Some(dir) = results_dir {
                config.analysis.results_dir = dir;
            }
            if let Some(attempts) = attempts {
                config.sweep.attempts = attempts;
            }
            if dry_run {
                print_plan(&config);
                Ok(())
            } else {
                run_measure(config).await
            }
        }
    };

    if let Err(message) = result {
        tracing::error!("{message}");
        std::process::exit(1);
    }
}

async fn run_analyze(config: BenchConfig) -> Result<(), String> {
    let summary = analyze::run(&config).await.map_err(|e| e.to_string())?;
    println!(
        "{} traces, {} records, {} skipped, {} groups: wrote {} rows to {}",
        summary.discovered,
        summary.records,
        summary.skipped,
        summary.groups,
        summary.rows,
        summary.output.display()
    );
    Ok(())
}

async fn run_measure(config: BenchConfig) -> Result<(), String> {
    let joined = tokio::task::spawn_blocking(move || {
        let mut adb = bridge::Adb::new(&config.device);
        measure::run_sweep(&mut adb, &config)
    })
    .await
    .map_err(|e| format!("measure task failed: {e}"))?;

    let summary = joined.map_err(|e| e.to_string())?;
    println!(
        "{} planned, {} completed, {} already present",
        summary.planned, summary.completed, summary.skipped
    );
    Ok(())
}

fn print_plan(config: &BenchConfig) {
    let plans = measure::plan_runs(config);
    for plan in &plans {
        let state = if plan.output.exists() { "exists" } else { "pending" };
        println!("{state:8} {}", plan.output.display());
    }
    println!("{} runs planned", plans.len());
}
