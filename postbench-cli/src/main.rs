//! CLI for the postbench query latency harness.
//!
//! Runs one label-matcher query repeatedly against a block's index and prints
//! how many series matched and how long the queries took.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, ValueEnum};
use postbench::config::BenchConfig;
use postbench::error::ConfigError;
use postbench::{BenchmarkResult, MatchType};
use tracing_subscriber::EnvFilter;

/// postbench: measure label-matcher query latency against a block index.
#[derive(Parser)]
#[command(name = "postbench", version, about)]
struct Cli {
    /// Path to the block directory.
    #[arg(long, default_value = "")]
    dir: String,

    /// JSON file with the query configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Label name to match (default "pod").
    #[arg(long)]
    field: Option<String>,

    /// Value or regular expression to match (default "^abc.*$").
    #[arg(long)]
    pattern: Option<String>,

    /// Matcher kind: =, !=, =~ or !~ (default =~).
    #[arg(long)]
    matcher: Option<MatchType>,

    /// Number of times the query is executed (default 84).
    #[arg(long)]
    repetitions: Option<u32>,

    /// Report format.
    #[arg(long, default_value = "text")]
    format: OutputFormat,
}

/// Output format for the report.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable summary.
    Text,
    /// JSON object.
    Json,
}

impl Cli {
    /// Builds the configuration: defaults, then the config file, then flags.
    fn bench_config(&self) -> Result<BenchConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::load(path)?,
            None => BenchConfig::default(),
        };
        if let Some(field) = &self.field {
            config.field.clone_from(field);
        }
        if let Some(pattern) = &self.pattern {
            config.pattern.clone_from(pattern);
        }
        if let Some(kind) = self.matcher {
            config.matcher_kind = kind;
        }
        if let Some(repetitions) = self.repetitions {
            config.repetitions = repetitions;
        }
        Ok(config)
    }
}

fn main() {
    init_tracing();

    let cli = Cli::parse();

    if cli.dir.is_empty() {
        eprintln!("{}", Cli::command().render_help());
        std::process::exit(1);
    }

    let result = cli
        .bench_config()
        .map_err(postbench::Error::from)
        .and_then(|config| postbench::bench::run(&cli.dir, &config));

    match result {
        Ok(result) => {
            if let Err(e) = print_report(&result, &cli.format) {
                tracing::error!(stage = "report", error = %e, "failed to write report");
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!(stage = e.stage(), error = %e, "benchmark failed");
            std::process::exit(1);
        }
    }
}

/// Logs to stderr so stdout carries only the report.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

/// Prints the result to stdout.
fn print_report(result: &BenchmarkResult, format: &OutputFormat) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Text => {
            println!("Results:");
            println!("  Matched series: {}", result.matched_series);
            println!("  Repetitions: {}", result.repetitions);
            println!("  Elapsed: {:.3?}", result.elapsed);
            println!(
                "  Mean latency: {} ns/query",
                result.mean_query_latency().as_nanos()
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
    }
    Ok(())
}
