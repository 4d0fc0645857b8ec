//! # rejoin
//!
//! Run crash/rejoin recovery scenarios against a stream-processing cluster.
//!
//! ## Commands
//!
//! - `run`: Run a scenario and report the verdict (exit code 0 on success)
//! - `expect`: Print the final window a run over `1..=N` must produce
//!
//! ## Example
//!
//! ```bash
//! # Run the standard scenario with a scenario file
//! rejoin run --config scenario.toml
//!
//! # Override the worker command and cluster size
//! rejoin run --command "machida --application-module sequence_window" --workers 3
//!
//! # Machine-readable report
//! rejoin run --config scenario.toml --json
//!
//! # Expected output for a 200-record run
//! rejoin expect --last 200 --width 6
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{expect, run};

/// Crash/rejoin recovery harness.
#[derive(Parser, Debug)]
#[command(name = "rejoin")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a recovery scenario
    Run {
        /// Scenario file (TOML); defaults are used if omitted
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Worker command line, overriding the scenario file
        #[arg(long)]
        command: Option<String>,

        /// Number of workers including the initializer
        #[arg(long, short)]
        workers: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the expected final output for a sequence
    Expect {
        /// Length of the sequence 1..=N
        #[arg(long, default_value = "200")]
        last: u64,

        /// Number of values in the window
        #[arg(long, default_value = "6")]
        width: usize,

        /// Distance between window values
        #[arg(long, default_value = "2")]
        stride: u64,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so `--json` output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            command,
            workers,
            json,
        } => {
            let overrides = run::Overrides { command, workers };
            let passed = run::run(config.as_deref(), overrides, json).await?;
            Ok(if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Expect {
            last,
            width,
            stride,
        } => {
            expect::run(last, width, stride)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
