//! Run a recovery scenario.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;

use rejoin_harness::{Orchestrator, ScenarioConfig, ScenarioReport};

/// Command-line values that override the scenario file.
#[derive(Debug, Default)]
pub struct Overrides {
    /// Worker command line.
    pub command: Option<String>,
    /// Number of workers.
    pub workers: Option<usize>,
}

/// Run the scenario. Returns whether it passed.
pub async fn run(config_path: Option<&Path>, overrides: Overrides, json: bool) -> Result<bool> {
    let config = load_config(config_path, overrides)?;
    let report = Orchestrator::new(config).run().await;

    if json {
        let rendered =
            serde_json::to_string_pretty(&report_json(&report)).context("Failed to render report")?;
        println!("{}", rendered);
    } else {
        print_report(&report);
    }

    Ok(report.passed())
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<ScenarioConfig> {
    let mut config = match path {
        Some(path) => ScenarioConfig::from_file(path)?,
        None => ScenarioConfig::default(),
    };
    if let Some(command) = overrides.command {
        config.worker.command = command;
    }
    if let Some(workers) = overrides.workers {
        config.cluster.workers = workers;
    }
    Ok(config)
}

fn print_report(report: &ScenarioReport) {
    let verdict = if report.passed() { "COMPLETE" } else { "FAILED" };
    println!("=== rejoin run ===");
    println!();
    println!("Scenario: {} ({:.2}s)", verdict, report.elapsed.as_secs_f64());
    for transition in &report.transitions {
        println!("  {}", transition);
    }
    println!();
    println!("Delivered:   {} records", report.delivered);
    println!("Sink frames: {}", report.sink_frames);
    if let Some(expected) = &report.expected {
        println!("Expected:    {}", expected);
    }

    if let Err(failure) = &report.verdict {
        println!();
        println!("Failure: {}", failure);
        eprintln!("{}", failure.diagnostics);
    }
}

fn report_json(report: &ScenarioReport) -> serde_json::Value {
    let error = report.verdict.as_ref().err().map(|failure| {
        json!({
            "kind": failure.error.kind(),
            "message": failure.error.to_string(),
            "outputs": failure.diagnostics.outputs.iter().map(|o| json!({
                "name": o.name,
                "stdout": o.stdout,
                "stderr": o.stderr,
            })).collect::<Vec<_>>(),
            "sink_bytes": failure.diagnostics.sink_data.len(),
        })
    });

    json!({
        "passed": report.passed(),
        "state": report.final_state.phase().to_string(),
        "transitions": report.transitions.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
        "expected": report.expected,
        "delivered": report.delivered,
        "sink_frames": report.sink_frames,
        "resilience_dir": report.resilience_dir.as_ref().map(|p| p.display().to_string()),
        "elapsed_ms": report.elapsed.as_millis() as u64,
        "error": error,
    })
}
