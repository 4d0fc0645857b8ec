//! # fake-worker
//!
//! Deterministic stand-in for a stream-processing worker, used to exercise
//! the recovery harness end to end.
//!
//! It accepts the same topology flags as a real worker and honours the
//! worker process contract:
//! - the initializer serves the source port, keeps a window of the newest
//!   stride-aligned values, persists it to `<resilience-dir>/<name>.window`
//!   and sends every changed window to `--out` as a frame
//! - joiners register with the initializer's control port and record
//!   `<resilience-dir>/<name>.state`
//! - once the cluster is formed a worker prints
//!   `Application has successfully initialized`
//! - a worker that finds its own state on startup prints
//!   `Restarting a listener ...` (suppressed when
//!   `FAKE_WORKER_SILENT_RECOVERY=1`, to simulate a broken recovery)
//! - SIGTERM exits cleanly

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use rejoin_core::SequenceWindow;
use rejoin_harness::codec::{read_frame, write_frame};
use rejoin_types::{decode_frame, SequenceRecord};

const READY_MARKER: &str = "Application has successfully initialized";
const RECONNECT_MARKER: &str = "Restarting a listener ...";
const SILENT_RECOVERY_ENV: &str = "FAKE_WORKER_SILENT_RECOVERY";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_RETRY: Duration = Duration::from_millis(50);

/// Test double for a cluster worker.
#[derive(Parser, Debug)]
#[command(name = "fake-worker")]
struct Args {
    /// Source endpoints, comma separated (served by the initializer)
    #[arg(long = "in")]
    sources: String,

    /// Sink endpoint for output frames
    #[arg(long)]
    out: String,

    /// Metrics endpoint
    #[arg(long)]
    metrics: String,

    /// Own control endpoint (initializer) or the initializer's (joiner)
    #[arg(long)]
    control: String,

    /// Own data endpoint (initializer)
    #[arg(long)]
    data: Option<String>,

    /// Own control endpoint (joiner)
    #[arg(long)]
    my_control: Option<String>,

    /// Own data endpoint (joiner)
    #[arg(long)]
    my_data: Option<String>,

    /// External endpoint
    #[arg(long)]
    external: Option<String>,

    /// Workers in the cluster, initializer included
    #[arg(long, default_value = "1")]
    worker_count: usize,

    /// Establish the cluster instead of joining it
    #[arg(long)]
    cluster_initializer: bool,

    /// Worker name
    #[arg(long)]
    name: String,

    /// Directory for recovery state
    #[arg(long)]
    resilience_dir: PathBuf,

    /// Values kept in the window
    #[arg(long, default_value = "6")]
    window_width: usize,

    /// Window partition stride
    #[arg(long, default_value = "2")]
    stride: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = run(&args) => result,
        _ = sigterm.recv() => {
            eprintln!("{}: terminating", args.name);
            Ok(())
        }
    }
}

async fn run(args: &Args) -> Result<()> {
    let restarted = state_path(args).exists();
    report_metrics(args).await;

    if args.cluster_initializer {
        run_initializer(args, restarted).await
    } else {
        run_joiner(args, restarted).await
    }
}

fn state_path(args: &Args) -> PathBuf {
    let suffix = if args.cluster_initializer { "window" } else { "state" };
    args.resilience_dir.join(format!("{}.{}", args.name, suffix))
}

fn announce(restarted: bool) {
    if restarted && std::env::var(SILENT_RECOVERY_ENV).as_deref() != Ok("1") {
        println!("{}", RECONNECT_MARKER);
    }
    println!("{}", READY_MARKER);
}

// ============================================================================
// Initializer
// ============================================================================

async fn run_initializer(args: &Args, restarted: bool) -> Result<()> {
    let window_path = state_path(args);
    let window = if restarted {
        let rendered = tokio::fs::read_to_string(&window_path)
            .await
            .context("Failed to read window checkpoint")?;
        SequenceWindow::restore(args.window_width, args.stride, rendered.trim())?
    } else {
        SequenceWindow::new(args.window_width, args.stride)?
    };

    let control = bind(&args.control).await?;
    let _data = bind_optional(args.data.as_deref()).await?;
    let _external = bind_optional(args.external.as_deref()).await?;
    let source_addr = args
        .sources
        .split(',')
        .next()
        .context("No source endpoint given")?;
    let source = bind(source_addr).await?;
    let out = connect_with_retry(&args.out).await?;

    // Cluster forms once every joiner registered
    let joiners = args.worker_count.saturating_sub(1);
    let mut joined = HashSet::new();
    while joined.len() < joiners {
        let (stream, _) = control.accept().await?;
        if let Some(name) = read_join(stream).await {
            joined.insert(name);
        }
    }
    tokio::spawn(accept_rejoins(control));

    let (tx, rx) = mpsc::channel(1024);
    tokio::spawn(accept_sources(source, tx));
    announce(restarted);

    process(window, &window_path, out, rx).await
}

/// Keep registering joiners after the cluster formed (replacements).
async fn accept_rejoins(control: TcpListener) {
    loop {
        match control.accept().await {
            Ok((stream, _)) => {
                if let Some(name) = read_join(stream).await {
                    tracing::info!("{} rejoined", name);
                }
            }
            Err(e) => {
                tracing::warn!("Control accept failed: {}", e);
                return;
            }
        }
    }
}

/// Read a `join <name>` line, then keep the connection open in the background.
async fn read_join(stream: TcpStream) -> Option<String> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let name = line.trim().strip_prefix("join ")?.to_string();

    tokio::spawn(async move {
        let mut rest = Vec::new();
        let _ = reader.read_to_end(&mut rest).await;
    });
    Some(name)
}

async fn accept_sources(source: TcpListener, tx: mpsc::Sender<u64>) {
    loop {
        let (mut stream, _) = match source.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Source accept failed: {}", e);
                return;
            }
        };
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Ok(Some(framed)) = read_frame(&mut stream).await {
                let record = decode_frame(&framed)
                    .and_then(|(payload, _)| SequenceRecord::from_payload(payload));
                match record {
                    Ok(record) => {
                        if tx.send(record.value()).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!("Dropping bad record: {}", e),
                }
            }
        });
    }
}

async fn process(
    mut window: SequenceWindow,
    window_path: &Path,
    mut out: TcpStream,
    mut rx: mpsc::Receiver<u64>,
) -> Result<()> {
    while let Some(value) = rx.recv().await {
        if !window.observe(value) {
            continue;
        }
        let rendered = window.render();
        tokio::fs::write(window_path, &rendered)
            .await
            .context("Failed to persist window")?;
        write_frame(&mut out, rendered.as_bytes())
            .await
            .context("Failed to write output frame")?;
    }
    Ok(())
}

// ============================================================================
// Joiner
// ============================================================================

async fn run_joiner(args: &Args, restarted: bool) -> Result<()> {
    let _control = bind_optional(args.my_control.as_deref()).await?;
    let _data = bind_optional(args.my_data.as_deref()).await?;
    let _external = bind_optional(args.external.as_deref()).await?;

    let mut control = connect_with_retry(&args.control).await?;
    control
        .write_all(format!("join {}\n", args.name).as_bytes())
        .await
        .context("Failed to register with initializer")?;
    tokio::fs::write(state_path(args), "joined\n")
        .await
        .context("Failed to write state file")?;
    announce(restarted);

    // Stay up until the initializer goes away (or SIGTERM)
    let mut rest = Vec::new();
    let _ = control.read_to_end(&mut rest).await;
    Ok(())
}

// ============================================================================
// Networking helpers
// ============================================================================

async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))
}

async fn bind_optional(addr: Option<&str>) -> Result<Option<TcpListener>> {
    match addr {
        Some(addr) => Ok(Some(bind(addr).await?)),
        None => Ok(None),
    }
}

async fn connect_with_retry(addr: &str) -> Result<TcpStream> {
    let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if tokio::time::Instant::now() >= deadline => {
                return Err(e).with_context(|| format!("Failed to connect to {}", addr));
            }
            Err(_) => tokio::time::sleep(CONNECT_RETRY).await,
        }
    }
}

/// Best effort: announce this worker on the metrics channel.
async fn report_metrics(args: &Args) {
    match TcpStream::connect(&args.metrics).await {
        Ok(mut stream) => {
            let line = format!("{} up\n", args.name);
            if let Err(e) = stream.write_all(line.as_bytes()).await {
                tracing::warn!("Metrics write failed: {}", e);
            }
        }
        Err(e) => tracing::warn!("Metrics connect failed: {}", e),
    }
}
