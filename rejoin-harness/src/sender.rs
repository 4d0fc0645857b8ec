//! Paced delivery of the sequence workload.
//!
//! The [`Sender`] writes up to `batch_size` framed records every `interval`
//! to the target endpoint. Delivery is fire-and-forget: a record counts as
//! delivered once its bytes were written to the socket. After a connection
//! loss the batch whose write failed is retried on the next connection;
//! records already written are never re-sent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rejoin_core::SequenceGenerator;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::ConfigError;
use crate::error::HarnessError;
use crate::task::{BackgroundTask, TaskOutcome};

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// `host:port` to deliver to.
    pub target: String,
    /// Records written per interval.
    pub batch_size: usize,
    /// Interval between batches.
    pub interval: Duration,
    /// Re-establish the connection after a loss instead of failing.
    pub reconnect: bool,
}

/// Paced delivery client driven by a [`SequenceGenerator`].
#[derive(Debug)]
pub struct Sender {
    config: SenderConfig,
    generator: Option<SequenceGenerator>,
    delivered: Arc<AtomicU64>,
    stop_tx: watch::Sender<bool>,
    task: Option<BackgroundTask>,
}

impl Sender {
    /// Create a sender that will deliver every record of `generator`.
    pub fn new(config: SenderConfig, generator: SequenceGenerator) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            generator: Some(generator),
            delivered: Arc::new(AtomicU64::new(0)),
            stop_tx,
            task: None,
        }
    }

    /// Launch the delivery loop in the background. Idempotent.
    ///
    /// A zero interval is rejected: the loop is not started and `join`
    /// reports a `Config` error.
    pub fn start(&mut self) {
        let Some(generator) = self.generator.take() else {
            return;
        };
        let name = format!("sender -> {}", self.config.target);
        if self.config.interval.is_zero() {
            self.task = Some(BackgroundTask::failed(
                name,
                ConfigError::Invalid("sender interval must be non-zero".into()).into(),
            ));
            return;
        }
        tracing::info!(
            "Sender delivering {} records to {} ({} per {:?})",
            generator.remaining(),
            self.config.target,
            self.config.batch_size,
            self.config.interval
        );
        let fut = deliver(
            self.config.clone(),
            generator,
            self.delivered.clone(),
            self.stop_tx.subscribe(),
        );
        self.task = Some(BackgroundTask::spawn(name, fut));
    }

    /// Wait up to `deadline` for the sequence to be exhausted.
    ///
    /// If the deadline elapses first the loop is stopped and a
    /// `DeliveryTimeout` is recorded.
    pub async fn join(&mut self, deadline: Duration) -> TaskOutcome {
        let task = self.task.get_or_insert_with(|| {
            BackgroundTask::failed("sender", HarnessError::NotStarted("sender"))
        });
        if task.join(deadline).await == TaskOutcome::Pending {
            self.stop_tx.send_replace(true);
            task.expire(HarnessError::DeliveryTimeout {
                timeout: deadline,
                delivered: self.delivered.load(Ordering::SeqCst),
            });
        }
        task.outcome()
    }

    /// True once the delivery loop has returned (without waiting).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_some_and(BackgroundTask::is_finished)
    }

    /// Signal the delivery loop to stop. Idempotent; unblocks a pending
    /// connect or write.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Records written so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Recorded error, if any.
    pub fn error(&self) -> Option<&HarnessError> {
        self.task.as_ref().and_then(BackgroundTask::error)
    }

    /// Move the recorded error out.
    pub fn take_error(&mut self) -> Option<HarnessError> {
        self.task.as_mut().and_then(BackgroundTask::take_error)
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Outcome of one attempt to put a batch on the wire.
enum Attempt {
    Written,
    Retry,
    Stopped,
}

async fn deliver(
    config: SenderConfig,
    mut generator: SequenceGenerator,
    delivered: Arc<AtomicU64>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<(), HarnessError> {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut stream: Option<TcpStream> = None;
    let mut batch: Vec<u8> = Vec::new();
    let mut batch_len = 0u64;

    loop {
        tokio::select! {
            _ = stop_rx.wait_for(|stopped| *stopped) => {
                return Err(stopped(&config, &generator, batch_len, &delivered));
            }
            _ = ticker.tick() => {}
        }

        if batch.is_empty() {
            for record in generator.by_ref().take(config.batch_size) {
                batch.extend_from_slice(&record.to_frame());
                batch_len += 1;
            }
            if batch.is_empty() {
                break;
            }
        }

        match write_batch(&config, &mut stream, &batch, &mut stop_rx).await? {
            Attempt::Written => {
                delivered.fetch_add(batch_len, Ordering::SeqCst);
                batch.clear();
                batch_len = 0;
                if generator.is_exhausted() {
                    break;
                }
            }
            Attempt::Retry => continue,
            Attempt::Stopped => {
                return Err(stopped(&config, &generator, batch_len, &delivered));
            }
        }
    }

    if let Some(mut s) = stream {
        let _ = s.shutdown().await;
    }
    tracing::info!(
        "Sender to {} finished: {} records delivered",
        config.target,
        delivered.load(Ordering::SeqCst)
    );
    Ok(())
}

async fn write_batch(
    config: &SenderConfig,
    stream: &mut Option<TcpStream>,
    batch: &[u8],
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<Attempt, HarnessError> {
    if stream.is_none() {
        let connected = tokio::select! {
            _ = stop_rx.wait_for(|stopped| *stopped) => return Ok(Attempt::Stopped),
            result = TcpStream::connect(&config.target) => result,
        };
        match connected {
            Ok(s) => {
                tracing::debug!("Sender connected to {}", config.target);
                *stream = Some(s);
            }
            Err(e) => return lost(config, e),
        }
    }

    let Some(s) = stream.as_mut() else {
        return Ok(Attempt::Retry);
    };
    let written = tokio::select! {
        _ = stop_rx.wait_for(|stopped| *stopped) => return Ok(Attempt::Stopped),
        result = s.write_all(batch) => result,
    };
    match written {
        Ok(()) => Ok(Attempt::Written),
        Err(e) => {
            *stream = None;
            lost(config, e)
        }
    }
}

/// Error for a loop stopped with records left (pending batch included).
fn stopped(
    config: &SenderConfig,
    generator: &SequenceGenerator,
    pending: u64,
    delivered: &AtomicU64,
) -> HarnessError {
    let delivered = delivered.load(Ordering::SeqCst);
    let remaining = generator.remaining() + pending;
    tracing::debug!(
        "Sender to {} stopped after {} records, {} left",
        config.target,
        delivered,
        remaining
    );
    HarnessError::DeliveryStopped {
        delivered,
        remaining,
    }
}

fn lost(config: &SenderConfig, e: std::io::Error) -> Result<Attempt, HarnessError> {
    if config.reconnect {
        tracing::warn!("Connection to {} lost ({}), reconnecting", config.target, e);
        Ok(Attempt::Retry)
    } else {
        Err(HarnessError::ConnectionLost {
            target: config.target.clone(),
            reason: e.to_string(),
        })
    }
}
