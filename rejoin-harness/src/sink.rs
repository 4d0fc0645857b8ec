//! Passive listeners that accumulate everything the cluster sends.
//!
//! A [`Sink`] collects cluster output in framed mode: each complete frame is
//! appended to the shared buffer in one step, so frames arriving on different
//! connections never interleave byte-wise. A [`MetricsReceiver`] collects
//! metrics traffic in raw mode, appending chunks as they are read.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::capture::SharedBuffer;
use crate::codec::{read_frame, CodecError};
use crate::error::HarnessError;

/// Pause after a failed `accept()` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How received bytes are appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Whole length-prefixed frames, appended atomically and counted.
    Framed,
    /// Raw chunks as they come off the socket.
    Raw,
}

/// Accumulating TCP listener.
#[derive(Debug)]
pub struct Sink {
    name: &'static str,
    host: String,
    mode: SinkMode,
    buffer: SharedBuffer,
    frames: Arc<AtomicU64>,
    addr: Option<SocketAddr>,
    stop_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl Sink {
    /// Framed-mode sink listening on `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_mode("sink", host, SinkMode::Framed)
    }

    /// Sink with an explicit name (used in logs) and mode.
    pub fn with_mode(name: &'static str, host: impl Into<String>, mode: SinkMode) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            name,
            host: host.into(),
            mode,
            buffer: SharedBuffer::new(),
            frames: Arc::new(AtomicU64::new(0)),
            addr: None,
            stop_tx,
            accept_task: None,
        }
    }

    /// Bind an ephemeral port and begin accepting in the background.
    ///
    /// Returns the bound address. Calling `start` on a running sink returns
    /// the existing address.
    pub async fn start(&mut self) -> Result<SocketAddr, HarnessError> {
        if let Some(addr) = self.addr {
            return Ok(addr);
        }

        let listener = TcpListener::bind((self.host.as_str(), 0)).await?;
        let addr = listener.local_addr()?;
        tracing::info!("{} listening on {}", self.name, addr);

        self.accept_task = Some(tokio::spawn(accept_loop(
            self.name,
            listener,
            self.mode,
            self.buffer.clone(),
            self.frames.clone(),
            self.stop_tx.subscribe(),
        )));
        self.addr = Some(addr);
        Ok(addr)
    }

    /// Address the sink is listening on. Only valid after [`start`](Self::start).
    pub fn connection_info(&self) -> Result<SocketAddr, HarnessError> {
        self.addr.ok_or(HarnessError::NotStarted(self.name))
    }

    /// Close the listener and every accepted connection. Idempotent.
    ///
    /// Returns once the accept loop and all connection readers have exited.
    /// Collected data stays readable.
    pub async fn stop(&mut self) {
        self.stop_tx.send_replace(true);
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                tracing::warn!("{} accept loop ended abnormally: {}", self.name, e);
            }
            tracing::debug!("{} stopped ({} bytes collected)", self.name, self.buffer.len());
        }
    }

    /// Snapshot of all bytes received so far, in arrival order.
    pub fn data(&self) -> Vec<u8> {
        self.buffer.snapshot()
    }

    /// True if `bytes` occurs contiguously in the received data.
    pub fn contains(&self, bytes: &[u8]) -> bool {
        self.buffer.contains(bytes)
    }

    /// Complete frames received (framed mode only).
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Shared handle to the receive buffer, for watchers.
    pub fn buffer(&self) -> SharedBuffer {
        self.buffer.clone()
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

/// Raw-mode listener for the cluster's metrics stream.
#[derive(Debug)]
pub struct MetricsReceiver {
    inner: Sink,
}

impl MetricsReceiver {
    /// Raw-mode receiver listening on `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            inner: Sink::with_mode("metrics receiver", host, SinkMode::Raw),
        }
    }

    /// Bind an ephemeral port and begin accepting in the background.
    pub async fn start(&mut self) -> Result<SocketAddr, HarnessError> {
        self.inner.start().await
    }

    /// Address the receiver is listening on. Only valid after `start`.
    pub fn connection_info(&self) -> Result<SocketAddr, HarnessError> {
        self.inner.connection_info()
    }

    /// Close the listener and every accepted connection. Idempotent.
    pub async fn stop(&mut self) {
        self.inner.stop().await
    }

    /// Snapshot of all bytes received so far.
    pub fn data(&self) -> Vec<u8> {
        self.inner.data()
    }

    /// True if `bytes` occurs contiguously in the received data.
    pub fn contains(&self, bytes: &[u8]) -> bool {
        self.inner.contains(bytes)
    }
}

async fn accept_loop(
    name: &'static str,
    listener: TcpListener,
    mode: SinkMode,
    buffer: SharedBuffer,
    frames: Arc<AtomicU64>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    let conn_stop = stop_rx.clone();

    loop {
        tokio::select! {
            _ = async { stop_rx.wait_for(|stopped| *stopped).await.map(|_| ()) } => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("{} accepted connection from {}", name, peer);
                    connections.spawn(read_connection(
                        name,
                        stream,
                        mode,
                        buffer.clone(),
                        frames.clone(),
                        conn_stop.clone(),
                    ));
                }
                Err(e) => {
                    // Persistent failures (fd exhaustion) would otherwise spin
                    tracing::warn!("{} accept failed: {}", name, e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            // Reap finished readers so the set does not grow unbounded
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn read_connection(
    name: &'static str,
    mut stream: TcpStream,
    mode: SinkMode,
    buffer: SharedBuffer,
    frames: Arc<AtomicU64>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut chunk = vec![0u8; 8192];
    loop {
        match mode {
            SinkMode::Framed => {
                let next = tokio::select! {
                    _ = stop_rx.wait_for(|stopped| *stopped) => return,
                    next = read_frame(&mut stream) => next,
                };
                match next {
                    Ok(Some(framed)) => {
                        buffer.append(&framed);
                        frames.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(None) => break,
                    Err(CodecError::Truncated) => {
                        tracing::warn!("{}: peer closed mid-frame", name);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("{}: dropping connection: {}", name, e);
                        break;
                    }
                }
            }
            SinkMode::Raw => {
                let read = tokio::select! {
                    _ = stop_rx.wait_for(|stopped| *stopped) => return,
                    read = stream.read(&mut chunk) => read,
                };
                match read {
                    Ok(0) => break,
                    Ok(n) => buffer.append(&chunk[..n]),
                    Err(e) => {
                        tracing::warn!("{}: read failed: {}", name, e);
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("{}: connection closed", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn wait_until(mut f: impl FnMut() -> bool) {
        for _ in 0..100 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn connection_info_requires_start() {
        let mut sink = Sink::new("127.0.0.1");
        assert!(matches!(
            sink.connection_info(),
            Err(HarnessError::NotStarted("sink"))
        ));

        let addr = sink.start().await.unwrap();
        assert_eq!(sink.connection_info().unwrap(), addr);
        assert_ne!(addr.port(), 0);
        sink.stop().await;
    }

    #[tokio::test]
    async fn framed_sink_collects_frames_from_many_connections() {
        let mut sink = Sink::new("127.0.0.1");
        let addr = sink.start().await.unwrap();

        let mut a = TcpStream::connect(addr).await.unwrap();
        a.write_all(&rejoin_types::frame(b"[2]").unwrap()).await.unwrap();
        a.shutdown().await.unwrap();
        wait_until(|| sink.frame_count() == 1).await;

        let mut b = TcpStream::connect(addr).await.unwrap();
        // Split one frame across two writes
        b.write_all(&[0, 0, 0, 5, b'[']).await.unwrap();
        b.write_all(b"4,2]").await.unwrap();
        wait_until(|| sink.frame_count() == 2).await;

        let mut expected = rejoin_types::frame(b"[2]").unwrap();
        expected.extend(rejoin_types::frame(b"[4,2]").unwrap());
        assert_eq!(sink.data(), expected);
        assert!(sink.contains(&rejoin_types::frame(b"[4,2]").unwrap()));

        sink.stop().await;
    }

    #[tokio::test]
    async fn stop_unblocks_parked_readers_and_is_idempotent() {
        let mut sink = Sink::new("127.0.0.1");
        let addr = sink.start().await.unwrap();

        // Connected but silent: its reader is parked in a read
        let _idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(2), sink.stop())
            .await
            .expect("stop must not hang");
        sink.stop().await;

        // Listener is gone
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn stop_before_start_is_harmless() {
        let mut sink = Sink::new("127.0.0.1");
        sink.stop().await;
        assert!(sink.data().is_empty());
    }

    #[tokio::test]
    async fn metrics_receiver_keeps_raw_bytes() {
        let mut metrics = MetricsReceiver::new("127.0.0.1");
        assert!(metrics.connection_info().is_err());
        let addr = metrics.start().await.unwrap();

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"not a frame").await.unwrap();
        conn.shutdown().await.unwrap();

        wait_until(|| metrics.contains(b"not a frame")).await;
        assert_eq!(metrics.data(), b"not a frame");
        metrics.stop().await;
        metrics.stop().await;
    }
}
