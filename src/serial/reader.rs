//! Background reader: drains a device input stream on a dedicated thread and
//! publishes each chunk into the [`EventSink`].
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::sink::{Delivery, EventSink};
use super::{Result, SerialError};
use crate::config::BridgeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderState {
    NotStarted = 0,
    Running = 1,
    Stopping = 2,
    Terminated = 3,
}

impl ReaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReaderState::NotStarted,
            1 => ReaderState::Running,
            2 => ReaderState::Stopping,
            _ => ReaderState::Terminated,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderMetrics {
    pub bytes_read: u64,
    pub chunks_delivered: u64,
    /// Chunks read while nobody was subscribed or the subscriber lagged
    pub chunks_dropped: u64,
    pub last_error: Option<String>,
}

/// Settings the reader thread needs, copied out of [`BridgeConfig`].
#[derive(Debug, Clone, Copy)]
struct ReadParams {
    chunk_size: usize,
    idle_backoff: Duration,
    max_idle_reads: u32,
}

// `SerialConnection::open` rejects zero values through `BridgeConfig::validate`.
// The clamps only matter when a loop is spawned directly.
impl From<&BridgeConfig> for ReadParams {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            chunk_size: config.read_chunk_size.max(1),
            idle_backoff: config.idle_backoff(),
            max_idle_reads: config.max_idle_reads.max(1),
        }
    }
}

/// Handle to one reader thread. A loop is single-use: once terminated it is
/// never restarted, a new open spawns a new one.
pub struct ReaderLoop {
    state: Arc<AtomicU8>,
    sink: EventSink,
    handle: Option<JoinHandle<()>>,
    exit_rx: std_mpsc::Receiver<()>,
    metrics_rx: watch::Receiver<ReaderMetrics>,
}

/// Signals loop exit when dropped, so a panicking reader still unblocks stop().
struct ExitGuard {
    state: Arc<AtomicU8>,
    exit_tx: std_mpsc::Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.state.store(ReaderState::Terminated as u8, Ordering::SeqCst);
        let _ = self.exit_tx.send(());
    }
}

impl ReaderLoop {
    /// Move `input` onto a new `serial-reader` thread and start reading.
    pub fn spawn(
        input: Box<dyn Read + Send>,
        sink: EventSink,
        config: &BridgeConfig,
        label: String,
    ) -> Result<Self> {
        let state = Arc::new(AtomicU8::new(ReaderState::NotStarted as u8));
        let (exit_tx, exit_rx) = std_mpsc::channel();
        let (metrics_tx, metrics_rx) = watch::channel(ReaderMetrics::default());
        let params = ReadParams::from(config);

        let guard = ExitGuard {
            state: state.clone(),
            exit_tx,
        };
        let thread_sink = sink.clone();

        // Running before the thread exists, so a stop issued right after
        // spawn() is never overwritten by the thread starting up.
        state.store(ReaderState::Running as u8, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || {
                let guard = guard;
                read_loop(input, &thread_sink, &guard.state, params, &metrics_tx, &label);
            })
            .map_err(|e| {
                SerialError::ConnectionFailed(format!("Failed to spawn reader thread: {}", e))
            })?;

        Ok(Self {
            state,
            sink,
            handle: Some(handle),
            exit_rx,
            metrics_rx,
        })
    }

    pub fn state(&self) -> ReaderState {
        ReaderState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ReaderState::Running
    }

    pub fn metrics(&self) -> ReaderMetrics {
        self.metrics_rx.borrow().clone()
    }

    /// Request the loop to stop and wait up to `join_timeout` for the thread.
    ///
    /// Returns true if the thread was joined. A timed-out thread is detached;
    /// it can no longer publish because the sink gate was fenced.
    pub fn stop(&mut self, join_timeout: Duration) -> bool {
        let _ = self.state.compare_exchange(
            ReaderState::Running as u8,
            ReaderState::Stopping as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.sink.fence();

        let Some(handle) = self.handle.take() else {
            return true;
        };

        match self.exit_rx.recv_timeout(join_timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    log::error!("Serial reader thread panicked");
                }
                true
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Serial reader thread did not stop within {:?}, detaching it",
                    join_timeout
                );
                false
            }
        }
    }
}

impl Drop for ReaderLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop(Duration::ZERO);
        }
    }
}

impl std::fmt::Debug for ReaderLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderLoop")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn read_loop(
    mut input: Box<dyn Read + Send>,
    sink: &EventSink,
    state: &AtomicU8,
    params: ReadParams,
    metrics_tx: &watch::Sender<ReaderMetrics>,
    label: &str,
) {
    let running = || state.load(Ordering::SeqCst) == ReaderState::Running as u8;
    let mut buf = vec![0u8; params.chunk_size];
    let mut metrics = ReaderMetrics::default();
    let mut idle_reads = 0u32;

    log::debug!("[{}] Reader started", label);

    while running() {
        match input.read(&mut buf) {
            Ok(0) => {
                idle_reads += 1;
                if idle_reads >= params.max_idle_reads {
                    log::info!("[{}] Input stream ended after {} empty reads", label, idle_reads);
                    break;
                }
                thread::sleep(params.idle_backoff);
            }
            Ok(n) => {
                idle_reads = 0;
                let chunk = &buf[..n];
                log::trace!("[{}] rx {}", label, hex::encode(chunk));
                metrics.bytes_read += n as u64;
                match sink.publish_if(chunk, running) {
                    Delivery::Delivered => metrics.chunks_delivered += 1,
                    Delivery::NoSubscriber | Delivery::Dropped => metrics.chunks_dropped += 1,
                    Delivery::Gated => break,
                }
                let _ = metrics_tx.send(metrics.clone());
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                if running() {
                    log::error!("[{}] Error reading from serial port: {}", label, e);
                    metrics.last_error = Some(e.to_string());
                    let _ = metrics_tx.send(metrics.clone());
                } else {
                    log::debug!("[{}] Read error while stopping: {}", label, e);
                }
                break;
            }
        }
    }

    log::debug!("[{}] Reader stopped", label);
}
