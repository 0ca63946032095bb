use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::interface::{PortBackend, PortSettings};
use super::reader::{ReaderLoop, ReaderMetrics, ReaderState};
use super::sink::EventSink;
use super::{Result, SerialError};
use crate::config::BridgeConfig;

/// Snapshot of the open connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub session_id: Uuid,
    pub device_path: String,
    pub baud_rate: u32,
    pub opened_at: DateTime<Utc>,
}

struct OpenPort {
    info: ConnectionInfo,
    output: Box<dyn Write + Send>,
    reader: ReaderLoop,
}

/// A single serial connection: at most one open device, one reader thread.
///
/// All mutating operations take `&mut self`, so open/close/write are
/// serialized by construction. Hosts that share a connection across threads
/// wrap it (or the owning bridge) in a mutex.
pub struct SerialConnection {
    backend: Arc<dyn PortBackend>,
    sink: EventSink,
    config: BridgeConfig,
    port: Option<OpenPort>,
}

impl SerialConnection {
    pub fn new(backend: Arc<dyn PortBackend>, sink: EventSink, config: BridgeConfig) -> Self {
        Self {
            backend,
            sink,
            config,
            port: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.port.as_ref().map(|p| &p.info)
    }

    pub fn reader_state(&self) -> Option<ReaderState> {
        self.port.as_ref().map(|p| p.reader.state())
    }

    pub fn reader_metrics(&self) -> Option<ReaderMetrics> {
        self.port.as_ref().map(|p| p.reader.metrics())
    }

    /// Open `path` at `baud_rate` (8N1) and start streaming received bytes.
    ///
    /// On any failure the connection stays closed.
    pub fn open(&mut self, path: &str, baud_rate: i64) -> Result<()> {
        self.config
            .validate()
            .map_err(SerialError::InvalidConfiguration)?;
        if path.trim().is_empty() {
            return Err(SerialError::InvalidConfiguration("device path is empty".to_string()));
        }
        let baud_rate = u32::try_from(baud_rate)
            .ok()
            .filter(|b| *b > 0)
            .ok_or_else(|| {
                SerialError::InvalidConfiguration(format!("invalid baud rate {}", baud_rate))
            })?;
        if let Some(open) = &self.port {
            return Err(SerialError::AlreadyOpen(open.info.device_path.clone()));
        }

        log::info!("Opening {} at {} baud", path, baud_rate);

        let settings = PortSettings::new(path, baud_rate, self.config.read_timeout());
        let streams = self.backend.open(&settings)?;

        let info = ConnectionInfo {
            session_id: Uuid::new_v4(),
            device_path: path.to_string(),
            baud_rate,
            opened_at: Utc::now(),
        };
        let label = format!("{}#{}", path, &info.session_id.simple().to_string()[..8]);

        // If the thread cannot be spawned the streams are dropped here and
        // nothing stays acquired.
        let reader = ReaderLoop::spawn(streams.input, self.sink.clone(), &self.config, label)?;

        self.port = Some(OpenPort {
            info,
            output: streams.output,
            reader,
        });

        log::info!("Serial port {} opened", path);
        Ok(())
    }

    /// Tear the connection down. Returns false if nothing was open.
    ///
    /// Cleanup is best-effort: a reader that does not stop in time or a
    /// failing flush is logged and teardown continues.
    pub fn close(&mut self) -> bool {
        let Some(mut port) = self.port.take() else {
            return false;
        };
        let path = port.info.device_path.clone();

        // The reader thread owns the input stream and drops it on exit.
        if !port.reader.stop(self.config.join_timeout()) {
            log::warn!("Reader for {} still blocked, input stream released when it exits", path);
        }

        if let Err(e) = port.output.flush() {
            log::error!("Error closing output stream for {}: {}", path, e);
        }
        drop(port);

        log::info!("Serial port {} closed", path);
        true
    }

    /// Blocking write of all of `data`. The connection stays open on error.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some(port) = self.port.as_mut() else {
            log::error!("Cannot write: serial port not open");
            return Err(SerialError::NotOpen);
        };
        if data.is_empty() {
            return Ok(());
        }

        let result = port.output.write_all(data).and_then(|_| port.output.flush());
        match result {
            Ok(()) => {
                log::trace!("[{}] tx {}", port.info.device_path, hex::encode(data));
                Ok(())
            }
            Err(e) => {
                log::error!("Error writing to serial port {}: {}", port.info.device_path, e);
                Err(SerialError::IoError(e))
            }
        }
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SerialConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialConnection")
            .field("info", &self.connection_info())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
