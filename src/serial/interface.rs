use std::io::{Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits};

use super::{Result, SerialError};

/// Everything needed to acquire a device. Framing is fixed at 8N1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub path: String,
    pub baud_rate: u32,
    /// Upper bound on a single blocking read before it yields `TimedOut`
    pub read_timeout: Duration,
}

impl PortSettings {
    pub fn new(path: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            read_timeout,
        }
    }
}

/// The two independent byte streams derived from an open device handle.
///
/// The output stream owns the underlying handle; dropping it releases the
/// device once the input stream is gone as well.
pub struct DeviceStreams {
    pub input: Box<dyn Read + Send>,
    pub output: Box<dyn Write + Send>,
}

impl std::fmt::Debug for DeviceStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStreams").finish_non_exhaustive()
    }
}

/// Acquires OS device handles. Implemented by the real serial backend and by
/// the loopback device used in tests.
pub trait PortBackend: Send + Sync {
    fn open(&self, settings: &PortSettings) -> Result<DeviceStreams>;
}

/// Backend over the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

impl SystemBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PortBackend for SystemBackend {
    fn open(&self, settings: &PortSettings) -> Result<DeviceStreams> {
        let port = serialport::new(&settings.path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", settings.path, e)))?;

        let input = port
            .try_clone()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", settings.path, e)))?;

        log::debug!(
            "Acquired {} at {} baud (8N1, read timeout {:?})",
            settings.path,
            settings.baud_rate,
            settings.read_timeout
        );

        Ok(DeviceStreams {
            input: Box::new(input),
            output: Box::new(port),
        })
    }
}
