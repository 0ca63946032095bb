pub mod connection;
pub mod interface;
pub mod loopback;
pub mod reader;
pub mod sink;

pub use connection::{ConnectionInfo, SerialConnection};
pub use interface::{DeviceStreams, PortBackend, PortSettings, SystemBackend};
pub use reader::{ReaderLoop, ReaderMetrics, ReaderState};
pub use sink::EventSink;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    /// Driver or bus the port hangs off ("usb", "pci", "bluetooth", "unknown")
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl SerialDeviceInfo {
    pub fn new(port_name: impl Into<String>, port_type: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            port_type: port_type.into(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Human readable name, e.g. `ttyUSB0 (usb)`
    pub fn display_name(&self) -> String {
        let short = self
            .port_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.port_name);
        match &self.product {
            Some(product) => format!("{} ({}, {})", short, self.port_type, product),
            None => format!("{} ({})", short, self.port_type),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Serial port already open: {0}")]
    AlreadyOpen(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Serial port not open")]
    NotOpen,

    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("Serial bridge unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
