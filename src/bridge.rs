use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::config::BridgeConfig;
use crate::device::{DeviceFinder, SystemDeviceFinder};
use crate::serial::{
    ConnectionInfo, EventSink, PortBackend, ReaderMetrics, ReaderState, Result, SerialConnection,
    SerialError, SystemBackend,
};

/// Command surface exposed to the host: one connection, one subscriber slot,
/// and device enumeration delegated to a [`DeviceFinder`].
///
/// `open`/`close` report through their boolean result and the log; they
/// never fail the caller.
pub struct SerialPortBridge {
    connection: SerialConnection,
    sink: EventSink,
    finder: Arc<dyn DeviceFinder>,
    config: BridgeConfig,
}

impl SerialPortBridge {
    /// Bridge over real serial hardware.
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_backend(Arc::new(SystemBackend::new()), Arc::new(SystemDeviceFinder), config)
    }

    pub fn with_backend(
        backend: Arc<dyn PortBackend>,
        finder: Arc<dyn DeviceFinder>,
        config: BridgeConfig,
    ) -> Self {
        let sink = EventSink::new();
        Self {
            connection: SerialConnection::new(backend, sink.clone(), config.clone()),
            sink,
            finder,
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn open(&mut self, device_path: &str, baud_rate: i64) -> bool {
        match self.connection.open(device_path, baud_rate) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to open {}: {}", device_path, e);
                false
            }
        }
    }

    /// Returns whether a port had been open.
    pub fn close(&mut self) -> bool {
        self.connection.close()
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.connection.write(data)
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.connection.connection_info().cloned()
    }

    pub fn reader_state(&self) -> Option<ReaderState> {
        self.connection.reader_state()
    }

    /// Counters of the current reader, `None` while closed.
    pub fn reader_metrics(&self) -> Option<ReaderMetrics> {
        self.connection.reader_metrics()
    }

    pub fn list_devices(&self) -> Result<Vec<String>> {
        let devices = self.finder.device_names()?;
        log::debug!("Serial devices: {:?}", devices);
        Ok(devices)
    }

    pub fn list_device_paths(&self) -> Result<Vec<String>> {
        let paths = self.finder.device_paths()?;
        log::debug!("Serial device paths: {:?}", paths);
        Ok(paths)
    }

    /// Start a new subscription, replacing any existing one.
    pub fn listen(&self) -> mpsc::Receiver<Vec<u8>> {
        self.sink.subscribe(self.config.event_capacity)
    }

    pub fn cancel_listen(&self) {
        self.sink.clear();
    }

    pub fn is_listening(&self) -> bool {
        self.sink.has_subscriber()
    }

    /// Host is going away: close the port and drop the subscriber.
    pub fn shutdown(&mut self) {
        self.connection.close();
        self.sink.clear();
        log::debug!("Serial bridge shut down");
    }
}

impl Drop for SerialPortBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A [`SerialPortBridge`] shared between host threads.
///
/// Calls are serialized by a mutex. `run_blocking` moves a call onto the
/// tokio blocking pool so async hosts never block on device I/O.
#[derive(Clone)]
pub struct SharedBridge {
    inner: Arc<Mutex<SerialPortBridge>>,
}

impl SharedBridge {
    pub fn new(bridge: SerialPortBridge) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bridge)),
        }
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut SerialPortBridge) -> T) -> Result<T> {
        let mut guard = lock(&self.inner)?;
        Ok(f(&mut *guard))
    }

    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SerialPortBridge) -> T + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&inner)?;
            Ok(f(&mut *guard))
        })
        .await
        .map_err(|e| SerialError::Unavailable(format!("Serial task failed: {}", e)))?
    }

    pub fn shutdown(&self) {
        match lock(&self.inner) {
            Ok(mut bridge) => bridge.shutdown(),
            Err(e) => log::error!("Cannot shut down serial bridge: {}", e),
        }
    }
}

impl std::fmt::Debug for SharedBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBridge").finish_non_exhaustive()
    }
}

fn lock(bridge: &Mutex<SerialPortBridge>) -> Result<MutexGuard<'_, SerialPortBridge>> {
    bridge
        .lock()
        .map_err(|e| SerialError::Unavailable(format!("Serial bridge lock poisoned: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StaticDeviceFinder;
    use crate::serial::loopback::{LoopbackBackend, LoopbackDevice};
    use crate::serial::{SerialDeviceInfo, SerialError};

    fn bridge() -> (SerialPortBridge, LoopbackDevice) {
        let (backend, device) = LoopbackBackend::new();
        let finder = StaticDeviceFinder::new(vec![SerialDeviceInfo::new("/dev/ttyS0", "pci")]);
        let bridge =
            SerialPortBridge::with_backend(Arc::new(backend), Arc::new(finder), BridgeConfig::default());
        (bridge, device)
    }

    #[test]
    fn invalid_open_then_close_reports_nothing_open() {
        let (mut bridge, device) = bridge();
        assert!(!bridge.open("/dev/ttyS0", -1));
        assert!(!bridge.is_open());
        assert!(!bridge.close());
        assert!(device.open_history().is_empty());
    }

    #[test]
    fn open_close_returns_true_true() {
        let (mut bridge, _device) = bridge();
        assert!(bridge.open("/dev/ttyS0", 9600));
        assert!(!bridge.open("/dev/ttyS0", 9600));
        assert!(bridge.close());
        assert!(!bridge.close());
    }

    #[test]
    fn write_after_close_is_an_error() {
        let (mut bridge, _device) = bridge();
        assert!(bridge.open("/dev/ttyS0", 9600));
        assert!(bridge.close());
        assert!(matches!(bridge.write(b"data"), Err(SerialError::NotOpen)));
    }

    #[test]
    fn lists_devices_from_finder() {
        let (bridge, _device) = bridge();
        assert_eq!(bridge.list_devices().unwrap(), vec!["ttyS0 (pci)"]);
        assert_eq!(bridge.list_device_paths().unwrap(), vec!["/dev/ttyS0"]);
    }

    #[test]
    fn shutdown_closes_and_clears_subscriber() {
        let (mut bridge, device) = bridge();
        let _rx = bridge.listen();
        assert!(bridge.open("/dev/ttyS0", 9600));
        bridge.shutdown();
        assert!(!bridge.is_open());
        assert!(!bridge.is_listening());
        assert_eq!(device.live_streams(), 0);
    }

    #[test]
    fn reader_metrics_follow_the_open_port() {
        let (mut bridge, device) = bridge();
        assert_eq!(bridge.reader_metrics(), None);
        assert!(bridge.open("/dev/ttyS0", 9600));

        device.feed(b"0123456789");
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while bridge.reader_metrics().map_or(0, |m| m.bytes_read) < 10
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let metrics = bridge.reader_metrics().unwrap();
        assert_eq!(metrics.bytes_read, 10);
        // Nobody listens, so every chunk is counted as dropped.
        assert_eq!(metrics.chunks_delivered, 0);
        assert!(metrics.chunks_dropped >= 1);

        assert!(bridge.close());
        assert_eq!(bridge.reader_metrics(), None);
    }

    #[tokio::test]
    async fn shared_bridge_runs_calls_on_blocking_pool() {
        let (bridge, device) = bridge();
        let shared = SharedBridge::new(bridge);

        assert!(shared.run_blocking(|b| b.open("/dev/ttyS0", 9600)).await.unwrap());
        shared
            .run_blocking(|b| b.write(b"PING"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(device.written(), b"PING".to_vec());
        assert!(shared.with(|b| b.is_open()).unwrap());

        assert!(shared.run_blocking(|b| b.close()).await.unwrap());
        assert_eq!(device.live_streams(), 0);
    }

    #[test]
    fn shared_bridge_shutdown_releases_port() {
        let (bridge, device) = bridge();
        let shared = SharedBridge::new(bridge);
        let _rx = shared.with(|b| b.listen()).unwrap();
        assert!(shared.with(|b| b.open("/dev/ttyS0", 9600)).unwrap());

        shared.clone().shutdown();
        assert!(!shared.with(|b| b.is_open()).unwrap());
        assert!(!shared.with(|b| b.is_listening()).unwrap());
        assert_eq!(device.live_streams(), 0);
    }

    #[test]
    fn poisoned_shared_bridge_is_unavailable() {
        let (bridge, _device) = bridge();
        let shared = SharedBridge::new(bridge);
        let poisoner = shared.clone();
        let _ = std::thread::spawn(move || {
            let _ = poisoner.with(|_| panic!("poison"));
        })
        .join();

        assert!(matches!(shared.with(|b| b.is_open()), Err(SerialError::Unavailable(_))));
        shared.shutdown();
    }
}
