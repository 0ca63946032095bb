#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serial_port_bridge::device::StaticDeviceFinder;
use serial_port_bridge::serial::loopback::{LoopbackBackend, LoopbackDevice};
use serial_port_bridge::serial::ReaderState;
use serial_port_bridge::{BridgeConfig, SerialPortBridge};
use tokio::sync::mpsc;

pub fn loopback_bridge(config: BridgeConfig) -> (SerialPortBridge, LoopbackDevice) {
    let (backend, device) = LoopbackBackend::new();
    let bridge = SerialPortBridge::with_backend(
        Arc::new(backend),
        Arc::new(StaticDeviceFinder::default()),
        config,
    );
    (bridge, device)
}

/// Receive chunks until `expected` bytes arrived or two seconds passed.
pub async fn collect(rx: &mut mpsc::Receiver<Vec<u8>>, expected: usize) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut total = 0;
    while total < expected {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(chunk)) => {
                total += chunk.len();
                chunks.push(chunk);
            }
            _ => break,
        }
    }
    chunks
}

pub async fn wait_for_state(bridge: &SerialPortBridge, wanted: ReaderState) -> Option<ReaderState> {
    let deadline = Instant::now() + Duration::from_secs(2);
    while bridge.reader_state() != Some(wanted) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bridge.reader_state()
}
