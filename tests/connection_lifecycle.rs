mod common;

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use serial_port_bridge::serial::ReaderState;
use serial_port_bridge::{BridgeConfig, SerialError};

use common::{loopback_bridge, wait_for_state};

#[test]
fn invalid_baud_leaves_nothing_open() {
    let (mut bridge, device) = loopback_bridge(BridgeConfig::default());
    assert!(!bridge.open("/dev/ttyS0", -1));
    assert!(bridge.connection_info().is_none());
    assert!(!bridge.close());
    assert!(device.open_history().is_empty());
}

#[test]
fn empty_path_is_rejected() {
    let (mut bridge, device) = loopback_bridge(BridgeConfig::default());
    assert!(!bridge.open("", 9600));
    assert!(!bridge.is_open());
    assert_eq!(device.live_streams(), 0);
}

#[test]
fn open_then_close_releases_everything() {
    let (mut bridge, device) = loopback_bridge(BridgeConfig::default());
    assert!(bridge.open("/dev/ttyS0", 9600));
    assert_eq!(bridge.reader_state(), Some(ReaderState::Running));

    let started = Instant::now();
    assert!(bridge.close());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!bridge.is_open());
    assert_eq!(bridge.reader_state(), None);
    assert_eq!(device.live_streams(), 0);
}

#[test]
fn double_close_is_side_effect_free() {
    let (mut bridge, device) = loopback_bridge(BridgeConfig::default());
    assert!(bridge.open("/dev/ttyS0", 9600));
    assert!(bridge.close());
    assert!(!bridge.close());
    assert_eq!(device.open_history().len(), 1);
}

#[test]
fn write_after_close_is_reported() {
    let (mut bridge, device) = loopback_bridge(BridgeConfig::default());
    assert!(bridge.open("/dev/ttyS0", 9600));
    assert!(bridge.close());

    assert!(matches!(bridge.write(b"late"), Err(SerialError::NotOpen)));
    assert!(device.written().is_empty());
}

#[test]
fn write_error_does_not_close() {
    let (mut bridge, device) = loopback_bridge(BridgeConfig::default());
    assert!(bridge.open("/dev/ttyS0", 9600));
    device.fail_writes(Some(ErrorKind::BrokenPipe));

    assert!(matches!(bridge.write(b"x"), Err(SerialError::IoError(_))));
    assert!(bridge.is_open());
    assert!(bridge.close());
}

#[tokio::test]
async fn read_error_terminates_reader_but_close_succeeds() {
    let (mut bridge, device) = loopback_bridge(BridgeConfig::default());
    device.fail_reads(ErrorKind::Other);

    assert!(bridge.open("/dev/ttyS0", 9600));
    assert_eq!(
        wait_for_state(&bridge, ReaderState::Terminated).await,
        Some(ReaderState::Terminated)
    );
    // Connection itself stays open until the caller closes it
    assert!(bridge.is_open());
    assert!(bridge.close());
    assert_eq!(device.live_streams(), 0);
}

#[tokio::test]
async fn end_of_stream_terminates_reader() {
    let config = BridgeConfig {
        max_idle_reads: 5,
        idle_backoff_ms: 1,
        ..BridgeConfig::default()
    };
    let (mut bridge, device) = loopback_bridge(config);
    device.end_stream();

    assert!(bridge.open("/dev/ttyS0", 9600));
    assert_eq!(
        wait_for_state(&bridge, ReaderState::Terminated).await,
        Some(ReaderState::Terminated)
    );
    assert!(bridge.close());
}

#[tokio::test]
async fn stuck_reader_cannot_deliver_after_close() {
    let config = BridgeConfig {
        join_timeout_ms: 100,
        ..BridgeConfig::default()
    };
    let (mut bridge, device) = loopback_bridge(config);
    let mut rx = bridge.listen();
    device.hold_reads(true);
    assert!(bridge.open("/dev/ttyS0", 9600));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    assert!(bridge.close());
    assert!(started.elapsed() < Duration::from_millis(900));

    device.feed(b"stale");
    device.hold_reads(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[test]
fn acquisition_failure_keeps_state_unopened() {
    let (mut bridge, device) = loopback_bridge(BridgeConfig::default());
    device.fail_open(Some("device busy"));
    assert!(!bridge.open("/dev/ttyS0", 9600));
    assert!(!bridge.is_open());

    device.fail_open(None);
    assert!(bridge.open("/dev/ttyS0", 9600));
    assert!(bridge.close());
}
