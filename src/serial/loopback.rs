//! In-process virtual serial device.
//!
//! [`LoopbackBackend`] hands out streams bound to a shared [`LoopbackDevice`].
//! The device handle plays the remote end of the line and can inject failures.
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use super::interface::{DeviceStreams, PortBackend, PortSettings};
use super::{Result, SerialError};

#[derive(Default)]
struct DeviceState {
    rx: VecDeque<u8>,
    written: Vec<u8>,
    read_error: Option<ErrorKind>,
    write_error: Option<ErrorKind>,
    end_of_stream: bool,
    /// Reads block regardless of timeout while set
    hold_reads: bool,
    open_error: Option<String>,
    opened: Vec<PortSettings>,
    live_streams: usize,
}

struct Shared {
    state: Mutex<DeviceState>,
    changed: Condvar,
}

/// Remote end of the loopback device.
#[derive(Clone)]
pub struct LoopbackDevice {
    shared: Arc<Shared>,
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDevice {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DeviceState::default()),
                changed: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut DeviceState)) {
        f(&mut self.lock());
        self.shared.changed.notify_all();
    }

    /// Queue bytes for the read side.
    pub fn feed(&self, bytes: &[u8]) {
        self.update(|s| s.rx.extend(bytes.iter().copied()));
    }

    /// Everything written to the device so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Make every following read fail with `kind`.
    pub fn fail_reads(&self, kind: ErrorKind) {
        self.update(|s| s.read_error = Some(kind));
    }

    pub fn fail_writes(&self, kind: Option<ErrorKind>) {
        self.update(|s| s.write_error = kind);
    }

    /// Reads return `Ok(0)` once the queue is drained.
    pub fn end_stream(&self) {
        self.update(|s| s.end_of_stream = true);
    }

    /// Block readers until released, ignoring the read timeout. Simulates a
    /// driver read that cannot be interrupted.
    pub fn hold_reads(&self, hold: bool) {
        self.update(|s| s.hold_reads = hold);
    }

    /// Make the next acquisitions fail.
    pub fn fail_open(&self, reason: Option<&str>) {
        self.update(|s| s.open_error = reason.map(str::to_string));
    }

    /// Settings of every successful acquisition, oldest first.
    pub fn open_history(&self) -> Vec<PortSettings> {
        self.lock().opened.clone()
    }

    /// Streams handed out and not yet dropped.
    pub fn live_streams(&self) -> usize {
        self.lock().live_streams
    }
}

impl std::fmt::Debug for LoopbackDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LoopbackDevice")
            .field("pending_rx", &state.rx.len())
            .field("written", &state.written.len())
            .field("live_streams", &state.live_streams)
            .finish()
    }
}

struct LoopbackInput {
    device: LoopbackDevice,
    timeout: Duration,
}

struct LoopbackOutput {
    device: LoopbackDevice,
}

impl Read for LoopbackInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let shared = &self.device.shared;
        let mut state = self.device.lock();

        while state.hold_reads {
            state = shared
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        if state.rx.is_empty() && state.read_error.is_none() && !state.end_of_stream {
            state = shared
                .changed
                .wait_timeout_while(state, self.timeout, |s| {
                    s.rx.is_empty() && s.read_error.is_none() && !s.end_of_stream
                })
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }

        if let Some(kind) = state.read_error {
            return Err(io::Error::new(kind, "loopback read failure"));
        }
        if !state.rx.is_empty() {
            let n = buf.len().min(state.rx.len());
            for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                *slot = byte;
            }
            return Ok(n);
        }
        if state.end_of_stream {
            return Ok(0);
        }
        Err(io::Error::new(ErrorKind::TimedOut, "Operation timed out"))
    }
}

impl Write for LoopbackOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.lock();
        if let Some(kind) = state.write_error {
            return Err(io::Error::new(kind, "loopback write failure"));
        }
        state.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.device.lock().write_error {
            Some(kind) => Err(io::Error::new(kind, "loopback flush failure")),
            None => Ok(()),
        }
    }
}

impl Drop for LoopbackInput {
    fn drop(&mut self) {
        self.device.update(|s| s.live_streams = s.live_streams.saturating_sub(1));
    }
}

impl Drop for LoopbackOutput {
    fn drop(&mut self) {
        self.device.update(|s| s.live_streams = s.live_streams.saturating_sub(1));
    }
}

/// [`PortBackend`] that always acquires the same [`LoopbackDevice`].
#[derive(Debug, Clone, Default)]
pub struct LoopbackBackend {
    device: LoopbackDevice,
}

impl LoopbackBackend {
    pub fn new() -> (Self, LoopbackDevice) {
        let device = LoopbackDevice::new();
        (
            Self {
                device: device.clone(),
            },
            device,
        )
    }
}

impl PortBackend for LoopbackBackend {
    fn open(&self, settings: &PortSettings) -> Result<DeviceStreams> {
        let mut state = self.device.lock();
        if let Some(reason) = &state.open_error {
            return Err(SerialError::ConnectionFailed(format!(
                "{}: {}",
                settings.path, reason
            )));
        }
        state.opened.push(settings.clone());
        state.live_streams += 2;
        drop(state);

        Ok(DeviceStreams {
            input: Box::new(LoopbackInput {
                device: self.device.clone(),
                timeout: settings.read_timeout,
            }),
            output: Box::new(LoopbackOutput {
                device: self.device.clone(),
            }),
        })
    }
}
