use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

// Defaults mirror the conventional plugin behaviour: 64 byte reads, ~1s join.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
pub const DEFAULT_IDLE_BACKOFF_MS: u64 = 10;
pub const DEFAULT_MAX_IDLE_READS: u32 = 50;

/// Tunables for the connection, its reader loop and the event sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bytes requested per blocking read
    pub read_chunk_size: usize,
    /// Device read timeout; bounds how long a stop request can go unnoticed
    pub read_timeout_ms: u64,
    /// How long close() waits for the reader thread
    pub join_timeout_ms: u64,
    /// Queue depth between the reader and the subscriber
    pub event_capacity: usize,
    pub idle_backoff_ms: u64,
    /// Consecutive zero-length reads after which the stream is considered ended
    pub max_idle_reads: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            idle_backoff_ms: DEFAULT_IDLE_BACKOFF_MS,
            max_idle_reads: DEFAULT_MAX_IDLE_READS,
        }
    }
}

impl BridgeConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.read_chunk_size == 0 {
            return Err("read_chunk_size must be greater than zero".to_string());
        }
        if self.read_timeout_ms == 0 {
            return Err("read_timeout_ms must be greater than zero".to_string());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be greater than zero".to_string());
        }
        if self.max_idle_reads == 0 {
            return Err("max_idle_reads must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Parse a JSON document; missing fields fall back to defaults
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse bridge config")?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bridge config {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("Invalid bridge config {}", path.display()))
    }
}
