//! Run parameters for both halves of a transfer.
//!
//! Every field has a default matching the reference setup (window 10, cap
//! 100, 2^16 sequence ids, 1% loss).  The CLI in `main.rs` overrides
//! individual values; tests build configs with small packet targets.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::SeqId;

/// Initial sender window capacity.
pub const DEFAULT_WINDOW_SIZE: usize = 10;
/// Hard cap on the sender window.
pub const DEFAULT_MAX_WINDOW: usize = 100;
/// Size of the sequence space; ids run from 0 to `MAX_SEQ - 1`.
pub const DEFAULT_MAX_SEQ: SeqId = 1 << 16;
/// Probability that a transmission attempt is dropped.
pub const DEFAULT_DROP_RATE: f64 = 0.01;
/// Number of sequence ids the sender tries to deliver.
pub const DEFAULT_TOTAL_PACKETS: SeqId = 10_000_000;
/// How long the sender waits without ACK progress before giving up.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);
/// Pause between sender ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Sender progress is logged every this many acknowledged ids.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;
/// Goodput is sampled every this many received ids.
pub const DEFAULT_GOODPUT_INTERVAL: u64 = 1000;
/// Default TCP port shared by client and server.
pub const DEFAULT_PORT: u16 = 12345;

/// Invalid parameter combinations rejected by `validate`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("initial window {initial} exceeds window cap {max}")]
    WindowAboveCap { initial: usize, max: usize },
    #[error("drop rate {0} outside [0.0, 1.0)")]
    DropRate(f64),
    #[error("sequence space must hold at least one id")]
    EmptySequenceSpace,
    #[error("{0} interval must be non-zero")]
    ZeroInterval(&'static str),
}

/// Parameters for the sending side.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Receiver address to connect to.
    pub server: SocketAddr,
    /// Initial window capacity.
    pub window_size: usize,
    /// Window growth stops here.
    pub max_window: usize,
    /// Size of the sequence space.
    pub max_seq: SeqId,
    /// Drop probability applied to every transmission attempt.
    pub drop_rate: f64,
    /// Ids `0..total_packets` are sent (further capped by `max_seq`).
    pub total_packets: SeqId,
    /// Give up after this long without ACK progress.
    pub completion_timeout: Duration,
    /// Sleep between ticks of the send loop.
    pub poll_interval: Duration,
    /// Log progress every this many acknowledged ids.
    pub progress_interval: u64,
    /// Seed for the loss RNG; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            server: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            window_size: DEFAULT_WINDOW_SIZE,
            max_window: DEFAULT_MAX_WINDOW,
            max_seq: DEFAULT_MAX_SEQ,
            drop_rate: DEFAULT_DROP_RATE,
            total_packets: DEFAULT_TOTAL_PACKETS,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            seed: None,
        }
    }
}

impl SenderConfig {
    /// Number of ids the run actually has to deliver.
    ///
    /// Production stops at `max_seq` even when `total_packets` is larger.
    pub fn effective_total(&self) -> SeqId {
        self.total_packets.min(self.max_seq)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.window_size > self.max_window {
            return Err(ConfigError::WindowAboveCap {
                initial: self.window_size,
                max: self.max_window,
            });
        }
        if !(0.0..1.0).contains(&self.drop_rate) {
            return Err(ConfigError::DropRate(self.drop_rate));
        }
        if self.max_seq == 0 {
            return Err(ConfigError::EmptySequenceSpace);
        }
        if self.progress_interval == 0 {
            return Err(ConfigError::ZeroInterval("progress"));
        }
        Ok(())
    }
}

/// Parameters for the receiving side.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Address to listen on.
    pub bind: SocketAddr,
    /// Size of the sequence space; larger ids are rejected as malformed.
    pub max_seq: SeqId,
    /// Stop once this many arrivals have been counted (`None` = until EOF).
    pub target: Option<u64>,
    /// Sample (and log) goodput every this many received ids.
    pub goodput_interval: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_seq: DEFAULT_MAX_SEQ,
            target: None,
            goodput_interval: DEFAULT_GOODPUT_INTERVAL,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_seq == 0 {
            return Err(ConfigError::EmptySequenceSpace);
        }
        if self.goodput_interval == 0 {
            return Err(ConfigError::ZeroInterval("goodput"));
        }
        Ok(())
    }
}
