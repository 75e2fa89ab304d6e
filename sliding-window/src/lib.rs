//! `sliding-window` — a sliding-window transfer simulation over a reliable
//! byte stream.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐   SEQ batches   ┌─────────────────┐
//!  │ SenderWindow │────────────────▶│ ReceiverTracker │
//!  └──────┬───────┘  (lossy sends)  └────────┬────────┘
//!         │                                  │
//!         │          ACK batches             │
//!         │◀─────────────────────────────────┘
//!         │
//!  ┌──────▼─────────────────────────────┐
//!  │  sender / receiver run loops       │
//!  │  (own state machine + transport)   │
//!  └──────┬─────────────────────────────┘
//!         │ text frames, one per line
//!  ┌──────▼──────┐
//!  │  Transport  │  (frame reader/writer over any tokio stream)
//!  └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]            — wire format (serialise / parse)
//! - [`transport`]        — async frame reader/writer over stream halves
//! - [`connection`]       — TCP connect/accept and bootstrap handshake
//! - [`sender_window`]    — send-side window state machine
//! - [`receiver_tracker`] — receive-side gap tracking and goodput
//! - [`simulator`]        — per-attempt loss decision
//! - [`sender`]           — sender run loop plus concurrent ACK consumer
//! - [`receiver`]         — receiver run loop
//! - [`metrics`]          — structured events for an external observer
//! - [`state`]            — run outcome types
//! - [`config`]           — run parameters and their defaults

pub mod config;
pub mod connection;
pub mod frame;
pub mod metrics;
pub mod receiver;
pub mod receiver_tracker;
pub mod sender;
pub mod sender_window;
pub mod simulator;
pub mod state;
pub mod transport;

/// A sequence identifier.  Ids start at 0 and are never reused in a run.
pub type SeqId = u32;

pub use config::{ReceiverConfig, SenderConfig};
pub use receiver_tracker::ReceiverTracker;
pub use sender_window::SenderWindow;
pub use state::RunStatus;
