//! Entry point for `sliding-window`.
//!
//! Parses CLI arguments and dispatches into either **server** (receiver) or
//! **client** (sender) mode.  All protocol work lives in the library;
//! `main.rs` owns only process setup (logging, argument parsing, exit code).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use sliding_window::config::{
    DEFAULT_DROP_RATE, DEFAULT_GOODPUT_INTERVAL, DEFAULT_MAX_SEQ, DEFAULT_MAX_WINDOW,
    DEFAULT_TOTAL_PACKETS, DEFAULT_WINDOW_SIZE,
};
use sliding_window::metrics::LogSink;
use sliding_window::{receiver, sender, ReceiverConfig, RunStatus, SenderConfig, SeqId};

/// Sliding-window transfer simulation over TCP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the receiver, accepting one sender.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:12345")]
        bind: SocketAddr,
        /// Stop after this many arrivals (duplicates included).
        #[arg(short, long)]
        target: Option<u64>,
        /// Size of the sequence space; must match the client's `--max-seq`.
        #[arg(long, default_value_t = DEFAULT_MAX_SEQ)]
        max_seq: SeqId,
        /// Sample goodput every N received ids.
        #[arg(long, default_value_t = DEFAULT_GOODPUT_INTERVAL)]
        goodput_interval: u64,
    },
    /// Run the sender, connecting to a receiver.
    Client {
        /// Receiver address.
        #[arg(short, long, default_value = "127.0.0.1:12345")]
        server: SocketAddr,
        /// Initial window capacity.
        #[arg(short, long, default_value_t = DEFAULT_WINDOW_SIZE)]
        window: usize,
        /// Window growth cap.
        #[arg(long, default_value_t = DEFAULT_MAX_WINDOW)]
        max_window: usize,
        /// Size of the sequence space; must match the server's `--max-seq`.
        #[arg(long, default_value_t = DEFAULT_MAX_SEQ)]
        max_seq: SeqId,
        /// Probability that a transmission attempt is dropped.
        #[arg(short, long, default_value_t = DEFAULT_DROP_RATE)]
        drop_rate: f64,
        /// Number of ids to deliver.
        #[arg(short = 'n', long, default_value_t = DEFAULT_TOTAL_PACKETS)]
        total_packets: SeqId,
        /// Give up after this many seconds without ACK progress.
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        /// Seed for the loss RNG.
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set RUST_LOG to control verbosity; defaults to info.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let status = match cli.mode {
        Mode::Server {
            bind,
            target,
            max_seq,
            goodput_interval,
        } => {
            let config = ReceiverConfig {
                bind,
                max_seq,
                target,
                goodput_interval,
            };
            config.validate().context("invalid server configuration")?;
            let report = receiver::listen_and_serve(&config, Arc::new(LogSink))
                .await
                .with_context(|| format!("server on {bind} failed"))?;
            report.status
        }
        Mode::Client {
            server,
            window,
            max_window,
            max_seq,
            drop_rate,
            total_packets,
            timeout_secs,
            seed,
        } => {
            let config = SenderConfig {
                server,
                window_size: window,
                max_window,
                max_seq,
                drop_rate,
                total_packets,
                completion_timeout: Duration::from_secs(timeout_secs),
                seed,
                ..SenderConfig::default()
            };
            config.validate().context("invalid client configuration")?;
            let report = sender::connect_and_run(&config, Arc::new(LogSink))
                .await
                .with_context(|| format!("client connecting to {server} failed"))?;
            report.status
        }
    };

    if let RunStatus::Incomplete(reason) = &status {
        log::warn!("run incomplete: {reason}");
        std::process::exit(status.exit_code());
    }
    Ok(())
}
