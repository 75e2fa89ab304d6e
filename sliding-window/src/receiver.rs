//! Receiver run loop.
//!
//! A single sequential flow: read one SEQ batch, feed it through the
//! [`ReceiverTracker`], answer with exactly one ACK batch, repeat.  Every ACK
//! reflects the tracker right after its arrival batch.
//!
//! Malformed batches are logged and skipped without touching the tracker.
//! The run ends when the sender closes the stream, when an optional arrival
//! target is reached, or when the transport fails.  A close that leaves ids
//! missing ends the run incomplete.
//!
//! Ids at or above the receiver's `max_seq` are malformed.  The bootstrap does
//! not exchange the sequence space, so both sides must be started with the
//! same `--max-seq`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::config::ReceiverConfig;
use crate::connection::{ConnError, TcpConnection};
use crate::frame::{Frame, FrameError};
use crate::metrics::{MetricEvent, MetricsSink, RunClock};
use crate::receiver_tracker::ReceiverTracker;
use crate::state::{IncompleteReason, RunStatus};
use crate::transport::{FrameReader, FrameWriter, TransportError};
use crate::SeqId;

/// Summary of a finished receiver run.
#[derive(Debug, Clone)]
pub struct ReceiverReport {
    pub status: RunStatus,
    /// Every arrival, duplicates included.
    pub total_expected: u64,
    /// Distinct ids received.
    pub total_received: u64,
    pub highest_seq_received: Option<SeqId>,
    /// Ids still missing at the end of the run, ascending.
    pub missing: Vec<SeqId>,
    /// Goodput samples in the order they were taken.
    pub goodput_samples: Vec<f64>,
    /// Recoveries per id → number of ids.
    pub recovery_histogram: BTreeMap<u32, u64>,
    /// Batches discarded as malformed.
    pub malformed_batches: u64,
    pub elapsed: Duration,
}

impl ReceiverReport {
    /// Mean of the goodput samples, if any were taken.
    pub fn average_goodput(&self) -> Option<f64> {
        if self.goodput_samples.is_empty() {
            return None;
        }
        Some(self.goodput_samples.iter().sum::<f64>() / self.goodput_samples.len() as f64)
    }
}

/// Bind `config.bind`, accept one sender, and run until it is done.
pub async fn listen_and_serve(
    config: &ReceiverConfig,
    sink: Arc<dyn MetricsSink>,
) -> Result<ReceiverReport, ConnError> {
    let listener = TcpListener::bind(config.bind).await?;
    log::info!("Server started on {}", listener.local_addr()?);
    log::info!("Waiting for client connection...");
    serve(&listener, config, sink).await
}

/// Accept one sender on an already bound listener and run the transfer.
pub async fn serve(
    listener: &TcpListener,
    config: &ReceiverConfig,
    sink: Arc<dyn MetricsSink>,
) -> Result<ReceiverReport, ConnError> {
    let conn = TcpConnection::accept(listener, config.max_seq).await?;
    let (reader, writer) = conn.into_parts();
    Ok(run(reader, writer, config, sink).await)
}

/// Run the receive side over an already bootstrapped connection.
pub async fn run<R, W>(
    mut reader: FrameReader<R>,
    mut writer: FrameWriter<W>,
    config: &ReceiverConfig,
    sink: Arc<dyn MetricsSink>,
) -> ReceiverReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let clock = RunClock::start();
    let mut tracker = ReceiverTracker::new();
    let mut goodput_samples = Vec::new();
    let mut malformed_batches = 0u64;
    let every = config.goodput_interval.max(1);

    let status = loop {
        let ids = match reader.read_frame().await {
            Ok(Some(Frame::Seq(ids))) => ids,
            Ok(Some(other)) => {
                log::warn!("[receiver] ignoring unexpected {} frame", other.kind());
                continue;
            }
            Ok(None) if tracker.missing_count() == 0 => {
                log::info!("Client disconnected");
                break RunStatus::Complete;
            }
            Ok(None) => {
                log::warn!(
                    "Client disconnected with {} id(s) still missing",
                    tracker.missing_count()
                );
                break RunStatus::Incomplete(IncompleteReason::PeerClosed);
            }
            Err(TransportError::Malformed(e @ FrameError::OutOfRange { .. })) => {
                malformed_batches += 1;
                log::warn!("[receiver] discarding batch: {e}");
                log::warn!("[receiver] sender and receiver must use the same --max-seq");
                continue;
            }
            Err(e) if e.is_recoverable() => {
                malformed_batches += 1;
                log::warn!("[receiver] discarding malformed batch: {e}");
                continue;
            }
            Err(e) => {
                log::error!("Error handling client: {e}");
                break RunStatus::Incomplete(IncompleteReason::Transport(e.to_string()));
            }
        };

        let before = tracker.total_received();
        let outcome = tracker.process_batch(&ids);
        let at = clock.elapsed();
        for &id in &outcome.delivered {
            sink.record(MetricEvent::Received { at, id });
        }
        for &id in &outcome.new_gaps {
            sink.record(MetricEvent::Missing { at, id });
        }
        sink.record(MetricEvent::ReceiverWindow { at, size: tracker.window_estimate() });

        let after = tracker.total_received();
        if after / every != before / every {
            if let Some(value) = tracker.goodput() {
                goodput_samples.push(value);
                sink.record(MetricEvent::Goodput { at, value });
                log::info!("Packets received: {after}, Goodput: {value:.4}");
            }
        }

        log::debug!(
            "[receiver] ← SEQ n={} new={} gaps={} missing={}; → ACK",
            ids.len(),
            outcome.delivered.len(),
            outcome.new_gaps.len(),
            tracker.missing_count()
        );
        if let Err(e) = writer.send(&Frame::from(outcome.ack)).await {
            log::error!("Error sending ACKs: {e}");
            break RunStatus::Incomplete(IncompleteReason::Transport(e.to_string()));
        }

        if config.target.is_some_and(|target| tracker.total_expected() >= target) {
            log::info!("Reached target packet count. Finishing...");
            break RunStatus::Complete;
        }
    };

    if let Err(e) = writer.shutdown().await {
        log::debug!("[receiver] shutdown after run: {e}");
    }

    let report = ReceiverReport {
        status,
        total_expected: tracker.total_expected(),
        total_received: tracker.total_received(),
        highest_seq_received: tracker.highest_seq_received(),
        missing: tracker.missing().collect(),
        goodput_samples,
        recovery_histogram: tracker.recovery_histogram(),
        malformed_batches,
        elapsed: clock.elapsed(),
    };
    log_summary(&report);
    report
}

fn log_summary(report: &ReceiverReport) {
    log::info!(
        "Receiver {}. Expected: {}, Received: {}, Missing: {}",
        report.status,
        report.total_expected,
        report.total_received,
        report.missing.len()
    );
    log::info!(
        "Average Goodput: {:.4}, malformed batches: {}, elapsed: {:.3}s",
        report.average_goodput().unwrap_or(0.0),
        report.malformed_batches,
        report.elapsed.as_secs_f64()
    );
    if !report.recovery_histogram.is_empty() {
        log::info!("# of retransmissions | # of packets");
        for (retransmissions, packets) in &report.recovery_histogram {
            log::info!("{retransmissions} | {packets}");
        }
    }
}
