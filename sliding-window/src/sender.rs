//! Sender run loop.
//!
//! # Architecture
//!
//! ```text
//!             Arc<Mutex<SenderWindow>>
//!          ┌──────────────┴──────────────┐
//!          │                             │
//!   send loop (caller task)        ACK task (spawned)
//!    ├── drain retransmissions      ├── read ACK frame
//!    ├── admit new ids              ├── on_ack_batch
//!    ├── loss decision per attempt  └── slide / grow
//!    ├── write one SEQ batch
//!    └── sleep poll_interval
//! ```
//!
//! The window lock is only held for state changes, never across I/O.  The
//! send loop never blocks on the window: when nothing can be sent it sleeps
//! for one poll interval and looks again.
//!
//! # Termination
//!
//! - every id admitted and acknowledged → [`RunStatus::Complete`];
//! - no ACK progress for `completion_timeout`, a failed write, or the ACK
//!   stream ending early → [`RunStatus::Incomplete`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::SenderConfig;
use crate::connection::{ConnError, TcpConnection};
use crate::frame::Frame;
use crate::metrics::{MetricEvent, MetricsSink, RunClock};
use crate::sender_window::SenderWindow;
use crate::simulator::{LossModel, RandomLoss};
use crate::state::{IncompleteReason, RunStatus};
use crate::transport::{FrameReader, FrameWriter, TransportError};
use crate::SeqId;

/// Summary of a finished sender run.
#[derive(Debug, Clone)]
pub struct SenderReport {
    pub status: RunStatus,
    /// Distinct ids admitted.
    pub sent_packets: u64,
    /// Distinct ids acknowledged.
    pub acked_packets: u64,
    /// Distinct ids whose first attempt was dropped.
    pub dropped_packets: usize,
    /// Ids still waiting for a retransmission when the run ended.
    pub pending_retransmissions: Vec<SeqId>,
    /// Window capacity at the end of the run.
    pub window_size: usize,
    /// Number of retransmissions → number of ids.
    pub retransmission_histogram: BTreeMap<u32, u64>,
    pub elapsed: Duration,
}

/// Connect to `config.server`, bootstrap, and run a transfer with random
/// loss at `config.drop_rate`.
pub async fn connect_and_run(
    config: &SenderConfig,
    sink: Arc<dyn MetricsSink>,
) -> Result<SenderReport, ConnError> {
    let conn = TcpConnection::connect(config.server, config.max_seq).await?;
    let (reader, writer) = conn.into_parts();
    let loss = RandomLoss::with_seed(config.drop_rate, config.seed);
    Ok(run(reader, writer, config, loss, sink).await)
}

/// Run one transfer over an already bootstrapped connection.
///
/// `reader` carries ACK batches from the receiver and is moved into a
/// spawned task; `writer` carries SEQ batches.  Never returns an error:
/// transport failures end the run with an incomplete status.
pub async fn run<R, W, L>(
    reader: FrameReader<R>,
    mut writer: FrameWriter<W>,
    config: &SenderConfig,
    mut loss: L,
    sink: Arc<dyn MetricsSink>,
) -> SenderReport
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
    L: LossModel,
{
    let clock = RunClock::start();
    let window = Arc::new(Mutex::new(SenderWindow::from_config(config)));
    log::info!(
        "[sender] starting: {} id(s), window {}, cap {}, drop rate {}",
        config.effective_total(),
        config.window_size,
        config.max_window,
        config.drop_rate
    );

    let mut ack_task: JoinHandle<Result<(), TransportError>> = tokio::spawn(ack_loop(
        reader,
        Arc::clone(&window),
        Arc::clone(&sink),
        clock,
        config.progress_interval,
    ));

    let mut last_acked = 0u64;
    let mut last_progress = Instant::now();

    let status = loop {
        let (batch, complete, acked, unacked) = {
            let mut w = window.lock().await;
            let batch = next_batch(&mut w, &mut loss, sink.as_ref(), &clock);
            let unacked = u64::from(w.limit()) - w.acked_packets();
            (batch, w.is_complete(), w.acked_packets(), unacked)
        };

        if complete {
            break RunStatus::Complete;
        }

        if !batch.is_empty() {
            log::debug!(
                "[sender] → SEQ n={} first={} last={}",
                batch.len(),
                batch[0],
                batch[batch.len() - 1]
            );
            if let Err(e) = writer.send(&Frame::Seq(batch)).await {
                log::error!("Error sending packets: {e}");
                break RunStatus::Incomplete(IncompleteReason::Transport(e.to_string()));
            }
        }

        if acked != last_acked {
            last_acked = acked;
            last_progress = Instant::now();
        } else if last_progress.elapsed() >= config.completion_timeout {
            log::warn!(
                "[sender] no ACK progress for {:?}; giving up",
                config.completion_timeout
            );
            break RunStatus::Incomplete(IncompleteReason::Timeout { unacked });
        }

        if ack_task.is_finished() {
            let ended = (&mut ack_task).await;
            if window.lock().await.is_complete() {
                break RunStatus::Complete;
            }
            let reason = match ended {
                Ok(Ok(())) => IncompleteReason::PeerClosed,
                Ok(Err(e)) => IncompleteReason::Transport(e.to_string()),
                Err(e) => IncompleteReason::Transport(e.to_string()),
            };
            log::error!("[sender] ACK stream ended: {reason}");
            break RunStatus::Incomplete(reason);
        }

        tokio::time::sleep(config.poll_interval).await;
    };

    if let Err(e) = writer.shutdown().await {
        log::debug!("[sender] shutdown after run: {e}");
    }
    ack_task.abort();

    let w = window.lock().await;
    for (&id, &count) in w.retransmission_counts() {
        sink.record(MetricEvent::Retransmissions { id, count });
    }
    let report = SenderReport {
        status,
        sent_packets: w.sent_packets(),
        acked_packets: w.acked_packets(),
        dropped_packets: w.dropped_count(),
        pending_retransmissions: w.retransmission_queue().collect(),
        window_size: w.window_size(),
        retransmission_histogram: w.retransmission_histogram(),
        elapsed: clock.elapsed(),
    };
    log_summary(&report, config);
    report
}

/// One tick of work: retransmissions first, then new ids while the window
/// has room.  Returns the ids that survived the loss model, in send order.
fn next_batch<L>(
    w: &mut SenderWindow,
    loss: &mut L,
    sink: &dyn MetricsSink,
    clock: &RunClock,
) -> Vec<SeqId>
where
    L: LossModel + ?Sized,
{
    let round = w.drain_retransmissions(loss);
    let at = clock.elapsed();
    for &id in &round.dropped {
        log::debug!("Dropping retransmission of sequence number {id}");
        sink.record(MetricEvent::Dropped { at, id, retransmission: true });
    }
    for &id in &round.resent {
        log::debug!("Retransmitted packet with sequence number {id}");
        sink.record(MetricEvent::Sent { at, id, retransmission: true });
    }

    let mut batch = round.resent;
    while let Some(id) = w.admit_next() {
        let at = clock.elapsed();
        if loss.should_drop() {
            log::debug!("Dropping packet with sequence number {id}");
            w.mark_lost(id);
            sink.record(MetricEvent::Dropped { at, id, retransmission: false });
        } else {
            batch.push(id);
            sink.record(MetricEvent::Sent { at, id, retransmission: false });
        }
        sink.record(MetricEvent::WindowSize { at, size: w.window_size() });
    }
    batch
}

/// Consume ACK batches until the stream ends.
async fn ack_loop<R>(
    mut reader: FrameReader<R>,
    window: Arc<Mutex<SenderWindow>>,
    sink: Arc<dyn MetricsSink>,
    clock: RunClock,
    progress_interval: u64,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let ids = match reader.read_frame().await {
            Ok(Some(Frame::Ack(ids))) => ids,
            Ok(Some(other)) => {
                log::warn!("[ack] ignoring unexpected {} frame", other.kind());
                continue;
            }
            Ok(None) => {
                log::debug!("[ack] stream closed by receiver");
                return Ok(());
            }
            Err(e) if e.is_recoverable() => {
                log::warn!("[ack] discarding malformed ACK batch: {e}");
                continue;
            }
            Err(e) => {
                log::error!("Error receiving ACKs: {e}");
                return Err(e);
            }
        };

        let mut w = window.lock().await;
        let before = w.acked_packets();
        let newly_acked = w.on_ack_batch(ids.iter().copied());
        let (acked, sent) = (w.acked_packets(), w.sent_packets());
        let (base, size) = (w.base(), w.window_size());
        drop(w);

        sink.record(MetricEvent::WindowSize { at: clock.elapsed(), size });
        log::debug!(
            "[ack] ← ACK n={} new={} base={} window={}",
            ids.len(),
            newly_acked,
            base,
            size
        );
        let every = progress_interval.max(1);
        if acked / every != before / every {
            log::info!("Packets sent: {sent}, ACKed: {acked}, Window size: {size}");
        }
    }
}

fn log_summary(report: &SenderReport, config: &SenderConfig) {
    log::info!(
        "Transmission {}. Sent: {}, ACKed: {}",
        report.status,
        report.sent_packets,
        report.acked_packets
    );
    log::info!(
        "Packets dropped: {}, drop rate: {}, final window: {}, elapsed: {:.3}s",
        report.dropped_packets,
        config.drop_rate,
        report.window_size,
        report.elapsed.as_secs_f64()
    );
    if !report.retransmission_histogram.is_empty() {
        log::info!("# of retransmissions | # of packets");
        for (retransmissions, packets) in &report.retransmission_histogram {
            log::info!("{retransmissions} | {packets}");
        }
    }
}
