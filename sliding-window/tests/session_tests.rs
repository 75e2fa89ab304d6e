//! End-to-end tests: a sender run and a receiver run talking to each other.
//!
//! Most tests connect the two sides with an in-memory `tokio::io::duplex`
//! pipe; one goes through a real TCP listener on loopback.  Both sides are
//! spawned as separate tokio tasks so they make progress concurrently.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{
    duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::net::TcpListener;

use sliding_window::connection::Connection;
use sliding_window::frame::Frame;
use sliding_window::metrics::{MemorySink, MetricEvent, NullSink};
use sliding_window::simulator::{LossModel, RandomLoss, ScriptedLoss};
use sliding_window::state::{IncompleteReason, RunStatus};
use sliding_window::{receiver, sender, ReceiverConfig, SenderConfig};

type Pipe = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn pipe_pair(max_seq: u32) -> (Pipe, Pipe) {
    let (a, b) = duplex(64 * 1024);
    let (ar, aw) = split(a);
    let (br, bw) = split(b);
    (Connection::new(ar, aw, max_seq), Connection::new(br, bw, max_seq))
}

fn sender_config(total_packets: u32) -> SenderConfig {
    SenderConfig {
        total_packets,
        completion_timeout: Duration::from_secs(5),
        ..SenderConfig::default()
    }
}

fn receiver_config(goodput_interval: u64) -> ReceiverConfig {
    ReceiverConfig {
        goodput_interval,
        ..ReceiverConfig::default()
    }
}

/// Bootstrap both ends of a pipe and run a full transfer.
async fn transfer<L>(
    sender_cfg: SenderConfig,
    receiver_cfg: ReceiverConfig,
    loss: L,
    sink: Arc<MemorySink>,
) -> (sender::SenderReport, receiver::ReceiverReport)
where
    L: LossModel + 'static,
{
    let (mut client, mut server) = pipe_pair(sender_cfg.max_seq);

    let receiver_sink = Arc::clone(&sink);
    let receiver_task = tokio::spawn(async move {
        server.server_handshake().await.expect("server handshake");
        let (reader, writer) = server.into_parts();
        receiver::run(reader, writer, &receiver_cfg, receiver_sink).await
    });

    let sender_task = tokio::spawn(async move {
        client.client_handshake().await.expect("client handshake");
        let (reader, writer) = client.into_parts();
        sender::run(reader, writer, &sender_cfg, loss, sink).await
    });

    let (s, r) = tokio::join!(sender_task, receiver_task);
    (s.unwrap(), r.unwrap())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Without loss every id is delivered once and goodput stays at 1.
#[tokio::test]
async fn lossless_transfer_completes() {
    let sink = Arc::new(MemorySink::new());
    let (s, r) = transfer(
        sender_config(500),
        receiver_config(100),
        ScriptedLoss::lossless(),
        Arc::clone(&sink),
    )
    .await;

    assert_eq!(s.status, RunStatus::Complete);
    assert_eq!(s.sent_packets, 500);
    assert_eq!(s.acked_packets, 500);
    assert_eq!(s.dropped_packets, 0);
    assert!(s.window_size > 10);
    assert!(s.retransmission_histogram.is_empty());

    assert_eq!(r.status, RunStatus::Complete);
    assert_eq!(r.total_received, 500);
    assert_eq!(r.total_expected, 500);
    assert_eq!(r.highest_seq_received, Some(499));
    assert!(r.missing.is_empty());
    assert_eq!(r.goodput_samples, vec![1.0; 5]);
    assert_eq!(r.average_goodput(), Some(1.0));

    let received = sink.count(|e| matches!(e, MetricEvent::Received { .. }));
    assert_eq!(received, 500);
}

/// A single scripted loss is retransmitted once and recovered once.
#[tokio::test]
async fn scripted_loss_is_recovered() {
    let sink = Arc::new(MemorySink::new());
    let (s, r) = transfer(
        sender_config(20),
        receiver_config(1000),
        ScriptedLoss::dropping([4]),
        Arc::clone(&sink),
    )
    .await;

    assert!(s.status.is_complete());
    assert_eq!(s.dropped_packets, 1);
    assert_eq!(s.retransmission_histogram.into_iter().collect::<Vec<_>>(), vec![(1, 1)]);
    assert!(s.pending_retransmissions.is_empty());

    assert!(r.status.is_complete());
    assert_eq!(r.total_received, 20);
    assert_eq!(r.recovery_histogram.into_iter().collect::<Vec<_>>(), vec![(1, 1)]);

    let first_drop = sink.count(|e| {
        matches!(e, MetricEvent::Dropped { id: 3, retransmission: false, .. })
    });
    let gap = sink.count(|e| matches!(e, MetricEvent::Missing { id: 3, .. }));
    let retransmissions = sink.events().into_iter().find_map(|e| match e {
        MetricEvent::Retransmissions { id: 3, count } => Some(count),
        _ => None,
    });
    assert_eq!(first_drop, 1);
    assert_eq!(gap, 1);
    assert_eq!(retransmissions, Some(1));
}

/// Random loss still ends with every id delivered and every loss resent.
#[tokio::test]
async fn random_loss_transfer_completes() {
    let cfg = SenderConfig {
        drop_rate: 0.1,
        ..sender_config(2000)
    };
    let loss = RandomLoss::seeded(cfg.drop_rate, 1234);
    let (s, r) = transfer(cfg, receiver_config(500), loss, Arc::new(MemorySink::new())).await;

    assert!(s.status.is_complete(), "{}", s.status);
    assert_eq!(s.acked_packets, 2000);
    assert!(s.dropped_packets > 0);
    assert!(!s.retransmission_histogram.contains_key(&0));
    let lost: u64 = s.retransmission_histogram.values().sum();
    assert_eq!(lost, s.dropped_packets as u64);

    assert!(r.status.is_complete());
    assert_eq!(r.total_received, 2000);
    assert!(r.missing.is_empty());
    assert_eq!(r.goodput_samples.len(), 4);
    assert!(r.goodput_samples.iter().all(|g| *g > 0.0 && *g <= 1.0));
}

/// A receiver that stops at its target leaves the sender incomplete.
#[tokio::test]
async fn receiver_target_cuts_sender_short() {
    let receiver_cfg = ReceiverConfig {
        target: Some(50),
        ..receiver_config(1000)
    };
    let (s, r) = transfer(
        sender_config(500),
        receiver_cfg,
        ScriptedLoss::lossless(),
        Arc::new(MemorySink::new()),
    )
    .await;

    assert!(r.status.is_complete());
    assert!(r.total_expected >= 50);
    assert!(r.total_expected < 500);

    assert!(!s.status.is_complete());
    assert_eq!(s.status.exit_code(), 2);
    assert!(s.acked_packets < 500);
}

/// With no ACKs coming back the sender gives up after the completion
/// timeout and reports what was left unacknowledged.
#[tokio::test]
async fn silent_receiver_times_out() {
    let (mut client, mut server) = pipe_pair(1 << 16);

    let silent = tokio::spawn(async move {
        server.server_handshake().await.expect("server handshake");
        let mut batches = 0;
        while let Ok(Some(_)) = server.reader.read_frame().await {
            batches += 1;
        }
        batches
    });

    client.client_handshake().await.expect("client handshake");
    let (reader, writer) = client.into_parts();
    let cfg = SenderConfig {
        total_packets: 30,
        completion_timeout: Duration::from_millis(200),
        ..SenderConfig::default()
    };
    let loss = ScriptedLoss::lossless();
    let report = sender::run(reader, writer, &cfg, loss, Arc::new(NullSink)).await;

    assert_eq!(
        report.status,
        RunStatus::Incomplete(IncompleteReason::Timeout { unacked: 30 })
    );
    assert_eq!(report.sent_packets, 10);
    assert_eq!(report.acked_packets, 0);
    assert!(silent.await.unwrap() >= 1);
}

/// Malformed batches are skipped; the receiver keeps serving the stream.
#[tokio::test]
async fn malformed_batches_are_skipped() {
    let (a, b) = duplex(4096);
    let (br, bw) = split(b);
    let mut server = Connection::new(br, bw, 1 << 16);

    let receiver_task = tokio::spawn(async move {
        server.server_handshake().await.expect("server handshake");
        let (reader, writer) = server.into_parts();
        receiver::run(reader, writer, &receiver_config(1000), Arc::new(NullSink)).await
    });

    let (ar, mut aw) = split(a);
    let mut lines = BufReader::new(ar).lines();
    aw.write_all(Frame::Hello("network".into()).encode().as_bytes())
        .await
        .unwrap();
    let welcome = lines.next_line().await.unwrap().unwrap();
    assert!(welcome.starts_with("WELCOME:"));

    aw.write_all(b"SEQ:0,1,x\nSEQ:70000\nSEQ:2,3\n").await.unwrap();
    let ack = lines.next_line().await.unwrap().unwrap();
    assert_eq!(ack, "ACK:2,3");
    aw.shutdown().await.unwrap();

    let report = receiver_task.await.unwrap();
    assert_eq!(report.status, RunStatus::Incomplete(IncompleteReason::PeerClosed));
    assert_eq!(report.malformed_batches, 2);
    assert_eq!(report.total_received, 2);
    assert_eq!(report.missing, vec![0, 1]);
}

/// Drops the first attempt and every attempt after the tenth, so id 0 never
/// gets through once the first window is out.
struct LoseFirstForever {
    attempts: u64,
}

impl LossModel for LoseFirstForever {
    fn should_drop(&mut self) -> bool {
        self.attempts += 1;
        self.attempts == 1 || self.attempts > 10
    }
}

/// A sender that gives up while the receiver still has a gap leaves both
/// sides incomplete.
#[tokio::test]
async fn sender_giving_up_leaves_receiver_incomplete() {
    let cfg = SenderConfig {
        total_packets: 10,
        completion_timeout: Duration::from_millis(200),
        ..SenderConfig::default()
    };
    let (s, r) = transfer(
        cfg,
        receiver_config(1000),
        LoseFirstForever { attempts: 0 },
        Arc::new(MemorySink::new()),
    )
    .await;

    assert_eq!(s.status, RunStatus::Incomplete(IncompleteReason::Timeout { unacked: 1 }));
    assert_eq!(s.pending_retransmissions, vec![0]);

    assert_eq!(r.status, RunStatus::Incomplete(IncompleteReason::PeerClosed));
    assert_eq!(r.status.exit_code(), 2);
    assert_eq!(r.total_received, 9);
    assert_eq!(r.missing, vec![0]);
}

/// Full run over a real TCP connection on loopback.
#[tokio::test]
async fn loopback_tcp_transfer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let receiver_cfg = receiver_config(100);
    let receiver_task = tokio::spawn(async move {
        receiver::serve(&listener, &receiver_cfg, Arc::new(NullSink)).await
    });

    let cfg = SenderConfig {
        server: addr,
        drop_rate: 0.05,
        seed: Some(7),
        ..sender_config(300)
    };
    let s = sender::connect_and_run(&cfg, Arc::new(NullSink)).await.expect("connect");
    let r = receiver_task.await.unwrap().expect("serve");

    assert!(s.status.is_complete(), "{}", s.status);
    assert_eq!(s.acked_packets, 300);
    assert!(r.status.is_complete(), "{}", r.status);
    assert_eq!(r.total_received, 300);
    assert!(r.missing.is_empty());
}
