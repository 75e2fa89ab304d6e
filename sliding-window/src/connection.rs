//! Connection setup: TCP connect/accept plus the bootstrap exchange.
//!
//! Before any sequence ids flow, the client greets the server and waits for a
//! setup confirmation:
//!
//! ```text
//!  client                          server
//!    │ ── HELLO:network ──────────▶  │
//!    │ ◀── WELCOME:Connection setup success
//!    │                               │
//!    │   SEQ / ACK batches ...       │
//! ```
//!
//! The client accepts any welcome text containing "success"
//! (case-insensitive).  The sequence space is not negotiated: both peers must
//! be configured with the same `max_seq`, or batches carrying ids beyond the
//! receiver's space are discarded as malformed.
//!
//! A [`Connection`] is generic over the stream halves so tests can run the
//! same code over in-memory pipes.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::frame::Frame;
use crate::transport::{FrameReader, FrameWriter, TransportError};
use crate::SeqId;

/// Greeting sent by the client.
pub const GREETING: &str = "network";
/// Confirmation sent by the server.
pub const SETUP_SUCCESS: &str = "Connection setup success";
/// How long either side waits for the other's bootstrap frame.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that end connection setup.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The peer answered, but not with the expected bootstrap frame.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    /// The peer stayed silent for [`HANDSHAKE_TIMEOUT`].
    #[error("handshake timed out")]
    HandshakeTimeout,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Frame reader/writer pair for one peer.
#[derive(Debug)]
pub struct Connection<R, W> {
    /// Remote address, when the stream is a socket.
    pub peer: Option<SocketAddr>,
    pub reader: FrameReader<R>,
    pub writer: FrameWriter<W>,
}

/// A connection over the two halves of a TCP stream.
pub type TcpConnection = Connection<OwnedReadHalf, OwnedWriteHalf>;

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap raw stream halves.  No bytes are exchanged.
    pub fn new(read: R, write: W, max_seq: SeqId) -> Self {
        Self {
            peer: None,
            reader: FrameReader::new(read, max_seq),
            writer: FrameWriter::new(write),
        }
    }

    /// Client side of the bootstrap: send the greeting, await the welcome.
    pub async fn client_handshake(&mut self) -> Result<(), ConnError> {
        self.writer.send(&Frame::Hello(GREETING.to_string())).await?;
        log::debug!("[conn] → HELLO {GREETING}");

        match self.next_bootstrap_frame().await? {
            Frame::Welcome(text) if text.to_lowercase().contains("success") => {
                log::info!("Server response: {text}");
                Ok(())
            }
            Frame::Welcome(text) => Err(ConnError::HandshakeFailed(format!(
                "server refused setup: {text}"
            ))),
            other => Err(ConnError::HandshakeFailed(format!(
                "expected WELCOME, got {}",
                other.kind()
            ))),
        }
    }

    /// Server side of the bootstrap: await any greeting, confirm setup.
    ///
    /// Returns the greeting text.
    pub async fn server_handshake(&mut self) -> Result<String, ConnError> {
        let greeting = match self.next_bootstrap_frame().await? {
            Frame::Hello(text) => text,
            other => {
                return Err(ConnError::HandshakeFailed(format!(
                    "expected HELLO, got {}",
                    other.kind()
                )))
            }
        };
        log::info!("Received initial string: {greeting}");
        self.writer
            .send(&Frame::Welcome(SETUP_SUCCESS.to_string()))
            .await?;
        Ok(greeting)
    }

    /// Split into the reader and writer halves.
    pub fn into_parts(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }

    async fn next_bootstrap_frame(&mut self) -> Result<Frame, ConnError> {
        match timeout(HANDSHAKE_TIMEOUT, self.reader.read_frame()).await {
            Ok(Ok(Some(frame))) => Ok(frame),
            Ok(Ok(None)) => Err(ConnError::HandshakeFailed(
                "peer closed during setup".into(),
            )),
            Ok(Err(e)) => Err(ConnError::Transport(e)),
            Err(_elapsed) => Err(ConnError::HandshakeTimeout),
        }
    }
}

impl TcpConnection {
    /// Active open: connect to `server` and run the client bootstrap.
    pub async fn connect(server: SocketAddr, max_seq: SeqId) -> Result<Self, ConnError> {
        let stream = TcpStream::connect(server).await?;
        stream.set_nodelay(true)?;
        log::info!("Connected to server at {server}");

        let mut conn = Self::from_stream(stream, max_seq)?;
        conn.client_handshake().await?;
        log::info!("Connection setup successful");
        Ok(conn)
    }

    /// Passive open: accept one client on `listener` and run the server
    /// bootstrap.
    pub async fn accept(listener: &TcpListener, max_seq: SeqId) -> Result<Self, ConnError> {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        log::info!("Connection established with {addr}");

        let mut conn = Self::from_stream(stream, max_seq)?;
        conn.server_handshake().await?;
        Ok(conn)
    }

    fn from_stream(stream: TcpStream, max_seq: SeqId) -> Result<Self, ConnError> {
        let peer = stream.peer_addr()?;
        let (read, write) = stream.into_split();
        let mut conn = Self::new(read, write, max_seq);
        conn.peer = Some(peer);
        Ok(conn)
    }
}
