//! Async frame transport over a byte stream.
//!
//! [`FrameReader`] and [`FrameWriter`] are thin wrappers around the two halves
//! of any tokio stream (TCP halves in production, `tokio::io::duplex` pipes
//! in tests) that speak [`crate::frame::Frame`] instead of raw bytes.  All
//! protocol logic lives elsewhere; this module owns only byte I/O.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use thiserror::Error;

use crate::frame::{Frame, FrameError};
use crate::SeqId;

/// Longest line accepted from the peer, terminator included.
pub const MAX_LINE: u64 = 1 << 20;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying I/O error, including invalid UTF-8 on the stream.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A complete line arrived but did not parse as a frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] FrameError),
    /// The peer sent a line longer than [`MAX_LINE`]; framing is lost.
    #[error("line exceeds {} bytes", MAX_LINE)]
    LineTooLong,
    /// The stream ended in the middle of a line.
    #[error("stream ended inside a frame")]
    Truncated,
}

impl TransportError {
    /// `true` when only the current frame is bad and reading may continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

// ---------------------------------------------------------------------------
// FrameReader
// ---------------------------------------------------------------------------

/// Reads one [`Frame`] per line from the read half of a stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_seq: SeqId,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `inner`; batch ids at or above `max_seq` are rejected.
    pub fn new(inner: R, max_seq: SeqId) -> Self {
        Self {
            inner: BufReader::new(inner),
            max_seq,
            line: String::new(),
        }
    }

    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream.  A line that fails to
    /// parse is returned as [`TransportError::Malformed`]; the caller decides
    /// whether to keep reading (see [`TransportError::is_recoverable`]).
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        self.line.clear();
        let n = (&mut self.inner)
            .take(MAX_LINE)
            .read_line(&mut self.line)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if !self.line.ends_with('\n') {
            return Err(if n as u64 >= MAX_LINE {
                TransportError::LineTooLong
            } else {
                TransportError::Truncated
            });
        }
        Ok(Some(Frame::decode(&self.line, self.max_seq)?))
    }
}

// ---------------------------------------------------------------------------
// FrameWriter
// ---------------------------------------------------------------------------

/// Writes [`Frame`]s, one per line, to the write half of a stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode `frame` and flush it to the stream.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.inner.write_all(frame.encode().as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Signal end of stream to the peer.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
