//! Wire format for the messages exchanged between sender and receiver.
//!
//! Every message is a [`Frame`].  This module is responsible for:
//! - Defining the on-wire text layout (tag, payload).
//! - Serialising a [`Frame`] into a line ready for the stream.
//! - Parsing a line back into a [`Frame`], returning errors for malformed
//!   input.
//!
//! Pure data transformation; no I/O.
//!
//! # Wire format
//!
//! One frame per line, UTF-8, terminated by `\n`:
//!
//! ```text
//!  HELLO:<text>              client → server, connection bootstrap
//!  WELCOME:<text>            server → client, bootstrap reply
//!  SEQ:<id>,<id>,...         sender → receiver, one transmission batch
//!  ACK:<id>,<id>,...         receiver → sender, one acknowledgement batch
//! ```
//!
//! Batches are never empty on the wire and ids are decimal `u32` values below
//! the configured sequence space.

use thiserror::Error;

use crate::SeqId;

/// Tag prefixes, including the separating colon.
pub mod tags {
    pub const HELLO: &str = "HELLO:";
    pub const WELCOME: &str = "WELCOME:";
    pub const SEQ: &str = "SEQ:";
    pub const ACK: &str = "ACK:";
}

/// Id separator inside a batch payload.
const ID_SEPARATOR: char = ',';

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Bootstrap greeting sent by the client.
    Hello(String),
    /// Bootstrap reply sent by the server.
    Welcome(String),
    /// Sequence ids transmitted in one sender tick.
    Seq(Vec<SeqId>),
    /// Sequence ids acknowledged for one arrival batch, in arrival order.
    Ack(Vec<SeqId>),
}

impl Frame {
    /// Short name of the frame kind, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello(_) => "HELLO",
            Frame::Welcome(_) => "WELCOME",
            Frame::Seq(_) => "SEQ",
            Frame::Ack(_) => "ACK",
        }
    }

    /// Serialise this frame into a newly allocated line, including the
    /// trailing `\n`.
    pub fn encode(&self) -> String {
        let mut line = match self {
            Frame::Hello(text) => format!("{}{}", tags::HELLO, text),
            Frame::Welcome(text) => format!("{}{}", tags::WELCOME, text),
            Frame::Seq(ids) => format!("{}{}", tags::SEQ, join_ids(ids)),
            Frame::Ack(ids) => format!("{}{}", tags::ACK, join_ids(ids)),
        };
        line.push('\n');
        line
    }

    /// Parse a [`Frame`] from one line (trailing `\r\n` / `\n` tolerated).
    ///
    /// Batch ids must be strictly below `max_seq`.
    ///
    /// Returns [`Err`] if:
    /// - the line is blank,
    /// - the tag is not one of [`tags`],
    /// - a batch is empty, contains a non-numeric id, or an id ≥ `max_seq`.
    pub fn decode(line: &str, max_seq: SeqId) -> Result<Self, FrameError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(FrameError::Empty);
        }

        if let Some(text) = line.strip_prefix(tags::HELLO) {
            return Ok(Frame::Hello(text.to_string()));
        }
        if let Some(text) = line.strip_prefix(tags::WELCOME) {
            return Ok(Frame::Welcome(text.to_string()));
        }
        if let Some(ids) = line.strip_prefix(tags::SEQ) {
            return parse_ids(ids, max_seq).map(Frame::Seq);
        }
        if let Some(ids) = line.strip_prefix(tags::ACK) {
            return parse_ids(ids, max_seq).map(Frame::Ack);
        }

        let tag = line.split(':').next().unwrap_or(line);
        Err(FrameError::UnknownTag(tag.chars().take(16).collect()))
    }
}

/// Errors that can arise when parsing a line.
///
/// All of them are local to one frame: the caller discards the frame and
/// keeps reading.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Line contained nothing but whitespace.
    #[error("empty line")]
    Empty,
    /// Line did not start with a known tag.
    #[error("unknown frame tag {0:?}")]
    UnknownTag(String),
    /// `SEQ:` / `ACK:` with no ids.
    #[error("batch carries no sequence ids")]
    EmptyBatch,
    /// An id failed to parse as an unsigned integer.
    #[error("non-numeric sequence id {0:?}")]
    InvalidId(String),
    /// An id lies outside the sequence space.
    #[error("sequence id {id} outside sequence space (max {max_seq})")]
    OutOfRange { id: u64, max_seq: SeqId },
}

fn join_ids(ids: &[SeqId]) -> String {
    let mut out = String::with_capacity(ids.len() * 6);
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push(ID_SEPARATOR);
        }
        out.push_str(&id.to_string());
    }
    out
}

/// Parse a comma-separated id list.  Empty fields between separators are
/// skipped, so `"1,,2,"` is `[1, 2]`.
fn parse_ids(payload: &str, max_seq: SeqId) -> Result<Vec<SeqId>, FrameError> {
    let mut ids = Vec::new();
    for field in payload.split(ID_SEPARATOR) {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let id: u64 = field
            .parse()
            .map_err(|_| FrameError::InvalidId(field.chars().take(32).collect()))?;
        if id >= u64::from(max_seq) {
            return Err(FrameError::OutOfRange { id, max_seq });
        }
        ids.push(id as SeqId);
    }
    if ids.is_empty() {
        return Err(FrameError::EmptyBatch);
    }
    Ok(ids)
}
