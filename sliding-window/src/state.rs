//! Run outcome types.
//!
//! A run ends exactly once, either because the work is done or because it
//! cannot make further progress.  Neither side crashes on a failed run; the
//! outcome is reported as a [`RunStatus`] and the binary turns it into an
//! exit code.

use std::fmt;

/// Why a run stopped before finishing its work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncompleteReason {
    /// No ACK progress within the completion timeout.
    Timeout {
        /// Ids admitted or still to be admitted that were never acknowledged.
        unacked: u64,
    },
    /// Reading or writing the stream failed.
    Transport(String),
    /// The peer closed the stream while work was outstanding.
    PeerClosed,
}

/// Final status of one sender or receiver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    Incomplete(IncompleteReason),
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunStatus::Complete)
    }

    /// Process exit code: 0 for a complete run, 2 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Complete => 0,
            RunStatus::Incomplete(_) => 2,
        }
    }
}

impl fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncompleteReason::Timeout { unacked } => {
                write!(f, "timed out with {unacked} id(s) unacknowledged")
            }
            IncompleteReason::Transport(e) => write!(f, "transport failure: {e}"),
            IncompleteReason::PeerClosed => write!(f, "peer closed the connection"),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Complete => write!(f, "complete"),
            RunStatus::Incomplete(reason) => write!(f, "incomplete ({reason})"),
        }
    }
}
