//! Error types for the zflate library.

use std::fmt;

/// Result type alias for zflate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding.
///
/// All of these are terminal: once `eval` has surfaced an error, the
/// encoder will not resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Internal invariant broken (encoder bug, not caller error).
    InvariantViolation(&'static str),
    /// `flush(n)` was called with more bytes than were written.
    BudgetUnderflow {
        /// Bytes the caller claimed to have drained.
        claimed: usize,
        /// Bytes actually written into the output view.
        written: usize,
    },
    /// Input was handed to an encoder that already closed its stream.
    BufferMissing,
    /// Window bits outside the supported `[8, 15]` range.
    InvalidWindowBits(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvariantViolation(what) => {
                write!(f, "internal invariant violated: {}", what)
            }
            Error::BudgetUnderflow { claimed, written } => {
                write!(
                    f,
                    "flush claimed {} drained bytes but only {} were written",
                    claimed, written
                )
            }
            Error::BufferMissing => {
                write!(f, "input refilled after the stream was closed")
            }
            Error::InvalidWindowBits(bits) => {
                write!(f, "window bits {} outside supported range 8-15", bits)
            }
        }
    }
}

impl std::error::Error for Error {}
