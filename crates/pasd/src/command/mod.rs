// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The register-10001 command envelope.
//!
//! On top of plain register reads and writes, every field microcontroller
//! serves a structured command channel in registers 10001..10126, used for
//! firmware upload and for the rapid-sampling buffer:
//!
//! ```text
//! 10001-10002  CRC32 of the 246-byte buffer (little-endian halves)
//! 10003-10004  address low / (address high | word count << 8)
//! 10005-10124  120 words of segment data
//! 10125        command (always the last register written)
//! 10126        result (0 OK, 1 ERROR, 2 CRC_ERROR, 3 UNKNOWN_COMMAND)
//! ```
//!
//! The CRC32 covers the buffer as it would appear fully written, unwritten
//! bytes zero, command byte included even though it travels in a separate
//! single-register write.
//!
//! # Modules
//!
//! - `envelope` - the [`CommandFrame`] builder and result plumbing
//! - `firmware` - PIC24 instruction packing and the upload procedure
//! - `sampling` - rapid-sample start/stop/progress/readout

pub mod envelope;
pub mod firmware;
pub mod sampling;

// Re-exports
pub use envelope::{Command, CommandFrame, ResultCode};
pub use firmware::{upload, Segment};
pub use sampling::{filter_constant, get_sample, start_sample, stop_sample};

use std::fmt;
use std::io;

use crate::transport::TransportError;

/// Result alias for command-envelope operations.
pub type CommandResult<T> = Result<T, CommandError>;

/// Errors from command-envelope operations.
#[derive(Debug)]
pub enum CommandError {
    /// The underlying bus transaction failed.
    Transport(TransportError),
    /// The device reported a non-zero result for the named step.
    Failed {
        /// Which command failed (ERASE, WRITE_SEGMENT, ...).
        step: &'static str,
        /// The device's result code.
        code: ResultCode,
    },
    /// A sample-read reply failed its CRC32 check.
    CrcMismatch {
        /// CRC carried in the reply.
        expected: u32,
        /// CRC recomputed over the reply body.
        got: u32,
    },
    /// A sample-read reply echoed the wrong address or count.
    ReadbackMismatch {
        /// `(address, count)` requested.
        requested: (u16, u16),
        /// `(address, count)` echoed.
        echoed: (u16, u16),
    },
    /// A firmware segment cannot be packed (bad length or alignment).
    BadSegment(String),
    /// Local file I/O while saving sample data.
    Io(io::Error),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Failed { step, code } => write!(f, "{step} failed: {code}"),
            Self::CrcMismatch { expected, got } => {
                write!(f, "sample read CRC mismatch: device 0x{expected:08X}, local 0x{got:08X}")
            }
            Self::ReadbackMismatch { requested, echoed } => write!(
                f,
                "sample read echoed address/count {echoed:?}, requested {requested:?}"
            ),
            Self::BadSegment(msg) => write!(f, "bad firmware segment: {msg}"),
            Self::Io(e) => write!(f, "i/o: {e}"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for CommandError {
    fn from(e: TransportError) -> Self {
        CommandError::Transport(e)
    }
}

impl From<io::Error> for CommandError {
    fn from(e: io::Error) -> Self {
        CommandError::Io(e)
    }
}
