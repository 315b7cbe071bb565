//! Errors returned by the meters.

use std::{fmt, io, path::PathBuf, time::Duration};
use thiserror::Error;

/// The result type of this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Progress of a single meter call.
///
/// Every server or client call walks `Idle -> Connecting -> Exchanging` and
/// ends in `Completed` or in an [`Error`] tagged with the phase it failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Options are being checked, nothing touched the network yet.
    Idle,
    /// Binding, accepting or dialing.
    Connecting,
    /// Messages are moving over an established connection.
    Exchanging,
    /// The exchange finished.
    Completed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Exchanging => "exchanging",
            Phase::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Meter error.
#[derive(Debug, Error)]
pub enum Error {
    /// Options break an invariant.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    /// Options document is not valid JSON.
    #[error("failed to decode options: {0}")]
    Json(#[from] serde_json::Error),
    /// Options document is not valid TOML.
    #[error("failed to decode options: {0}")]
    Toml(#[from] toml::de::Error),
    /// Options file could not be read.
    #[error("failed to read options from {path:?}: {source}")]
    ReadOptions {
        /// Path of the options file.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Failed to bind a listener.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        /// Listen address.
        addr: String,
        /// Underlying error.
        source: io::Error,
    },
    /// Failed to accept an inbound connection.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
    /// Failed to establish an outbound connection.
    #[error("failed to dial {addr}: {source}")]
    Dial {
        /// Dial address.
        addr: String,
        /// Underlying error.
        source: io::Error,
    },
    /// The peer closed the connection in the middle of a message.
    #[error("bad nread = {actual}, expected {expected} bytes")]
    ShortRead {
        /// Bytes a message should have.
        expected: usize,
        /// Bytes received before the stream ended.
        actual: usize,
    },
    /// The stream stopped accepting bytes in the middle of a message.
    #[error("bad nwrite = {actual}, expected {expected} bytes")]
    ShortWrite {
        /// Bytes a message should have.
        expected: usize,
        /// Bytes written before the stream refused more.
        actual: usize,
    },
    /// Transport failure during the exchange.
    #[error("transport failed: {0}")]
    Io(#[from] io::Error),
    /// The deadline passed before a single message completed.
    #[error("no progress before deadline of {timeout:?}")]
    NoProgress {
        /// The configured client budget.
        timeout: Duration,
    },
    /// The clock did not advance over the exchange, so no rate exists.
    #[error("elapsed time too small to derive a rate")]
    ZeroElapsed,
}

impl Error {
    /// Returns the phase this error ended the call in.
    pub fn phase(&self) -> Phase {
        match self {
            Error::InvalidOptions(_)
            | Error::Json(_)
            | Error::Toml(_)
            | Error::ReadOptions { .. } => Phase::Idle,
            Error::Listen { .. } | Error::Accept(_) | Error::Dial { .. } => Phase::Connecting,
            Error::ShortRead { .. }
            | Error::ShortWrite { .. }
            | Error::Io(_)
            | Error::NoProgress { .. }
            | Error::ZeroElapsed => Phase::Exchanging,
        }
    }

    /// Returns `true` if the error is a configuration problem rather than a
    /// network one.
    pub fn is_config(&self) -> bool {
        self.phase() == Phase::Idle
    }

    /// Returns `true` if a message was truncated.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::ShortRead { .. } | Error::ShortWrite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases() {
        let e = Error::InvalidOptions("msgSize must be positive".into());
        assert_eq!(e.phase(), Phase::Idle);
        assert!(e.is_config());

        let e = Error::Dial {
            addr: "127.0.0.1:1".into(),
            source: io::ErrorKind::ConnectionRefused.into(),
        };
        assert_eq!(e.phase(), Phase::Connecting);
        assert!(!e.is_config());

        let e = Error::ShortRead {
            expected: 128,
            actual: 7,
        };
        assert_eq!(e.phase(), Phase::Exchanging);
        assert!(e.is_protocol_violation());
        assert_eq!(e.to_string(), "bad nread = 7, expected 128 bytes");
    }
}
