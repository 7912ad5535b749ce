//! Error model shared by the codec, transports and command protocol.

use std::io;

/// Alias for `Result<T, lrpc_proto::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Base for protocol-level error codes, kept clear of OS `errno` values.
const CODE_BASE: i32 = i32::MAX;

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Normal unwinding, e.g. the peer hung up between requests.
    Done,
    /// Only the current request (or connection attempt) failed.
    NonFatal,
    /// The connection must be torn down.
    Fatal,
}

/// Errors raised by transports, the codec and the command protocol.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The stream ended before the requested bytes arrived.
    #[error("connection closed unexpectedly")]
    Eof,

    /// An operation was attempted on a closed transport.
    #[error("operation requested on closed transport")]
    Closed,

    /// The peer sent bytes that do not fit the request being served.
    #[error("error in the received protocol: {0}")]
    Protocol(String),

    /// A value carried a type tag this side does not know.
    #[error("error in the received protocol: unknown type tag {0}")]
    UnknownTag(u8),

    /// A read completed without producing any data.
    #[error("no data received when attempting to read")]
    NoData,

    /// The peer sent a command byte this side does not support.
    #[error("undefined command {0}")]
    Command(u8),

    /// The handshake header was malformed or from another protocol version.
    #[error("header exchange failed: {0}")]
    Header(String),

    /// A path segment exceeds the configured maximum length.
    #[error("function name too long: `{segment}` exceeds {max} bytes")]
    LongName {
        /// The offending segment.
        segment: String,
        /// The configured limit.
        max: usize,
    },

    /// A read, write or connect did not finish in time.
    #[error("timeout")]
    Timeout,

    /// The remote side reported an application-level failure.
    #[error("{message}")]
    Remote {
        /// Error code reported by the remote host (informational).
        code: u32,
        /// Human-readable message from the remote host.
        message: String,
    },

    /// The peer closed the connection cleanly between requests.
    #[error("peer disconnected")]
    Disconnected,

    /// An OS-level transport error.
    #[error(transparent)]
    Io(io::Error),
}

impl Error {
    /// Returns the fatal / non-fatal classification of this error.
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Eof | Self::Closed | Self::UnknownTag(_) | Self::Header(_) | Self::Io(_) => {
                Severity::Fatal
            }
            Self::Protocol(_)
            | Self::NoData
            | Self::Command(_)
            | Self::LongName { .. }
            | Self::Timeout
            | Self::Remote { .. } => Severity::NonFatal,
            Self::Disconnected => Severity::Done,
        }
    }

    /// Returns `true` if the connection that raised this error is unusable.
    pub const fn is_fatal(&self) -> bool {
        matches!(self.severity(), Severity::Fatal)
    }

    /// Returns the platform-independent numeric code for this error.
    ///
    /// OS errors pass their raw `errno` through; remote errors carry the
    /// code reported by the peer.
    #[allow(clippy::cast_possible_wrap)]
    pub fn code(&self) -> i32 {
        match self {
            Self::Eof => CODE_BASE - 100,
            Self::Closed => CODE_BASE - 101,
            Self::Protocol(_) | Self::UnknownTag(_) => CODE_BASE - 102,
            Self::NoData => CODE_BASE - 103,
            Self::Command(_) => CODE_BASE - 106,
            Self::Header(_) => CODE_BASE - 107,
            Self::LongName { .. } => CODE_BASE - 108,
            Self::Timeout => CODE_BASE - 109,
            Self::Disconnected => CODE_BASE - 110,
            Self::Remote { code, .. } => *code as i32,
            Self::Io(e) => e.raw_os_error().unwrap_or(-1),
        }
    }

    /// Shorthand for a non-fatal [`Error::Protocol`].
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Self::Eof,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_by_kind() {
        let eof: Error = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(eof, Error::Eof));
        assert!(eof.is_fatal());

        let slow: Error = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(matches!(slow, Error::Timeout));
        assert_eq!(slow.severity(), Severity::NonFatal);

        let refused: Error = io::Error::from_raw_os_error(111).into();
        assert!(refused.is_fatal());
        assert_eq!(refused.code(), 111);
    }

    #[test]
    fn protocol_codes_stay_distinct() {
        let codes = [
            Error::Eof.code(),
            Error::Closed.code(),
            Error::protocol("x").code(),
            Error::NoData.code(),
            Error::Command(9).code(),
            Error::Header("x".into()).code(),
            Error::Timeout.code(),
            Error::Disconnected.code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(Error::UnknownTag(42).code(), Error::protocol("x").code());
    }

    #[test]
    fn classification_matches_taxonomy() {
        assert!(Error::Header("bad magic".into()).is_fatal());
        assert!(Error::UnknownTag(200).is_fatal());
        assert!(!Error::Command(99).is_fatal());
        assert!(
            !Error::LongName {
                segment: "x".repeat(30),
                max: 19,
            }
            .is_fatal()
        );
        assert_eq!(Error::Disconnected.severity(), Severity::Done);
    }
}
